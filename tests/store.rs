mod common;

use std::sync::Arc;

use serde_json::json;

use common::fast_config;
use flowline::blocks::NodeOutput;
use flowline::graph::{Workflow, WorkflowBuilder};
use flowline::blocks::{BlockConfig, TriggerConfig};
use flowline::store::{ExecutionStore, LogRecord, MemoryStore, PauseSnapshot};
use flowline::policy::CircuitState;
use flowline::types::{ExecutionStatus, LogLevel, NodeStatus};

fn tiny_workflow() -> Workflow {
    WorkflowBuilder::new("tiny")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .build()
}

#[tokio::test]
async fn node_execution_creation_is_idempotent() {
    let store = MemoryStore::new();
    let execution = store
        .create_execution(&tiny_workflow(), json!({}))
        .await
        .unwrap();

    store
        .create_node_execution(&execution.id, "start")
        .await
        .unwrap();
    store
        .record_node_result(
            &execution.id,
            "start",
            NodeStatus::Completed,
            Some(NodeOutput::new().with_value("ok", json!(true))),
            None,
            0,
        )
        .await
        .unwrap();
    // Re-creating must not reset the completed row.
    store
        .create_node_execution(&execution.id, "start")
        .await
        .unwrap();

    let record = store
        .node_execution(&execution.id, "start")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, NodeStatus::Completed);
    assert_eq!(store.node_executions(&execution.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_claims_have_exactly_one_winner() {
    let store = Arc::new(MemoryStore::new());
    let execution = store
        .create_execution(&tiny_workflow(), json!({}))
        .await
        .unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let store = store.clone();
        let execution_id = execution.id.clone();
        tasks.spawn(async move {
            store
                .try_claim_node(&execution_id, "start", chrono::Duration::seconds(30))
                .await
                .unwrap()
        });
    }
    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn terminal_nodes_cannot_be_claimed() {
    let store = MemoryStore::new();
    let execution = store
        .create_execution(&tiny_workflow(), json!({}))
        .await
        .unwrap();
    store
        .record_node_result(&execution.id, "start", NodeStatus::Completed, None, None, 0)
        .await
        .unwrap();
    assert!(!store
        .try_claim_node(&execution.id, "start", chrono::Duration::seconds(30))
        .await
        .unwrap());
}

#[tokio::test]
async fn logs_are_append_only_and_filterable() {
    let store = MemoryStore::new();
    let execution = store
        .create_execution(&tiny_workflow(), json!({}))
        .await
        .unwrap();

    store
        .append_log(LogRecord::execution(
            &execution.id,
            LogLevel::Info,
            "started",
        ))
        .await
        .unwrap();
    store
        .append_log(LogRecord::node(
            &execution.id,
            "start",
            LogLevel::Warn,
            "slow response",
        ))
        .await
        .unwrap();
    store
        .append_log(LogRecord::node(
            &execution.id,
            "start",
            LogLevel::Error,
            "gave up",
        ))
        .await
        .unwrap();

    assert_eq!(store.logs(&execution.id, None).await.unwrap().len(), 3);
    let node_logs = store.logs(&execution.id, Some("start")).await.unwrap();
    assert_eq!(node_logs.len(), 2);
    assert_eq!(node_logs[0].level, LogLevel::Warn);
    assert_eq!(node_logs[1].message, "gave up");
}

#[tokio::test]
async fn pause_snapshot_lifecycle() {
    let store = MemoryStore::new();
    let execution = store
        .create_execution(&tiny_workflow(), json!({}))
        .await
        .unwrap();

    store
        .save_pause_snapshot(PauseSnapshot {
            execution_id: execution.id.clone(),
            node_id: "start".into(),
            pending_input: json!({"amount": 5}),
            reason: "waiting on approval".into(),
            wait_key: Some("approval-1".into()),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let loaded = store
        .load_pause_snapshot(&execution.id, "start")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.pending_input["amount"], json!(5));
    assert_eq!(loaded.wait_key.as_deref(), Some("approval-1"));

    store
        .clear_pause_snapshot(&execution.id, "start")
        .await
        .unwrap();
    assert!(store
        .load_pause_snapshot(&execution.id, "start")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn breaker_updates_are_applied_at_the_store() {
    let store = MemoryStore::new();
    let config = fast_config().breaker;

    for _ in 0..2 {
        let record = store.breaker_on_failure("svc", &config).await.unwrap();
        assert_eq!(record.state, CircuitState::Closed);
    }
    let record = store.breaker_on_failure("svc", &config).await.unwrap();
    assert_eq!(record.state, CircuitState::Open);

    // Probe denied before cooldown.
    assert!(!store.breaker_try_probe("svc", &config).await.unwrap());
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    assert!(store.breaker_try_probe("svc", &config).await.unwrap());
    // Single probe slot.
    assert!(!store.breaker_try_probe("svc", &config).await.unwrap());

    let record = store.breaker_on_success("svc").await.unwrap();
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(record.failure_count, 0);
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use flowline::store::SqliteStore;

    async fn connect() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowline.db");
        let url = format!("sqlite://{}", path.display());
        let store = SqliteStore::connect(&url).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn execution_round_trips_with_workflow_snapshot() {
        let (store, _dir) = connect().await;
        let workflow = tiny_workflow();
        let created = store
            .create_execution(&workflow, json!({"price": 3}))
            .await
            .unwrap();

        let loaded = store.execution(&created.id).await.unwrap();
        assert_eq!(loaded.workflow, workflow);
        assert_eq!(loaded.trigger, json!({"price": 3}));
        assert_eq!(loaded.status, ExecutionStatus::Pending);

        store
            .update_execution_status(&created.id, ExecutionStatus::Running)
            .await
            .unwrap();
        store
            .set_execution_result(&created.id, Some(json!({"done": true})), None)
            .await
            .unwrap();
        store
            .update_execution_status(&created.id, ExecutionStatus::Completed)
            .await
            .unwrap();

        let loaded = store.execution(&created.id).await.unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert!(loaded.started_at.is_some());
        assert!(loaded.finished_at.is_some());
        assert_eq!(loaded.output, Some(json!({"done": true})));
    }

    #[tokio::test]
    async fn claim_cas_works_across_connections() {
        let (store, _dir) = connect().await;
        let execution = store
            .create_execution(&tiny_workflow(), json!({}))
            .await
            .unwrap();

        assert!(store
            .try_claim_node(&execution.id, "start", chrono::Duration::seconds(30))
            .await
            .unwrap());
        assert!(!store
            .try_claim_node(&execution.id, "start", chrono::Duration::seconds(30))
            .await
            .unwrap());

        // Stale heartbeat makes the claim stealable.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(store
            .try_claim_node(&execution.id, "start", chrono::Duration::milliseconds(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn node_results_and_logs_persist() {
        let (store, _dir) = connect().await;
        let execution = store
            .create_execution(&tiny_workflow(), json!({}))
            .await
            .unwrap();

        store
            .try_claim_node(&execution.id, "start", chrono::Duration::seconds(30))
            .await
            .unwrap();
        store
            .record_node_input(&execution.id, "start", json!({"trigger": {}}))
            .await
            .unwrap();
        store
            .record_node_result(
                &execution.id,
                "start",
                NodeStatus::Completed,
                Some(NodeOutput::new().with_value("ok", json!(true))),
                None,
                1,
            )
            .await
            .unwrap();
        store
            .append_log(LogRecord::node(
                &execution.id,
                "start",
                LogLevel::Info,
                "done",
            ))
            .await
            .unwrap();

        let record = store
            .node_execution(&execution.id, "start")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, NodeStatus::Completed);
        assert_eq!(record.retry_count, 1);
        assert!(record.finished_at.is_some());
        assert_eq!(
            record.output.unwrap().values.get("ok"),
            Some(&json!(true))
        );

        let logs = store.logs(&execution.id, Some("start")).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "done");
    }

    #[tokio::test]
    async fn breaker_state_survives_round_trip() {
        let (store, _dir) = connect().await;
        let config = fast_config().breaker;

        for _ in 0..3 {
            store.breaker_on_failure("svc", &config).await.unwrap();
        }
        let record = store.breaker_record("svc").await.unwrap();
        assert_eq!(record.state, CircuitState::Open);
        assert_eq!(record.failure_count, 3);
        assert!(record.opened_at.is_some());
    }
}
