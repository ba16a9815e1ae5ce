mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{assert_node_status, engine_with, linear_workflow, Behavior, TestHandler};
use flowline::blocks::NodeOutput;
use flowline::store::ExecutionStore;
use flowline::types::{ExecutionStatus, NodeStatus};

#[tokio::test]
async fn stale_running_claim_is_reclaimed_after_heartbeat_timeout() {
    let work = Arc::new(TestHandler::new("work", Behavior::Succeed));
    let work_calls = work.calls.clone();
    let engine = engine_with(vec![("work", work)]);
    let store = engine.store.clone();

    // Simulate a prior orchestrator that completed "start", claimed
    // "work", and died without heartbeating again.
    let execution_id = engine
        .orchestrator
        .enqueue_execution(&linear_workflow("work"), json!({"seed": 42}))
        .await
        .unwrap();
    store
        .update_execution_status(&execution_id, ExecutionStatus::Running)
        .await
        .unwrap();
    store
        .create_node_execution(&execution_id, "start")
        .await
        .unwrap();
    store
        .record_node_result(
            &execution_id,
            "start",
            NodeStatus::Completed,
            Some(
                NodeOutput::new()
                    .with_value("payload", json!({"seed": 42}))
                    .with_value("seed", json!(42)),
            ),
            None,
            0,
        )
        .await
        .unwrap();
    let claimed = store
        .try_claim_node(&execution_id, "work", chrono::Duration::milliseconds(200))
        .await
        .unwrap();
    assert!(claimed, "dead instance won the original claim");

    // Within the heartbeat window the claim is honored.
    let claimed_again = store
        .try_claim_node(&execution_id, "work", chrono::Duration::milliseconds(200))
        .await
        .unwrap();
    assert!(!claimed_again, "live claim must not be stolen");

    // Past the timeout, recovery re-claims and finishes the execution.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let recovered = engine.orchestrator.recover().await.unwrap();
    assert!(recovered.contains(&execution_id));

    let record = store.execution(&execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_node_status(&engine.store, &execution_id, "work", NodeStatus::Completed).await;
    // The re-claimed node ran exactly once; completed upstream work was
    // not repeated (its handler was never invoked in this process).
    assert_eq!(work_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pending_execution_is_driven_on_recovery() {
    let work = Arc::new(TestHandler::new("work", Behavior::Succeed));
    let engine = engine_with(vec![("work", work)]);

    // Enqueued but never driven: the process died before run().
    let execution_id = engine
        .orchestrator
        .enqueue_execution(&linear_workflow("work"), json!({}))
        .await
        .unwrap();

    let recovered = engine.orchestrator.recover().await.unwrap();
    assert!(recovered.contains(&execution_id));

    let record = engine.store.execution(&execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn paused_executions_are_left_for_resume() {
    let waiter = Arc::new(TestHandler::new("waiter", Behavior::Pause));
    let engine = engine_with(vec![("waiter", waiter)]);

    let record = engine
        .orchestrator
        .execute(&linear_workflow("waiter"), json!({}))
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Paused);

    let recovered = engine.orchestrator.recover().await.unwrap();
    assert!(!recovered.contains(&record.id));
    let record = engine.store.execution(&record.id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Paused);
}

#[tokio::test]
async fn shutdown_leaves_executions_resumable() {
    let work = Arc::new(TestHandler::new("work", Behavior::Succeed));
    let calls = work.calls.clone();
    let engine = engine_with(vec![("work", work)]);

    let execution_id = engine
        .orchestrator
        .enqueue_execution(&linear_workflow("work"), json!({}))
        .await
        .unwrap();

    engine.orchestrator.shutdown();
    let record = engine.orchestrator.run(&execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Running);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}
