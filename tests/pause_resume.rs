mod common;

use std::sync::Arc;

use serde_json::json;

use common::{
    assert_execution_status, assert_node_status, engine_with, probe_config, Behavior, TestHandler,
};
use flowline::blocks::{BlockConfig, TriggerConfig};
use flowline::graph::WorkflowBuilder;
use flowline::runtime::OrchestratorError;
use flowline::store::ExecutionStore;
use flowline::types::{ExecutionStatus, NodeStatus};

fn pausing_workflow() -> flowline::graph::Workflow {
    WorkflowBuilder::new("pausing")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("wait", probe_config("waiter"))
        .add_block("after", probe_config("downstream"))
        .add_edge("start", "wait")
        .add_edge("wait", "after")
        .build()
}

#[tokio::test]
async fn pause_signal_parks_node_and_execution() {
    let waiter = Arc::new(TestHandler::new("waiter", Behavior::Pause));
    let downstream = Arc::new(TestHandler::new("downstream", Behavior::Succeed));
    let downstream_calls = downstream.calls.clone();
    let engine = engine_with(vec![("waiter", waiter), ("downstream", downstream)]);

    let record = engine
        .orchestrator
        .execute(&pausing_workflow(), json!({"order": 7}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Paused);
    assert_node_status(&engine.store, &record.id, "wait", NodeStatus::Paused).await;
    assert_eq!(downstream_calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    let snapshot = engine
        .store
        .load_pause_snapshot(&record.id, "wait")
        .await
        .unwrap()
        .expect("pause snapshot saved");
    assert_eq!(snapshot.reason, "awaiting external input");
    // The snapshot preserves the input the node was dispatched with.
    assert_eq!(snapshot.pending_input["stage"], json!("waiting"));
}

#[tokio::test]
async fn resume_merges_input_and_continues_downstream() {
    let waiter = Arc::new(TestHandler::new("waiter", Behavior::Pause));
    let waiter_calls = waiter.calls.clone();
    let downstream = Arc::new(TestHandler::new("downstream", Behavior::Succeed));
    let downstream_inputs = downstream.seen_inputs.clone();
    let engine = engine_with(vec![("waiter", waiter), ("downstream", downstream)]);

    let record = engine
        .orchestrator
        .execute(&pausing_workflow(), json!({"order": 7}))
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Paused);

    let record = engine
        .orchestrator
        .resume(&record.id, "wait", json!({"resume_token": "tok-99"}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    // Paused once, resumed once: exactly two dispatches, no upstream rerun.
    assert_eq!(waiter_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_node_status(&engine.store, &record.id, "wait", NodeStatus::Completed).await;
    assert_node_status(&engine.store, &record.id, "after", NodeStatus::Completed).await;

    // The resumed node's output (carrying the merged token) reached its
    // dependent, as if the token had been there on first dispatch.
    let seen = downstream_inputs.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("resume_token"), Some(&json!("tok-99")));

    // Snapshot consumed.
    assert!(engine
        .store
        .load_pause_snapshot(&record.id, "wait")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn resume_on_non_paused_node_is_an_explicit_error() {
    let worker = Arc::new(TestHandler::new("worker", Behavior::Succeed));
    let engine = engine_with(vec![("worker", worker)]);

    let workflow = WorkflowBuilder::new("simple")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("work", probe_config("worker"))
        .add_edge("start", "work")
        .build();
    let record = engine
        .orchestrator
        .execute(&workflow, json!({}))
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);

    let err = engine
        .orchestrator
        .resume(&record.id, "work", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotPaused { .. }));
}

#[tokio::test]
async fn double_resume_loses_the_race_explicitly() {
    let waiter = Arc::new(TestHandler::new("waiter", Behavior::Pause));
    let downstream = Arc::new(TestHandler::new("downstream", Behavior::Succeed));
    let engine = engine_with(vec![("waiter", waiter), ("downstream", downstream)]);

    let record = engine
        .orchestrator
        .execute(&pausing_workflow(), json!({}))
        .await
        .unwrap();

    engine
        .orchestrator
        .resume(&record.id, "wait", json!({"resume_token": "first"}))
        .await
        .unwrap();

    let err = engine
        .orchestrator
        .resume(&record.id, "wait", json!({"resume_token": "second"}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotPaused { .. }));
}

#[tokio::test]
async fn admin_pause_halts_a_pending_execution() {
    let worker = Arc::new(TestHandler::new("worker", Behavior::Succeed));
    let calls = worker.calls.clone();
    let engine = engine_with(vec![("worker", worker)]);

    let workflow = WorkflowBuilder::new("simple")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("work", probe_config("worker"))
        .add_edge("start", "work")
        .build();
    let execution_id = engine
        .orchestrator
        .enqueue_execution(&workflow, json!({}))
        .await
        .unwrap();

    engine.orchestrator.pause_execution(&execution_id).await.unwrap();
    assert_execution_status(&engine.store, &execution_id, ExecutionStatus::Paused).await;

    // Driving a paused execution dispatches nothing.
    let record = engine.orchestrator.run(&execution_id).await.unwrap();
    assert_eq!(record.status, ExecutionStatus::Paused);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

    // Pausing a paused execution is an explicit error, not a silent no-op.
    let err = engine
        .orchestrator
        .pause_execution(&execution_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidExecutionState { .. }
    ));
}

#[tokio::test]
async fn cancel_records_terminal_state_and_rejects_double_cancel() {
    let worker = Arc::new(TestHandler::new("worker", Behavior::Succeed));
    let engine = engine_with(vec![("worker", worker)]);

    let workflow = WorkflowBuilder::new("simple")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("work", probe_config("worker"))
        .add_edge("start", "work")
        .build();
    let execution_id = engine
        .orchestrator
        .enqueue_execution(&workflow, json!({}))
        .await
        .unwrap();

    engine.orchestrator.cancel(&execution_id).await.unwrap();
    assert_execution_status(&engine.store, &execution_id, ExecutionStatus::Cancelled).await;
    let record = engine.store.execution(&execution_id).await.unwrap();
    assert_eq!(record.error.as_deref(), Some("cancelled by operator"));

    let err = engine.orchestrator.cancel(&execution_id).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::InvalidExecutionState { .. }
    ));
}

#[tokio::test]
async fn retry_node_reruns_only_the_failed_node() {
    let flaky = Arc::new(TestHandler::new("flaky", Behavior::FailRetryable { times: 1 }));
    let flaky_calls = flaky.calls.clone();
    let engine = engine_with(vec![("flaky", flaky)]);

    // No retry budget: first transient failure fails the execution.
    let workflow = WorkflowBuilder::new("manual-retry")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("work", probe_config("flaky"))
        .add_edge("start", "work")
        .build();
    let record = engine
        .orchestrator
        .execute(&workflow, json!({}))
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(flaky_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Operator clicks retry: the node runs once more and succeeds.
    let record = engine
        .orchestrator
        .retry_node(&record.id, "work")
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(flaky_calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    // Retrying a non-failed node is an explicit error.
    let err = engine
        .orchestrator
        .retry_node(&record.id, "work")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFailed { .. }));
}
