mod common;

use std::sync::Arc;

use serde_json::json;

use common::{
    assert_execution_status, assert_node_status, branch_workflow, engine_with, linear_workflow,
    probe_config, Behavior, TestHandler,
};
use flowline::blocks::{BlockConfig, TriggerConfig};
use flowline::graph::{FailurePolicy, WorkflowBuilder};
use flowline::store::ExecutionStore;
use flowline::types::{ExecutionStatus, NodeStatus};

#[tokio::test]
async fn taken_branch_completes_and_untaken_branch_skips() {
    let probe_a = Arc::new(TestHandler::new("probe_a", Behavior::Succeed));
    let probe_b = Arc::new(TestHandler::new("probe_b", Behavior::Succeed));
    let calls_a = probe_a.calls.clone();
    let calls_b = probe_b.calls.clone();
    let engine = engine_with(vec![("probe_a", probe_a), ("probe_b", probe_b)]);

    let record = engine
        .orchestrator
        .execute(&branch_workflow(), json!({"price": 150}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_node_status(&engine.store, &record.id, "email_a", NodeStatus::Completed).await;
    assert_node_status(&engine.store, &record.id, "email_b", NodeStatus::Skipped).await;
    assert_eq!(calls_a.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(calls_b.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn false_branch_routes_the_other_way() {
    let probe_a = Arc::new(TestHandler::new("probe_a", Behavior::Succeed));
    let probe_b = Arc::new(TestHandler::new("probe_b", Behavior::Succeed));
    let engine = engine_with(vec![("probe_a", probe_a), ("probe_b", probe_b)]);

    let record = engine
        .orchestrator
        .execute(&branch_workflow(), json!({"price": 50}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_node_status(&engine.store, &record.id, "email_a", NodeStatus::Skipped).await;
    assert_node_status(&engine.store, &record.id, "email_b", NodeStatus::Completed).await;
}

#[tokio::test]
async fn fan_out_join_runs_every_node_exactly_once() {
    let b = Arc::new(TestHandler::new("b", Behavior::Succeed));
    let c = Arc::new(TestHandler::new("c", Behavior::Succeed));
    let d = Arc::new(TestHandler::new("d", Behavior::Succeed));
    let (calls_b, calls_c, calls_d) = (b.calls.clone(), c.calls.clone(), d.calls.clone());
    let engine = engine_with(vec![("b", b), ("c", c), ("d", d)]);

    let workflow = WorkflowBuilder::new("diamond")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("left", probe_config("b"))
        .add_block("right", probe_config("c"))
        .add_block("join", probe_config("d"))
        .add_edge("start", "left")
        .add_edge("start", "right")
        .add_edge("left", "join")
        .add_edge("right", "join")
        .build();

    let record = engine
        .orchestrator
        .execute(&workflow, json!({"seed": 1}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    for calls in [&calls_b, &calls_c, &calls_d] {
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
    // The join waited for both parents.
    assert_node_status(&engine.store, &record.id, "join", NodeStatus::Completed).await;
}

#[tokio::test]
async fn concurrent_drives_never_double_dispatch() {
    let work = Arc::new(TestHandler::new("work", Behavior::Sleep { millis: 30 }));
    let calls = work.calls.clone();
    let engine = engine_with(vec![("work", work)]);

    let execution_id = engine
        .orchestrator
        .enqueue_execution(&linear_workflow("work"), json!({}))
        .await
        .unwrap();

    // Duplicate scheduler ticks: two drivers race over the same execution.
    let first = engine.orchestrator.spawn_run(&execution_id);
    let second = engine.orchestrator.spawn_run(&execution_id);
    let (a, b) = tokio::join!(first, second);
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_execution_status(&engine.store, &execution_id, ExecutionStatus::Completed).await;
}

#[tokio::test]
async fn fatal_node_failure_fails_the_execution() {
    let boom = Arc::new(TestHandler::new("boom", Behavior::FailFatal));
    let after = Arc::new(TestHandler::new("after", Behavior::Succeed));
    let after_calls = after.calls.clone();
    let engine = engine_with(vec![("boom", boom), ("after", after)]);

    let workflow = WorkflowBuilder::new("failing")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("explode", probe_config("boom"))
        .add_block("downstream", probe_config("after"))
        .add_edge("start", "explode")
        .add_edge("explode", "downstream")
        .build();

    let record = engine
        .orchestrator
        .execute(&workflow, json!({}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Failed);
    assert!(record.error.unwrap().contains("explode"));
    assert_node_status(&engine.store, &record.id, "explode", NodeStatus::Failed).await;
    // Downstream never dispatched.
    assert_eq!(after_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn continue_on_failure_skips_dependents_and_keeps_siblings() {
    let boom = Arc::new(TestHandler::new("boom", Behavior::FailFatal));
    let after = Arc::new(TestHandler::new("after", Behavior::Succeed));
    let side = Arc::new(TestHandler::new("side", Behavior::Succeed));
    let side_calls = side.calls.clone();
    let engine = engine_with(vec![("boom", boom), ("after", after), ("side", side)]);

    let workflow = WorkflowBuilder::new("absorbed")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("explode", probe_config("boom"))
        .failure_policy(FailurePolicy::Continue)
        .add_block("dependent", probe_config("after"))
        .add_block("sibling", probe_config("side"))
        .add_edge("start", "explode")
        .add_edge("start", "sibling")
        .add_edge("explode", "dependent")
        .build();

    let record = engine
        .orchestrator
        .execute(&workflow, json!({}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_node_status(&engine.store, &record.id, "explode", NodeStatus::Failed).await;
    assert_node_status(&engine.store, &record.id, "dependent", NodeStatus::Skipped).await;
    assert_node_status(&engine.store, &record.id, "sibling", NodeStatus::Completed).await;
    assert_eq!(side_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn execution_output_merges_leaf_values() {
    let work = Arc::new(TestHandler::new("work", Behavior::Succeed));
    let engine = engine_with(vec![("work", work)]);

    let record = engine
        .orchestrator
        .execute(&linear_workflow("work"), json!({"price": 9}))
        .await
        .unwrap();

    let output = record.output.expect("final output");
    assert_eq!(output["ok"], json!(true));
    assert_eq!(output["node"], json!("work"));
    // Inputs flowed from the trigger through the edge spread.
    assert_eq!(output["echo"]["price"], json!(9));
}

#[tokio::test]
async fn node_timings_are_recorded() {
    let work = Arc::new(TestHandler::new("work", Behavior::Sleep { millis: 20 }));
    let engine = engine_with(vec![("work", work)]);

    let record = engine
        .orchestrator
        .execute(&linear_workflow("work"), json!({}))
        .await
        .unwrap();

    let node = engine
        .store
        .node_execution(&record.id, "work")
        .await
        .unwrap()
        .unwrap();
    assert!(node.started_at.is_some());
    assert!(node.finished_at.is_some());
    assert!(node.duration_ms.unwrap_or(0) >= 10);
}
