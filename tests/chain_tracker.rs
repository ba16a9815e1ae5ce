mod common;

use std::sync::Arc;

use serde_json::json;

use common::{engine_from_builder_with_store, MockChain};
use flowline::blocks::{BlockConfig, BlockRegistry, ChainTxConfig, TriggerConfig};
use flowline::chain::{TxError, TxRequest, TxTracker};
use flowline::graph::WorkflowBuilder;
use flowline::store::{AttemptStatus, ExecutionStore, MemoryStore, TxStatus};
use flowline::types::{ExecutionStatus, NodeStatus};

fn request() -> TxRequest {
    TxRequest {
        chain_id: 1,
        to: "0xabc".to_string(),
        value: 1_000_000_000,
        gas_limit: 21_000,
        gas_price: 1_000,
        data: None,
    }
}

fn tracker() -> (TxTracker, MockChain, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let chain = MockChain::new();
    let tracker = TxTracker::new(store.clone(), Arc::new(chain.clone()));
    (tracker, chain, store)
}

#[tokio::test]
async fn submit_broadcasts_and_records_first_attempt() {
    let (tracker, chain, _store) = tracker();

    let record = tracker.submit("exec_1", "pay", request()).await.unwrap();
    assert_eq!(record.status, TxStatus::Submitted);
    assert_eq!(chain.broadcast_count(), 1);

    let attempts = tracker.attempts(&record.id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_no, 1);
    assert_eq!(attempts[0].status, AttemptStatus::Submitted);
    assert_eq!(attempts[0].gas_price, "1000");
}

#[tokio::test]
async fn poll_resolves_confirmation() {
    let (tracker, chain, _store) = tracker();
    let record = tracker.submit("exec_1", "pay", request()).await.unwrap();

    // Unmined: still submitted.
    assert_eq!(
        tracker.poll_confirmation(&record.id).await.unwrap(),
        TxStatus::Submitted
    );

    chain.mine(&chain.last_hash(), 1234, true);
    assert_eq!(
        tracker.poll_confirmation(&record.id).await.unwrap(),
        TxStatus::Confirmed
    );
    let attempts = tracker.attempts(&record.id).await.unwrap();
    assert_eq!(attempts[0].status, AttemptStatus::Confirmed);
    assert_eq!(attempts[0].block_number, Some(1234));

    // Idempotent on a terminal record.
    assert_eq!(
        tracker.poll_confirmation(&record.id).await.unwrap(),
        TxStatus::Confirmed
    );
}

#[tokio::test]
async fn reverted_receipt_fails_the_transaction() {
    let (tracker, chain, _store) = tracker();
    let record = tracker.submit("exec_1", "pay", request()).await.unwrap();
    chain.mine(&chain.last_hash(), 99, false);
    assert_eq!(
        tracker.poll_confirmation(&record.id).await.unwrap(),
        TxStatus::Failed
    );
}

#[tokio::test]
async fn gas_bumped_resubmission_adds_attempt_on_same_record() {
    let (tracker, chain, store) = tracker();
    let record = tracker.submit("exec_1", "pay", request()).await.unwrap();

    // First broadcast sits unmined; bump gas by 20%.
    let attempt = tracker
        .resubmit_with_bumped_gas(&record.id, 20)
        .await
        .unwrap();
    assert_eq!(attempt.attempt_no, 2);
    assert_eq!(attempt.gas_price, "1200");

    // The replacement mines; the dropped first attempt stays superseded.
    chain.mine(&chain.last_hash(), 555, true);
    assert_eq!(
        tracker.poll_confirmation(&record.id).await.unwrap(),
        TxStatus::Confirmed
    );

    let attempts = tracker.attempts(&record.id).await.unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].status, AttemptStatus::Superseded);
    assert_eq!(attempts[1].status, AttemptStatus::Confirmed);

    // One transaction record, terminal confirmed.
    let stored = store.transactions_for_node("exec_1", "pay").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, TxStatus::Confirmed);

    // At most one non-terminal attempt existed at any point; now zero.
    assert!(attempts.iter().all(|a| a.status.is_terminal()));
}

#[tokio::test]
async fn resubmit_on_terminal_transaction_is_rejected() {
    let (tracker, chain, _store) = tracker();
    let record = tracker.submit("exec_1", "pay", request()).await.unwrap();
    chain.mine(&chain.last_hash(), 1, true);
    tracker.poll_confirmation(&record.id).await.unwrap();

    let err = tracker
        .resubmit_with_bumped_gas(&record.id, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, TxError::InvalidState { .. }));
}

#[tokio::test]
async fn failed_broadcast_terminates_the_record() {
    let (tracker, chain, _store) = tracker();
    chain.fail_next_broadcasts(1);
    let err = tracker.submit("exec_1", "pay", request()).await.unwrap_err();
    assert!(matches!(err, TxError::Rpc(_)));
}

#[tokio::test]
async fn chain_block_pauses_until_confirmation_then_completes() {
    // The tracker and the engine share one store, so transaction rows sit
    // beside the node executions that own them.
    let chain = MockChain::new();
    let store = Arc::new(MemoryStore::new());
    let tracker = TxTracker::new(store.clone(), Arc::new(chain.clone()));
    let builder = BlockRegistry::builder().with_chain_tracker(tracker);
    let engine = engine_from_builder_with_store(builder, store);

    let workflow = WorkflowBuilder::new("payout")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block(
            "pay",
            BlockConfig::ChainTransaction(ChainTxConfig {
                chain_id: 1,
                to: "0xdef".to_string(),
                value: "5000".to_string(),
                gas_limit: 21_000,
                gas_price: "900".to_string(),
                data: None,
            }),
        )
        .add_edge("start", "pay")
        .build();

    let record = engine
        .orchestrator
        .execute(&workflow, json!({}))
        .await
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Paused);

    let node = engine
        .store
        .node_execution(&record.id, "pay")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.status, NodeStatus::Paused);
    let snapshot = engine
        .store
        .load_pause_snapshot(&record.id, "pay")
        .await
        .unwrap()
        .expect("snapshot");
    assert_eq!(snapshot.wait_key.as_deref(), Some("0xhash1"));
    let tx_id = snapshot.pending_input["tx_id"]
        .as_str()
        .expect("tx id in pending input")
        .to_string();

    // External poller sees the confirmation and resumes the node.
    chain.mine("0xhash1", 777, true);
    let record = engine
        .orchestrator
        .resume(&record.id, "pay", json!({}))
        .await
        .unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let output = record.output.expect("output");
    assert_eq!(output["tx_id"], json!(tx_id));
    assert_eq!(output["tx_hash"], json!("0xhash1"));
    assert_eq!(output["block_number"], json!(777));
}
