//! Assertion helpers over stored execution state.

use flowline::store::{ExecutionStore, MemoryStore};
use flowline::types::{ExecutionStatus, NodeStatus};

pub async fn assert_execution_status(
    store: &MemoryStore,
    execution_id: &str,
    expected: ExecutionStatus,
) {
    let record = store.execution(execution_id).await.expect("execution");
    assert_eq!(
        record.status, expected,
        "execution {execution_id} status {:?}, expected {expected:?} (error: {:?})",
        record.status, record.error
    );
}

pub async fn assert_node_status(
    store: &MemoryStore,
    execution_id: &str,
    node_id: &str,
    expected: NodeStatus,
) {
    let record = store
        .node_execution(execution_id, node_id)
        .await
        .expect("store")
        .unwrap_or_else(|| panic!("node execution {execution_id}/{node_id} missing"));
    assert_eq!(
        record.status, expected,
        "node {node_id} status {:?}, expected {expected:?} (error: {:?})",
        record.status, record.error
    );
}
