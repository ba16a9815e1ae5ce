//! Execution state persistence.
//!
//! [`ExecutionStore`] is the only component allowed to touch storage. The
//! orchestrator depends on a handful of atomic operations for correctness:
//! the node claim (at-most-one concurrent dispatch per node per execution,
//! including crash-recovered re-claims) and the circuit-breaker updates
//! (compare-and-swap at the store layer, shared across executions).
//!
//! All writes are durable before the orchestrator proceeds to dependent
//! nodes; a restarted orchestrator resumes any running or paused execution
//! from stored rows alone.

pub mod memory;
pub mod records;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "sqlite")]
mod sqlite_helpers;

pub use memory::MemoryStore;
pub use records::{
    AttemptStatus, ExecutionRecord, LogRecord, NodeExecutionRecord, PauseSnapshot,
    TransactionAttempt, TransactionRecord, TxStatus,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::Duration;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::blocks::NodeOutput;
use crate::graph::Workflow;
use crate::policy::{BreakerConfig, BreakerRecord};
use crate::types::{ExecutionStatus, NodeStatus};

/// Storage-layer errors.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{what} not found: {id}")]
    #[diagnostic(code(flowline::store::not_found))]
    NotFound { what: &'static str, id: String },

    #[error("conflicting write: {message}")]
    #[diagnostic(
        code(flowline::store::conflict),
        help("Another orchestrator instance may own this row; retry after reloading.")
    )]
    Conflict { message: String },

    #[error("storage backend error: {message}")]
    #[diagnostic(code(flowline::store::backend))]
    Backend { message: String },

    #[error(transparent)]
    #[diagnostic(code(flowline::store::serde))]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence boundary for execution state.
///
/// Pure CRUD plus the atomic operations the orchestrator's correctness
/// rests on. Implementations must make every write durable before
/// returning.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    // ---- executions ----

    /// Create an execution from a validated workflow snapshot and trigger
    /// payload. The returned record starts `Pending`.
    async fn create_execution(&self, workflow: &Workflow, trigger: Value)
        -> Result<ExecutionRecord>;

    async fn execution(&self, execution_id: &str) -> Result<ExecutionRecord>;

    /// Transition an execution's status, stamping `started_at` on the first
    /// move to `Running` and `finished_at` on terminal statuses.
    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<()>;

    /// Record the final output or error of an execution.
    async fn set_execution_result(
        &self,
        execution_id: &str,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<()>;

    /// All executions currently in `status` (crash-recovery scan).
    async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionRecord>>;

    // ---- node executions ----

    /// Idempotently create the (execution, node) row in `Pending`.
    async fn create_node_execution(&self, execution_id: &str, node_id: &str) -> Result<()>;

    async fn node_execution(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeExecutionRecord>>;

    async fn node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecutionRecord>>;

    /// Atomic compare-and-set from {`Pending` | `Running` with a heartbeat
    /// older than `heartbeat_timeout`} to `Running`. Returns whether this
    /// caller won the claim; only the winner dispatches.
    async fn try_claim_node(
        &self,
        execution_id: &str,
        node_id: &str,
        heartbeat_timeout: Duration,
    ) -> Result<bool>;

    /// Refresh the liveness stamp of a running node.
    async fn heartbeat_node(&self, execution_id: &str, node_id: &str) -> Result<()>;

    /// Persist the resolved input snapshot the node is dispatched with.
    async fn record_node_input(
        &self,
        execution_id: &str,
        node_id: &str,
        input: Value,
    ) -> Result<()>;

    /// Record a dispatch outcome, stamping `finished_at`/`duration_ms` for
    /// terminal statuses.
    async fn record_node_result(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        output: Option<NodeOutput>,
        error: Option<String>,
        retry_count: u32,
    ) -> Result<()>;

    /// Put a failed node back to `Pending` for an administrative retry,
    /// clearing its error and terminal stamps.
    async fn reset_node_for_retry(&self, execution_id: &str, node_id: &str) -> Result<()>;

    // ---- logs ----

    async fn append_log(&self, log: LogRecord) -> Result<()>;

    /// Logs for an execution, optionally narrowed to one node, in append
    /// order.
    async fn logs(&self, execution_id: &str, node_id: Option<&str>) -> Result<Vec<LogRecord>>;

    // ---- pause snapshots ----

    async fn save_pause_snapshot(&self, snapshot: PauseSnapshot) -> Result<()>;

    async fn load_pause_snapshot(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<PauseSnapshot>>;

    async fn clear_pause_snapshot(&self, execution_id: &str, node_id: &str) -> Result<()>;

    // ---- blockchain transaction sub-ledger ----

    async fn create_transaction(&self, tx: TransactionRecord) -> Result<()>;

    async fn transaction(&self, tx_id: &str) -> Result<TransactionRecord>;

    async fn transactions_for_node(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Vec<TransactionRecord>>;

    async fn update_transaction_status(&self, tx_id: &str, status: TxStatus) -> Result<()>;

    async fn add_transaction_attempt(&self, attempt: TransactionAttempt) -> Result<()>;

    /// Attempts for a transaction ordered by `attempt_no`.
    async fn transaction_attempts(&self, tx_id: &str) -> Result<Vec<TransactionAttempt>>;

    async fn update_attempt_status(
        &self,
        tx_id: &str,
        attempt_no: u32,
        status: AttemptStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
        error: Option<String>,
    ) -> Result<()>;

    // ---- circuit breakers ----

    /// Current breaker state for a resource (a closed default when the
    /// resource has never been seen).
    async fn breaker_record(&self, resource_id: &str) -> Result<BreakerRecord>;

    /// Atomically apply a call success.
    async fn breaker_on_success(&self, resource_id: &str) -> Result<BreakerRecord>;

    /// Atomically apply a call failure, tripping the breaker when the
    /// threshold is crossed.
    async fn breaker_on_failure(
        &self,
        resource_id: &str,
        config: &BreakerConfig,
    ) -> Result<BreakerRecord>;

    /// Atomically claim the single half-open probe slot of an open breaker
    /// whose cooldown elapsed. Returns whether this caller may probe.
    async fn breaker_try_probe(&self, resource_id: &str, config: &BreakerConfig) -> Result<bool>;
}
