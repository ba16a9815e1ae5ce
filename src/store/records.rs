//! Persisted record shapes.
//!
//! Explicit serde-friendly structs decoupled from in-memory runtime state,
//! so any storage backend round-trips the same shapes. The load-bearing
//! relationships: execution 1–N node-execution, node-execution 1–N log,
//! node-execution 0–1 pause snapshot, node-execution 0–N transaction, each
//! transaction 1–N attempts.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blocks::NodeOutput;
use crate::graph::Workflow;
use crate::types::{ExecutionId, ExecutionStatus, LogLevel, NodeId, NodeStatus};

/// One run of a workflow, created before any dispatch and mutated only by
/// the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub workflow_id: String,
    pub workflow_version: u32,
    /// Full definition snapshot, so a restarted orchestrator can resume
    /// without the authoring layer.
    pub workflow: Workflow,
    pub status: ExecutionStatus,
    pub trigger: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// The record of one node's run within one execution. Exactly one exists
/// per (execution, node) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub input: Option<Value>,
    pub output: Option<NodeOutput>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Liveness stamp while the node runs; a stale stamp marks the claim
    /// abandoned and re-claimable.
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl NodeExecutionRecord {
    pub fn pending(execution_id: impl Into<ExecutionId>, node_id: impl Into<NodeId>) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            status: NodeStatus::Pending,
            input: None,
            output: None,
            error: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            heartbeat_at: None,
        }
    }
}

/// Append-only, leveled log line tied to an execution or a specific node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub execution_id: ExecutionId,
    pub node_id: Option<NodeId>,
    pub level: LogLevel,
    pub message: String,
    pub when: DateTime<Utc>,
}

impl LogRecord {
    pub fn execution(
        execution_id: impl Into<ExecutionId>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: None,
            level,
            message: message.into(),
            when: Utc::now(),
        }
    }

    pub fn node(
        execution_id: impl Into<ExecutionId>,
        node_id: impl Into<NodeId>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            node_id: Some(node_id.into()),
            level,
            message: message.into(),
            when: Utc::now(),
        }
    }
}

/// The exact input a paused node was waiting on, keyed by
/// (execution, node). Consumed and cleared on resume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PauseSnapshot {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub pending_input: Value,
    pub reason: String,
    pub wait_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an on-chain transaction owned by a node execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl TxStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "submitted" => Self::Submitted,
            "confirmed" => Self::Confirmed,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encode())
    }
}

/// Lifecycle of one broadcast attempt. `Superseded` marks an attempt
/// replaced by a gas-bumped resubmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Submitted,
    Confirmed,
    Failed,
    Superseded,
}

impl AttemptStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Submitted)
    }

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "submitted" => Self::Submitted,
            "confirmed" => Self::Confirmed,
            "superseded" => Self::Superseded,
            _ => Self::Failed,
        }
    }
}

/// A transaction record: one intended on-chain operation. Resubmissions
/// add attempts to the same record, never a second record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub chain_id: u64,
    pub to: String,
    /// Decimal string in the chain's base unit.
    pub value: String,
    pub gas_limit: u64,
    /// Calldata, hex-encoded; preserved so gas-bumped resubmissions
    /// rebroadcast the same payload.
    pub data: Option<String>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One broadcast of a transaction. Invariant: at most one attempt per
/// transaction is non-terminal at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionAttempt {
    pub transaction_id: String,
    /// 1-based, ordered by submission.
    pub attempt_no: u32,
    pub tx_hash: String,
    /// Decimal string; bumped on resubmission.
    pub gas_price: String,
    pub status: AttemptStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
}
