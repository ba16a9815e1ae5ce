//! Core identifier and status types for the flowline execution engine.
//!
//! These are the domain concepts shared by every layer: what a block *is*
//! ([`BlockKind`]), and the lifecycle states of executions and node
//! executions. Runtime infrastructure types live in [`crate::runtime`];
//! persisted record shapes live in [`crate::store`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one run of a workflow.
pub type ExecutionId = String;
/// Identifier of a node within a workflow graph.
pub type NodeId = String;
/// Identifier of a workflow definition.
pub type WorkflowId = String;
/// Identifier of an external resource guarded by a circuit breaker
/// (an HTTP host, a mail relay, a chain RPC endpoint).
pub type ResourceId = String;

/// Identifies the type of a block within a workflow graph.
///
/// Block kinds name the executable behavior of a node. The built-in kinds
/// cover the catalog shipped with the engine; [`Custom`](Self::Custom)
/// carries user-registered extensions.
///
/// # Persistence
///
/// `BlockKind` supports serde for workflow JSON and the
/// [`encode`](Self::encode)/[`decode`](Self::decode) pair for flat string
/// columns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Entry block that forwards the triggering payload into the graph.
    Trigger,
    /// Branching block that routes execution along a true/false handle.
    Condition,
    /// HTTP request action.
    HttpRequest,
    /// Email notification action.
    Email,
    /// On-chain transaction action tracked by the transaction ledger.
    ChainTransaction,
    /// Delegated AI-agent action.
    Agent,
    /// User-registered block type identified by a unique string.
    Custom(String),
}

impl BlockKind {
    /// Encode a block kind into its persisted string form.
    ///
    /// - `Trigger` → `"trigger"`, `Condition` → `"condition"`, ...
    /// - `Custom("x")` → `"custom:x"`
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            BlockKind::Trigger => "trigger".to_string(),
            BlockKind::Condition => "condition".to_string(),
            BlockKind::HttpRequest => "http_request".to_string(),
            BlockKind::Email => "email".to_string(),
            BlockKind::ChainTransaction => "chain_transaction".to_string(),
            BlockKind::Agent => "agent".to_string(),
            BlockKind::Custom(s) => format!("custom:{s}"),
        }
    }

    /// Decode a persisted string form back into a [`BlockKind`].
    ///
    /// Unrecognized strings round-trip as `Custom(s)` for forward
    /// compatibility with catalogs newer than this binary.
    pub fn decode(s: &str) -> Self {
        match s {
            "trigger" => BlockKind::Trigger,
            "condition" => BlockKind::Condition,
            "http_request" => BlockKind::HttpRequest,
            "email" => BlockKind::Email,
            "chain_transaction" => BlockKind::ChainTransaction,
            "agent" => BlockKind::Agent,
            other => match other.strip_prefix("custom:") {
                Some(rest) => BlockKind::Custom(rest.to_string()),
                None => BlockKind::Custom(other.to_string()),
            },
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl From<&str> for BlockKind {
    fn from(s: &str) -> Self {
        BlockKind::decode(s)
    }
}

/// Lifecycle of one execution of a workflow.
///
/// `Pending -> Running -> {Completed, Failed, Paused, Cancelled}`, with
/// `Paused -> Running` on resume. Terminal once the status leaves
/// {Pending, Running, Paused}.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses never transition again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    /// Decode a persisted status string; unknown strings map to `Failed`
    /// so a corrupted row surfaces as a visible failure, not a livelock.
    pub fn decode(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "paused" => Self::Paused,
            "cancelled" => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Lifecycle of one node's run within one execution.
///
/// `Skipped` is terminal and success-like: the node's branch was not taken
/// (or an upstream failure was absorbed by a continue-on-failure policy),
/// and downstream joins count it as resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    Skipped,
}

impl NodeStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Resolved states unblock downstream edges. A paused node is not
    /// resolved: its dependents wait for the resume to produce output.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.is_terminal()
    }

    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Skipped => "skipped",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "paused" => Self::Paused,
            "skipped" => Self::Skipped,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Severity of an execution or node log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "info" => Self::Info,
            "warn" => Self::Warn,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
