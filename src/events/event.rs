use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ExecutionStatus, LogLevel, NodeStatus};

/// A state-change notification published by the engine.
///
/// `seq` is assigned by the emitting bus and is strictly monotonic per bus,
/// so at-least-once subscribers can deduplicate and order events.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineEvent {
    pub seq: u64,
    pub when: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// What changed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    ExecutionStatus {
        execution_id: String,
        status: ExecutionStatus,
    },
    NodeStatus {
        execution_id: String,
        node_id: String,
        status: NodeStatus,
        attempt: u32,
    },
    Log {
        execution_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        level: LogLevel,
        message: String,
    },
}

impl EngineEvent {
    /// The execution this event belongs to.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        match &self.payload {
            EventPayload::ExecutionStatus { execution_id, .. }
            | EventPayload::NodeStatus { execution_id, .. }
            | EventPayload::Log { execution_id, .. } => execution_id,
        }
    }

    /// Convert to a normalized JSON object for wire delivery.
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::ExecutionStatus {
                execution_id,
                status,
            } => write!(f, "#{} [{execution_id}] execution {status}", self.seq),
            EventPayload::NodeStatus {
                execution_id,
                node_id,
                status,
                attempt,
            } => write!(
                f,
                "#{} [{execution_id}/{node_id}] node {status} (attempt {attempt})",
                self.seq
            ),
            EventPayload::Log {
                execution_id,
                node_id,
                level,
                message,
            } => match node_id {
                Some(node) => write!(
                    f,
                    "#{} [{execution_id}/{node}] {level}: {message}",
                    self.seq
                ),
                None => write!(f, "#{} [{execution_id}] {level}: {message}", self.seq),
            },
        }
    }
}
