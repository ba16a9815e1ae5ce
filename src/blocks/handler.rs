//! Block handler execution framework.
//!
//! This module provides the core abstractions for executable blocks: the
//! [`BlockHandler`] trait, the execution context handed to handlers, the
//! outcome/pause control flow, and the handler error taxonomy.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{EventEmitter, EventPayload};
use crate::store::{ExecutionStore, LogRecord};
use crate::types::{BlockKind, ExecutionId, LogLevel, NodeId, ResourceId};

/// Resolved inputs delivered to a handler, keyed by input name.
pub type InputMap = FxHashMap<String, Value>;

/// Static description of a block's contract, used by the validator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub kind: BlockKind,
    /// Input names that must be satisfied by an incoming edge or a config
    /// default before the workflow validates.
    pub required_inputs: &'static [&'static str],
    /// Output value names this block produces on completion.
    pub outputs: &'static [&'static str],
}

/// The values a completed node produced, plus the branch it routed along
/// (condition blocks only).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub values: FxHashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

/// A handler's request to suspend its node until external data arrives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Why the node is waiting (shown in the admin surface).
    pub reason: String,
    /// The input the node was dispatched with, preserved for the resume.
    pub pending_input: Value,
    /// Correlation key for the external waker (e.g. a transaction hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_key: Option<String>,
}

/// Result of a successful handler call: either produced output, or a
/// request to pause awaiting external input. A pause is control flow, not
/// an error.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerOutcome {
    Output(NodeOutput),
    Pause(PauseRequest),
}

/// Errors a block handler can fail with.
///
/// Handlers declare retryability: `Retryable` failures (network, timeout,
/// 5xx) are retried per the node's policy; `Fatal` failures (validation,
/// auth, 4xx) propagate immediately without consuming retry budget.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    #[error("retryable: {message}")]
    #[diagnostic(code(flowline::handler::retryable))]
    Retryable { message: String },

    #[error("{message}")]
    #[diagnostic(code(flowline::handler::fatal))]
    Fatal { message: String },

    /// The execution was cancelled while the handler ran.
    #[error("handler cancelled")]
    #[diagnostic(code(flowline::handler::cancelled))]
    Cancelled,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

/// Execution context passed to handlers during dispatch.
///
/// Carries identity (execution, node, attempt), the cancellation token
/// handlers are expected to observe across I/O, and the logging seam
/// (durable log row + bus event per line).
#[derive(Clone)]
pub struct HandlerContext {
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    /// 1-based attempt number, incremented per retry.
    pub attempt: u32,
    pub cancel: CancellationToken,
    store: Arc<dyn ExecutionStore>,
    emitter: EventEmitter,
}

impl HandlerContext {
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        attempt: u32,
        cancel: CancellationToken,
        store: Arc<dyn ExecutionStore>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            attempt,
            cancel,
            store,
            emitter,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append a node-scoped log line: durable row first, then bus event.
    ///
    /// Logging never fails the handler; persistence errors are traced and
    /// swallowed.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        let record = LogRecord::node(&self.execution_id, &self.node_id, level, message.clone());
        if let Err(e) = self.store.append_log(record).await {
            tracing::warn!(
                execution = %self.execution_id,
                node = %self.node_id,
                error = %e,
                "failed to persist node log"
            );
        }
        let _ = self.emitter.emit(EventPayload::Log {
            execution_id: self.execution_id.clone(),
            node_id: Some(self.node_id.clone()),
            level,
            message,
        });
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await;
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("execution_id", &self.execution_id)
            .field("node_id", &self.node_id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Core trait defining an executable block.
///
/// Handlers are stateless with respect to executions: all per-dispatch data
/// arrives via `config`, `inputs`, and `ctx`. Side effects (HTTP, email,
/// chain RPC) live entirely inside handlers; the orchestrator never
/// inspects them.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// This block's static contract.
    fn descriptor(&self) -> BlockDescriptor;

    /// The circuit-breaker resource this dispatch counts against.
    ///
    /// Defaults to the block kind; handlers calling per-config endpoints
    /// (HTTP hosts, chain RPCs) override with a finer key.
    fn resource_id(&self, _config: &crate::blocks::BlockConfig) -> ResourceId {
        self.descriptor().kind.encode()
    }

    /// Execute this block with resolved inputs and context.
    async fn execute(
        &self,
        config: &crate::blocks::BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError>;
}
