//! Single-node dispatch: the claim winner's path through the retry policy
//! and the handler, with heartbeats, timeout, and result recording.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::blocks::{
    BlockRegistry, HandlerContext, HandlerError, HandlerOutcome, InputMap, PauseRequest,
};
use crate::events::{EventEmitter, EventPayload};
use crate::graph::NodeSpec;
use crate::policy::DispatchPolicy;
use crate::store::{ExecutionStore, LogRecord, PauseSnapshot};
use crate::types::{LogLevel, NodeId, NodeStatus};

/// How a finished node dispatch affects the execution.
#[derive(Clone, Debug)]
pub(crate) enum Disposition {
    Completed,
    Paused,
    Failed {
        /// Whether the failure escalates to the execution (vs. a
        /// continue-on-failure node whose dependents skip-propagate).
        propagate: bool,
        error: String,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct NodeTaskResult {
    pub node_id: NodeId,
    pub disposition: Disposition,
}

/// Everything a spawned node task needs, cloned out of the orchestrator so
/// tasks own their context.
#[derive(Clone)]
pub(crate) struct NodeDispatcher {
    pub store: Arc<dyn ExecutionStore>,
    pub registry: Arc<BlockRegistry>,
    pub policy: DispatchPolicy,
    pub emitter: EventEmitter,
    pub heartbeat_interval: Duration,
    pub default_node_timeout: Duration,
}

impl NodeDispatcher {
    /// Dispatch one claimed node to its handler. The caller has already won
    /// the store claim; this records the input snapshot, emits heartbeats
    /// while the handler runs, and records the terminal or paused result.
    #[instrument(skip(self, node, inputs, cancel), fields(execution = %execution_id, node = %node.id))]
    pub async fn dispatch(
        &self,
        execution_id: &str,
        node: NodeSpec,
        inputs: InputMap,
        cancel: CancellationToken,
        prior_retries: u32,
    ) -> NodeTaskResult {
        let node_id = node.id.clone();
        let disposition = self
            .dispatch_inner(execution_id, &node, inputs, cancel, prior_retries)
            .await;
        NodeTaskResult {
            node_id,
            disposition,
        }
    }

    async fn dispatch_inner(
        &self,
        execution_id: &str,
        node: &NodeSpec,
        inputs: InputMap,
        cancel: CancellationToken,
        prior_retries: u32,
    ) -> Disposition {
        let input_value = Value::Object(
            inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        if let Err(e) = self
            .store
            .record_node_input(execution_id, &node.id, input_value.clone())
            .await
        {
            return self
                .fail(execution_id, node, prior_retries, e.to_string(), true)
                .await;
        }
        let _ = self.emitter.emit(EventPayload::NodeStatus {
            execution_id: execution_id.to_string(),
            node_id: node.id.clone(),
            status: NodeStatus::Running,
            attempt: prior_retries + 1,
        });

        let handler = match self.registry.resolve(&node.block) {
            Ok(handler) => handler,
            // Validation guarantees resolution; a miss here means the
            // catalog changed under a stored execution.
            Err(e) => {
                return self
                    .fail(execution_id, node, prior_retries, e.to_string(), true)
                    .await;
            }
        };

        let heartbeat = {
            let store = self.store.clone();
            let execution_id = execution_id.to_string();
            let node_id = node.id.clone();
            let interval = self.heartbeat_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    if let Err(e) = store.heartbeat_node(&execution_id, &node_id).await {
                        tracing::warn!(
                            execution = %execution_id,
                            node = %node_id,
                            error = %e,
                            "heartbeat write failed"
                        );
                    }
                }
            })
        };

        let resource_id = handler.resource_id(&node.config);
        let retry_budget = node.failure_policy.retry_budget();
        let node_timeout = node
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_node_timeout);

        let report = self
            .policy
            .dispatch(&resource_id, retry_budget, |attempt| {
                let handler = handler.clone();
                let config = node.config.clone();
                let inputs = inputs.clone();
                let cancel = cancel.clone();
                let ctx = HandlerContext::new(
                    execution_id.to_string(),
                    node.id.clone(),
                    attempt,
                    cancel.clone(),
                    self.store.clone(),
                    self.emitter.clone(),
                );
                async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(HandlerError::Cancelled),
                        result = tokio::time::timeout(
                            node_timeout,
                            handler.execute(&config, &inputs, &ctx),
                        ) => match result {
                            // A node exceeding its timeout is a retryable
                            // failure.
                            Err(_) => Err(HandlerError::retryable(format!(
                                "node timed out after {node_timeout:?}"
                            ))),
                            Ok(inner) => inner,
                        },
                    }
                }
            })
            .await;
        heartbeat.abort();

        let retry_count = prior_retries + report.attempts.saturating_sub(1);
        match report.outcome {
            Ok(HandlerOutcome::Output(output)) => {
                if let Err(e) = self
                    .store
                    .record_node_result(
                        execution_id,
                        &node.id,
                        NodeStatus::Completed,
                        Some(output),
                        None,
                        retry_count,
                    )
                    .await
                {
                    return self
                        .fail(execution_id, node, retry_count, e.to_string(), true)
                        .await;
                }
                let _ = self.emitter.emit(EventPayload::NodeStatus {
                    execution_id: execution_id.to_string(),
                    node_id: node.id.clone(),
                    status: NodeStatus::Completed,
                    attempt: retry_count + 1,
                });
                Disposition::Completed
            }
            Ok(HandlerOutcome::Pause(request)) => {
                self.record_pause(execution_id, node, input_value, request, retry_count)
                    .await
            }
            Err(e) => {
                let propagate = !node.failure_policy.continues_on_failure();
                self.fail(execution_id, node, retry_count, e.to_string(), propagate)
                    .await
            }
        }
    }

    /// Persist the snapshot before marking the node paused, so a resume can
    /// never observe a paused node without its pending input.
    async fn record_pause(
        &self,
        execution_id: &str,
        node: &NodeSpec,
        dispatched_input: Value,
        request: PauseRequest,
        retry_count: u32,
    ) -> Disposition {
        let pending_input = merge_json(dispatched_input, request.pending_input.clone());
        let snapshot = PauseSnapshot {
            execution_id: execution_id.to_string(),
            node_id: node.id.clone(),
            pending_input,
            reason: request.reason.clone(),
            wait_key: request.wait_key.clone(),
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.save_pause_snapshot(snapshot).await {
            return self
                .fail(execution_id, node, retry_count, e.to_string(), true)
                .await;
        }
        if let Err(e) = self
            .store
            .record_node_result(
                execution_id,
                &node.id,
                NodeStatus::Paused,
                None,
                None,
                retry_count,
            )
            .await
        {
            return self
                .fail(execution_id, node, retry_count, e.to_string(), true)
                .await;
        }
        let _ = self.emitter.emit(EventPayload::NodeStatus {
            execution_id: execution_id.to_string(),
            node_id: node.id.clone(),
            status: NodeStatus::Paused,
            attempt: retry_count + 1,
        });
        let _ = self
            .store
            .append_log(LogRecord::node(
                execution_id,
                &node.id,
                LogLevel::Info,
                format!("paused: {}", request.reason),
            ))
            .await;
        Disposition::Paused
    }

    async fn fail(
        &self,
        execution_id: &str,
        node: &NodeSpec,
        retry_count: u32,
        error: String,
        propagate: bool,
    ) -> Disposition {
        if let Err(e) = self
            .store
            .record_node_result(
                execution_id,
                &node.id,
                NodeStatus::Failed,
                None,
                Some(error.clone()),
                retry_count,
            )
            .await
        {
            tracing::error!(
                execution = %execution_id,
                node = %node.id,
                error = %e,
                "failed to record node failure"
            );
        }
        let _ = self.emitter.emit(EventPayload::NodeStatus {
            execution_id: execution_id.to_string(),
            node_id: node.id.clone(),
            status: NodeStatus::Failed,
            attempt: retry_count + 1,
        });
        let _ = self
            .store
            .append_log(LogRecord::node(
                execution_id,
                &node.id,
                LogLevel::Error,
                error.clone(),
            ))
            .await;
        Disposition::Failed { propagate, error }
    }
}

/// Merge `overlay` into `base`. Objects merge key-wise with overlay keys
/// winning; anything else is replaced by a non-null overlay.
pub(crate) fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                base_map.insert(key, value);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}
