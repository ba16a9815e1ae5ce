//! Dispatch wrapper: bounded retry with backoff behind a per-resource
//! circuit breaker.

use std::future::Future;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use super::breaker::{BreakerConfig, CircuitState};
use super::retry::{backoff_delay, RetryConfig};
use crate::blocks::{HandlerError, HandlerOutcome};
use crate::store::{ExecutionStore, StoreError};
use crate::types::ResourceId;

/// Errors surfaced by the dispatch wrapper.
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    /// The breaker for this resource is open: the call was never made and
    /// no retry budget was consumed.
    #[error("circuit open for resource {resource_id}")]
    #[diagnostic(
        code(flowline::policy::circuit_open),
        help("The resource has been failing; calls resume after the cooldown elapses.")
    )]
    CircuitOpen { resource_id: ResourceId },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Handler(HandlerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a policy-wrapped dispatch, carrying how many handler calls
/// were actually made.
#[derive(Debug)]
pub struct DispatchReport {
    /// Handler invocations performed (0 when the breaker fast-failed).
    pub attempts: u32,
    pub outcome: Result<HandlerOutcome, DispatchError>,
}

/// Wraps node dispatch with retry/backoff and the circuit breaker.
///
/// Breaker state lives in the [`ExecutionStore`] and is updated through its
/// atomic operations, so concurrent dispatches across executions and across
/// orchestrator processes share one view of a failing resource.
#[derive(Clone)]
pub struct DispatchPolicy {
    store: Arc<dyn ExecutionStore>,
    retry: RetryConfig,
    breaker: BreakerConfig,
}

impl DispatchPolicy {
    pub fn new(store: Arc<dyn ExecutionStore>, retry: RetryConfig, breaker: BreakerConfig) -> Self {
        Self {
            store,
            retry,
            breaker,
        }
    }

    #[must_use]
    pub fn breaker_config(&self) -> &BreakerConfig {
        &self.breaker
    }

    /// Run `op` against `resource_id` with up to `retry_budget` retries.
    ///
    /// Each attempt is preflighted against the breaker: an open breaker
    /// fails fast without invoking `op` or consuming budget; an open
    /// breaker whose cooldown elapsed claims the single half-open probe
    /// slot and the call becomes the probe. Retryable failures count
    /// against both the budget and the breaker; fatal failures and
    /// cancellation propagate immediately without consuming budget.
    #[instrument(skip(self, op), fields(resource = %resource_id))]
    pub async fn dispatch<F, Fut>(
        &self,
        resource_id: &str,
        retry_budget: u32,
        op: F,
    ) -> DispatchReport
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<HandlerOutcome, HandlerError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if let Err(e) = self.preflight(resource_id).await {
                return DispatchReport {
                    attempts: attempt - 1,
                    outcome: Err(e),
                };
            }

            match op(attempt).await {
                Ok(outcome) => {
                    if let Err(e) = self.store.breaker_on_success(resource_id).await {
                        tracing::warn!(resource = %resource_id, error = %e, "breaker success update failed");
                    }
                    return DispatchReport {
                        attempts: attempt,
                        outcome: Ok(outcome),
                    };
                }
                Err(e) if e.is_retryable() => {
                    if let Err(se) = self
                        .store
                        .breaker_on_failure(resource_id, &self.breaker)
                        .await
                    {
                        tracing::warn!(resource = %resource_id, error = %se, "breaker failure update failed");
                    }
                    if attempt > retry_budget {
                        return DispatchReport {
                            attempts: attempt,
                            outcome: Err(DispatchError::Handler(e)),
                        };
                    }
                    let delay = backoff_delay(&self.retry, attempt);
                    tracing::debug!(
                        resource = %resource_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    // Fatal or cancelled: propagate without consuming
                    // budget or counting against the breaker.
                    return DispatchReport {
                        attempts: attempt,
                        outcome: Err(DispatchError::Handler(e)),
                    };
                }
            }
        }
    }

    async fn preflight(&self, resource_id: &str) -> Result<(), DispatchError> {
        let record = self.store.breaker_record(resource_id).await?;
        match record.state {
            CircuitState::Closed => Ok(()),
            // Another caller holds the probe slot.
            CircuitState::HalfOpen => Err(DispatchError::CircuitOpen {
                resource_id: resource_id.to_string(),
            }),
            CircuitState::Open => {
                if self
                    .store
                    .breaker_try_probe(resource_id, &self.breaker)
                    .await?
                {
                    Ok(())
                } else {
                    Err(DispatchError::CircuitOpen {
                        resource_id: resource_id.to_string(),
                    })
                }
            }
        }
    }
}
