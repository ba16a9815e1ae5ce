//! Retry and circuit-breaker policy wrapping node dispatch.
//!
//! [`DispatchPolicy`] is the single entry point: it preflights the
//! per-resource breaker, invokes the handler, and applies bounded retry
//! with exponential backoff + jitter for failures the handler declared
//! retryable. Breaker transitions are pure functions in [`breaker`],
//! applied atomically at the store layer.

pub mod breaker;
pub mod dispatch;
pub mod retry;

pub use breaker::{
    apply_failure, apply_success, begin_probe, probe_eligible, BreakerConfig, BreakerRecord,
    CircuitState,
};
pub use dispatch::{DispatchError, DispatchPolicy, DispatchReport};
pub use retry::{backoff_delay, RetryConfig};
