//! Circuit-breaker state machine.
//!
//! The transition rules live here as pure functions over a
//! [`BreakerRecord`]; store backends apply them inside their own atomic
//! update (mutex section or SQL transaction), so concurrent dispatches
//! across executions never read-modify-write breaker state at the
//! application layer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ResourceId;

/// Breaker position for one external resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally.
    #[default]
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// One trial call is in flight; its outcome decides the next state.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn encode(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    pub fn decode(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "half_open" => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Breaker tuning knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures within the rolling window that trip the
    /// breaker open.
    pub failure_threshold: u32,
    /// Rolling window for the failure count; a failure older than this
    /// restarts the count.
    pub window: Duration,
    /// How long an open breaker fails fast before granting a probe.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::seconds(60),
            cooldown: Duration::seconds(30),
        }
    }
}

/// Persisted breaker state for one resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerRecord {
    pub resource_id: ResourceId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub probe_started_at: Option<DateTime<Utc>>,
}

impl BreakerRecord {
    pub fn closed(resource_id: impl Into<ResourceId>) -> Self {
        Self {
            resource_id: resource_id.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
            probe_started_at: None,
        }
    }
}

/// Apply a call failure. Closed breakers count toward the threshold inside
/// the rolling window; a failed half-open probe reopens immediately.
#[must_use]
pub fn apply_failure(
    mut record: BreakerRecord,
    config: &BreakerConfig,
    now: DateTime<Utc>,
) -> BreakerRecord {
    let window_expired = record
        .last_failure_at
        .is_some_and(|last| now - last > config.window);
    record.failure_count = if window_expired {
        1
    } else {
        record.failure_count + 1
    };
    record.last_failure_at = Some(now);

    match record.state {
        CircuitState::Closed => {
            if record.failure_count >= config.failure_threshold {
                record.state = CircuitState::Open;
                record.opened_at = Some(now);
            }
        }
        CircuitState::HalfOpen => {
            record.state = CircuitState::Open;
            record.opened_at = Some(now);
            record.probe_started_at = None;
        }
        CircuitState::Open => {}
    }
    record
}

/// Apply a call success: closes and resets whatever state the breaker was
/// in.
#[must_use]
pub fn apply_success(mut record: BreakerRecord, now: DateTime<Utc>) -> BreakerRecord {
    record.state = CircuitState::Closed;
    record.failure_count = 0;
    record.success_count += 1;
    record.last_success_at = Some(now);
    record.opened_at = None;
    record.probe_started_at = None;
    record
}

/// Whether an open breaker's cooldown has elapsed, making it eligible for a
/// half-open probe.
#[must_use]
pub fn probe_eligible(record: &BreakerRecord, config: &BreakerConfig, now: DateTime<Utc>) -> bool {
    record.state == CircuitState::Open
        && record
            .opened_at
            .is_none_or(|opened| now - opened >= config.cooldown)
}

/// Transition an eligible open breaker to half-open, claiming the single
/// probe slot. Returns `None` when no probe should be granted.
#[must_use]
pub fn begin_probe(
    record: &BreakerRecord,
    config: &BreakerConfig,
    now: DateTime<Utc>,
) -> Option<BreakerRecord> {
    if !probe_eligible(record, config, now) {
        return None;
    }
    let mut next = record.clone();
    next.state = CircuitState::HalfOpen;
    next.probe_started_at = Some(now);
    Some(next)
}
