use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;

use super::event::{EngineEvent, EventPayload};

/// Cloneable handle for publishing events onto a bus.
///
/// The emitter stamps each payload with the bus's monotonic sequence number
/// and the emission time, then hands it to the bus channel. Sequence
/// assignment and the channel send happen under one short lock, so events
/// arrive at sinks in sequence order even when emitters race.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    seq: Arc<AtomicU64>,
    send_order: Arc<Mutex<()>>,
    tx: flume::Sender<EngineEvent>,
}

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus closed")]
    Closed,
}

impl EventEmitter {
    pub(super) fn new(
        seq: Arc<AtomicU64>,
        send_order: Arc<Mutex<()>>,
        tx: flume::Sender<EngineEvent>,
    ) -> Self {
        Self {
            seq,
            send_order,
            tx,
        }
    }

    /// Stamp and publish a payload. Returns the assigned sequence number.
    pub fn emit(&self, payload: EventPayload) -> Result<u64, EmitterError> {
        let guard = self.send_order.lock().expect("emitter order poisoned");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = EngineEvent {
            seq,
            when: Utc::now(),
            payload,
        };
        let result = self.tx.send(event).map_err(|_| EmitterError::Closed);
        drop(guard);
        result?;
        Ok(seq)
    }
}
