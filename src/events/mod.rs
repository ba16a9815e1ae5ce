//! Engine event publication: typed state-change events, a fan-out bus, and
//! pluggable sinks.
//!
//! The orchestrator publishes execution/node status changes and log lines to
//! an [`EventBus`]; subscribers (notification push, admin API) consume
//! independently, decoupling orchestration speed from delivery speed.
//! Delivery is at-least-once with a monotonic `seq` for deduplication.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter};
pub use event::{EngineEvent, EventPayload};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
