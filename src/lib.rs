//! # Flowline: Workflow Execution Engine
//!
//! Flowline executes directed acyclic graphs of typed blocks (triggers,
//! conditions, HTTP calls, emails, blockchain transactions, AI agents)
//! against external services, with durable per-node state, retries behind
//! per-resource circuit breakers, pause/resume at arbitrary nodes, and a
//! sub-ledger for on-chain transaction lifecycles.
//!
//! ## Core Concepts
//!
//! - **Blocks**: Typed units of work resolved through the [`blocks`]
//!   registry; all side effects live inside block handlers
//! - **Workflows**: Immutable node/edge definitions validated into an
//!   executable form by [`graph`]
//! - **Executions**: One run per trigger firing, persisted through the
//!   [`store`] boundary so a restarted orchestrator resumes from rows alone
//! - **Orchestrator**: The [`runtime`] state machine walking ready nodes
//!   through claim, policy-wrapped dispatch, and completion
//! - **Events**: Monotonically sequenced status/log notifications fanned
//!   out by the [`events`] bus
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use flowline::blocks::{BlockConfig, BlockRegistry, CompareOp, ConditionConfig, TriggerConfig};
//! use flowline::graph::WorkflowBuilder;
//! use flowline::runtime::{EngineConfig, Orchestrator};
//! use flowline::store::MemoryStore;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(BlockRegistry::builder().build());
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::new(registry, store, EngineConfig::default());
//!
//! let workflow = WorkflowBuilder::new("price-alert")
//!     .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
//!     .add_block(
//!         "check",
//!         BlockConfig::Condition(ConditionConfig {
//!             input: "price".into(),
//!             op: CompareOp::Gt,
//!             value: json!(100),
//!         }),
//!     )
//!     .add_edge("start", "check")
//!     .build();
//!
//! let record = orchestrator
//!     .execute(&workflow, json!({"price": 150}))
//!     .await?;
//! println!("finished: {}", record.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] - Block kinds, execution/node statuses, identifiers
//! - [`graph`] - Workflow model, builder, and validator
//! - [`blocks`] - Handler trait, built-in blocks, capability seams, registry
//! - [`store`] - Persistence boundary: memory and sqlite backends
//! - [`policy`] - Retry/backoff and circuit-breaker dispatch wrapper
//! - [`chain`] - Blockchain transaction tracker
//! - [`runtime`] - Orchestrator, engine config, crash recovery
//! - [`events`] - Event bus, sinks, sequenced engine events
//! - [`telemetry`] - Event formatting and tracing setup

pub mod blocks;
pub mod chain;
pub mod events;
pub mod graph;
pub mod policy;
pub mod runtime;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod util;
