//! Blocks: typed units of work and the registry that resolves them.
//!
//! A block couples a [`BlockDescriptor`] (static contract the validator
//! checks) with a [`BlockHandler`] (the executable). All side effects live
//! inside handlers, behind capability traits where external infrastructure
//! is involved; the orchestrator only sees [`HandlerOutcome`]s.

pub mod agent;
pub mod capabilities;
pub mod chain_tx;
pub mod condition;
pub mod config;
pub mod email;
pub mod handler;
#[cfg(feature = "http")]
pub mod http;
pub mod registry;
pub mod trigger;

pub use agent::AgentHandler;
pub use capabilities::{AgentBackend, AgentError, Mailer, MailerError};
pub use chain_tx::ChainTxHandler;
pub use condition::ConditionHandler;
pub use config::{
    AgentConfig, BlockConfig, ChainTxConfig, CompareOp, ConditionConfig, EmailConfig, HttpConfig,
    TriggerConfig,
};
pub use email::EmailHandler;
pub use handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput, PauseRequest,
};
#[cfg(feature = "http")]
pub use http::HttpHandler;
pub use registry::{BlockRegistry, BlockRegistryBuilder, RegistryError};
pub use trigger::TriggerHandler;
