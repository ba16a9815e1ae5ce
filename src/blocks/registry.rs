//! Block registry: maps block kinds to executable handlers.
//!
//! Populated once at process start from the built-in catalog plus whatever
//! capabilities the embedding service injects. Unknown block kinds fail
//! graph validation before an execution record exists, never at dispatch
//! time.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::capabilities::{AgentBackend, Mailer};
use super::condition::ConditionHandler;
use super::handler::BlockHandler;
use super::trigger::TriggerHandler;
use crate::chain::TxTracker;
use crate::types::BlockKind;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("unknown block type: {kind}")]
    #[diagnostic(
        code(flowline::registry::unknown_block),
        help("Register a handler for this kind, or enable the capability that provides it.")
    )]
    UnknownBlock { kind: String },
}

/// Immutable handler catalog, shared across the orchestrator.
pub struct BlockRegistry {
    handlers: FxHashMap<BlockKind, Arc<dyn BlockHandler>>,
}

impl BlockRegistry {
    #[must_use]
    pub fn builder() -> BlockRegistryBuilder {
        BlockRegistryBuilder::new()
    }

    /// Resolve a block kind to its handler.
    pub fn resolve(&self, kind: &BlockKind) -> Result<Arc<dyn BlockHandler>, RegistryError> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownBlock {
                kind: kind.encode(),
            })
    }

    #[must_use]
    pub fn contains(&self, kind: &BlockKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, for diagnostics.
    pub fn kinds(&self) -> impl Iterator<Item = &BlockKind> {
        self.handlers.keys()
    }
}

/// Builder assembling the catalog: built-in blocks always, capability-
/// backed blocks only when their capability is injected.
pub struct BlockRegistryBuilder {
    handlers: FxHashMap<BlockKind, Arc<dyn BlockHandler>>,
}

impl Default for BlockRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        let mut handlers: FxHashMap<BlockKind, Arc<dyn BlockHandler>> = FxHashMap::default();
        handlers.insert(BlockKind::Trigger, Arc::new(TriggerHandler));
        handlers.insert(BlockKind::Condition, Arc::new(ConditionHandler));
        #[cfg(feature = "http")]
        handlers.insert(
            BlockKind::HttpRequest,
            Arc::new(super::http::HttpHandler::default()),
        );
        Self { handlers }
    }

    /// Enable email blocks with the given delivery capability.
    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.handlers.insert(
            BlockKind::Email,
            Arc::new(super::email::EmailHandler::new(mailer)),
        );
        self
    }

    /// Enable agent blocks with the given completion capability.
    #[must_use]
    pub fn with_agent_backend(mut self, backend: Arc<dyn AgentBackend>) -> Self {
        self.handlers.insert(
            BlockKind::Agent,
            Arc::new(super::agent::AgentHandler::new(backend)),
        );
        self
    }

    /// Enable chain-transaction blocks with the given tracker.
    #[must_use]
    pub fn with_chain_tracker(mut self, tracker: TxTracker) -> Self {
        self.handlers.insert(
            BlockKind::ChainTransaction,
            Arc::new(super::chain_tx::ChainTxHandler::new(tracker)),
        );
        self
    }

    /// Register (or replace) a handler under an explicit kind. The seam for
    /// adding block types without touching the orchestrator.
    #[must_use]
    pub fn register(mut self, kind: BlockKind, handler: Arc<dyn BlockHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    #[must_use]
    pub fn build(self) -> BlockRegistry {
        BlockRegistry {
            handlers: self.handlers,
        }
    }
}
