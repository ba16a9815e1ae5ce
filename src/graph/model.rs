//! Workflow definition model: nodes, edges, and failure policies.
//!
//! A [`Workflow`] is the immutable-per-version artifact the authoring layer
//! persists; the engine treats it as input and never mutates it. Everything
//! here is serde round-trippable because workflows arrive as JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::blocks::BlockConfig;
use crate::types::{BlockKind, NodeId, WorkflowId};

/// What happens when a node exhausts its attempts and fails.
///
/// Resolved once at validation time; the dispatcher never re-interprets
/// ad-hoc config flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Node failure fails the whole execution.
    #[default]
    Propagate,
    /// Record the failure, skip-propagate to dependents, keep sibling
    /// branches running.
    Continue,
    /// Grant the node this many retries for retryable errors, then
    /// propagate.
    Retry { attempts: u32 },
}

impl FailurePolicy {
    /// Number of retries granted beyond the first attempt.
    #[must_use]
    pub fn retry_budget(&self) -> u32 {
        match self {
            Self::Retry { attempts } => *attempts,
            Self::Propagate | Self::Continue => 0,
        }
    }

    /// Whether a terminal failure of this node is absorbed locally.
    #[must_use]
    pub fn continues_on_failure(&self) -> bool {
        matches!(self, Self::Continue)
    }
}

/// One node of a workflow graph: a placed, configured block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub block: BlockKind,
    pub config: BlockConfig,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Per-node execution timeout in milliseconds; engine default applies
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Defaults for declared inputs not fed by an incoming edge.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub input_defaults: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, config: BlockConfig) -> Self {
        let block = config.kind();
        Self {
            id: id.into(),
            block,
            config,
            failure_policy: FailurePolicy::default(),
            timeout_ms: None,
            input_defaults: Map::new(),
        }
    }
}

/// A directed connection from a source node's output handle to a target
/// node's input handle.
///
/// `source_handle` selects a named output (for condition nodes, the branch:
/// `"true"` / `"false"`); `target_handle` names the input the delivered
/// value binds to on the target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub source: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl EdgeSpec {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            source_handle: None,
            target: target.into(),
            target_handle: None,
        }
    }

    #[must_use]
    pub fn with_source_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    #[must_use]
    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }
}

/// A versioned workflow definition: the node/edge graph the engine executes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

impl Workflow {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Edges arriving at `id`.
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &EdgeSpec> + '_ {
        let id = id.to_owned();
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Edges leaving `id`.
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &EdgeSpec> + '_ {
        let id = id.to_owned();
        self.edges.iter().filter(move |e| e.source == id)
    }
}
