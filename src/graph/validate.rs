//! Workflow validation and compilation into an executable form.
//!
//! Runs once before an execution is created; a failed validation never
//! produces an execution record. Beyond structural checks (duplicates,
//! dangling edges, cycles via Kahn's algorithm), validation resolves each
//! node against the block registry so unknown kinds and mismatched configs
//! fail here rather than at dispatch time.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use thiserror::Error;

use super::model::{EdgeSpec, NodeSpec, Workflow};
use crate::blocks::BlockRegistry;
use crate::types::{BlockKind, NodeId};

/// Why a workflow failed validation.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("workflow has no nodes")]
    #[diagnostic(code(flowline::validate::empty))]
    EmptyWorkflow,

    #[error("duplicate node id: {node_id}")]
    #[diagnostic(code(flowline::validate::duplicate_node))]
    DuplicateNode { node_id: NodeId },

    #[error("node {node_id} uses unknown block type {kind}")]
    #[diagnostic(
        code(flowline::validate::unknown_block),
        help("Register the block type before validating workflows that use it.")
    )]
    UnknownBlock { node_id: NodeId, kind: String },

    #[error("node {node_id} declares block {declared} but its config is for {actual}")]
    #[diagnostic(code(flowline::validate::config_mismatch))]
    ConfigMismatch {
        node_id: NodeId,
        declared: String,
        actual: String,
    },

    #[error("edge references missing node: {source_id} -> {target}")]
    #[diagnostic(code(flowline::validate::dangling_edge))]
    DanglingEdge { source_id: NodeId, target: NodeId },

    #[error("condition node {node_id} has edge with unsupported handle {handle:?}")]
    #[diagnostic(
        code(flowline::validate::unknown_handle),
        help("Condition branches are \"true\" and \"false\".")
    )]
    UnknownHandle { node_id: NodeId, handle: String },

    #[error("workflow contains a cycle")]
    #[diagnostic(
        code(flowline::validate::cycle),
        help("Executions require a DAG; remove the back edge.")
    )]
    CycleDetected,

    #[error("node {node_id} is missing required input {input:?}")]
    #[diagnostic(
        code(flowline::validate::missing_input),
        help("Feed the input with an incoming edge handle or a config default.")
    )]
    MissingRequiredInput { node_id: NodeId, input: String },
}

/// A workflow that passed validation, with the indexes the scheduler needs:
/// topological order, per-node edge lists, and entry nodes.
#[derive(Clone, Debug)]
pub struct ValidatedWorkflow {
    workflow: Workflow,
    topo_order: Vec<NodeId>,
    incoming: FxHashMap<NodeId, Vec<EdgeSpec>>,
    outgoing: FxHashMap<NodeId, Vec<EdgeSpec>>,
    entry_nodes: Vec<NodeId>,
}

impl ValidatedWorkflow {
    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Nodes in a valid execution order (dependencies first).
    #[must_use]
    pub fn topo_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    /// Nodes without incoming edges; dispatched first with the trigger
    /// payload.
    #[must_use]
    pub fn entry_nodes(&self) -> &[NodeId] {
        &self.entry_nodes
    }

    #[must_use]
    pub fn incoming(&self, node_id: &str) -> &[EdgeSpec] {
        self.incoming.get(node_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn outgoing(&self, node_id: &str) -> &[EdgeSpec] {
        self.outgoing.get(node_id).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.workflow.node(node_id)
    }
}

/// Validate a workflow against a registry and compile the scheduler
/// indexes.
pub fn validate(
    workflow: &Workflow,
    registry: &BlockRegistry,
) -> Result<ValidatedWorkflow, ValidationError> {
    if workflow.nodes.is_empty() {
        return Err(ValidationError::EmptyWorkflow);
    }

    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNode {
                node_id: node.id.clone(),
            });
        }
        if node.config.kind() != node.block {
            return Err(ValidationError::ConfigMismatch {
                node_id: node.id.clone(),
                declared: node.block.encode(),
                actual: node.config.kind().encode(),
            });
        }
        if !registry.contains(&node.block) {
            return Err(ValidationError::UnknownBlock {
                node_id: node.id.clone(),
                kind: node.block.encode(),
            });
        }
    }

    let mut incoming: FxHashMap<NodeId, Vec<EdgeSpec>> = FxHashMap::default();
    let mut outgoing: FxHashMap<NodeId, Vec<EdgeSpec>> = FxHashMap::default();
    for edge in &workflow.edges {
        let source = workflow.node(&edge.source);
        if source.is_none() || workflow.node(&edge.target).is_none() {
            return Err(ValidationError::DanglingEdge {
                source_id: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
        // Condition branches are the only constrained handles. A condition
        // with one branch unconnected is legal: the untaken side skips.
        if let Some(source) = source {
            if source.block == BlockKind::Condition {
                match edge.source_handle.as_deref() {
                    None | Some("true") | Some("false") => {}
                    Some(other) => {
                        return Err(ValidationError::UnknownHandle {
                            node_id: source.id.clone(),
                            handle: other.to_string(),
                        })
                    }
                }
            }
        }
        outgoing
            .entry(edge.source.clone())
            .or_default()
            .push(edge.clone());
        incoming
            .entry(edge.target.clone())
            .or_default()
            .push(edge.clone());
    }

    // Kahn's algorithm; producing fewer nodes than the input means a cycle.
    let mut in_degree: FxHashMap<&str, usize> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), 0))
        .collect();
    for edge in &workflow.edges {
        *in_degree.get_mut(edge.target.as_str()).expect("checked") += 1;
    }
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .filter(|n| in_degree[n.id.as_str()] == 0)
        .map(|n| n.id.as_str())
        .collect();
    let entry_nodes: Vec<NodeId> = queue.iter().map(|s| (*s).to_string()).collect();

    let mut topo_order: Vec<NodeId> = Vec::with_capacity(workflow.nodes.len());
    while let Some(node_id) = queue.pop_front() {
        topo_order.push(node_id.to_string());
        if let Some(edges) = outgoing.get(node_id) {
            for edge in edges {
                let degree = in_degree.get_mut(edge.target.as_str()).expect("checked");
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
    }
    if topo_order.len() < workflow.nodes.len() {
        return Err(ValidationError::CycleDetected);
    }

    // Required inputs must arrive by edge handle or config default.
    for node in &workflow.nodes {
        let handler = registry
            .resolve(&node.block)
            .map_err(|_| ValidationError::UnknownBlock {
                node_id: node.id.clone(),
                kind: node.block.encode(),
            })?;
        let incoming_handles: FxHashSet<&str> = incoming
            .get(&node.id)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|e| e.target_handle.as_deref())
                    .collect()
            })
            .unwrap_or_default();
        for required in handler.descriptor().required_inputs {
            let satisfied = incoming_handles.contains(required)
                || node.input_defaults.contains_key(*required);
            if !satisfied {
                return Err(ValidationError::MissingRequiredInput {
                    node_id: node.id.clone(),
                    input: (*required).to_string(),
                });
            }
        }
    }

    Ok(ValidatedWorkflow {
        workflow: workflow.clone(),
        topo_order,
        incoming,
        outgoing,
        entry_nodes,
    })
}
