//! Fluent construction of workflow definitions.
//!
//! Production workflows arrive as JSON from the authoring layer; the
//! builder exists for tests, demos, and embedded use.

use serde_json::Value;

use super::model::{EdgeSpec, FailurePolicy, NodeSpec, Workflow};
use crate::blocks::BlockConfig;

/// Builder for [`Workflow`] definitions.
///
/// # Examples
///
/// ```
/// use flowline::blocks::{BlockConfig, CompareOp, ConditionConfig, TriggerConfig};
/// use flowline::graph::WorkflowBuilder;
/// use serde_json::json;
///
/// let workflow = WorkflowBuilder::new("price-alert")
///     .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
///     .add_block(
///         "check",
///         BlockConfig::Condition(ConditionConfig {
///             input: "price".into(),
///             op: CompareOp::Gt,
///             value: json!(100),
///         }),
///     )
///     .add_edge("start", "check")
///     .build();
/// assert_eq!(workflow.nodes.len(), 2);
/// ```
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            workflow: Workflow {
                id: id.into(),
                version: 1,
                owner: None,
                nodes: Vec::new(),
                edges: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.workflow.version = version;
        self
    }

    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.workflow.owner = Some(owner.into());
        self
    }

    /// Add a node with default policy and timeout.
    #[must_use]
    pub fn add_block(self, id: impl Into<String>, config: BlockConfig) -> Self {
        self.add_node(NodeSpec::new(id, config))
    }

    /// Add a fully specified node.
    #[must_use]
    pub fn add_node(mut self, node: NodeSpec) -> Self {
        self.workflow.nodes.push(node);
        self
    }

    /// Set the failure policy of the most recently added node.
    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.failure_policy = policy;
        }
        self
    }

    /// Set the timeout of the most recently added node.
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.timeout_ms = Some(timeout_ms);
        }
        self
    }

    /// Add an input default to the most recently added node.
    #[must_use]
    pub fn input_default(mut self, input: impl Into<String>, value: Value) -> Self {
        if let Some(node) = self.workflow.nodes.last_mut() {
            node.input_defaults.insert(input.into(), value);
        }
        self
    }

    /// Add a plain edge.
    #[must_use]
    pub fn add_edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.workflow.edges.push(EdgeSpec::new(source, target));
        self
    }

    /// Add an edge with source/target handles.
    #[must_use]
    pub fn add_edge_spec(mut self, edge: EdgeSpec) -> Self {
        self.workflow.edges.push(edge);
        self
    }

    /// Convenience for condition branches: an edge along the `"true"` or
    /// `"false"` handle.
    #[must_use]
    pub fn add_branch(
        mut self,
        source: impl Into<String>,
        branch: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.workflow
            .edges
            .push(EdgeSpec::new(source, target).with_source_handle(branch));
        self
    }

    #[must_use]
    pub fn build(self) -> Workflow {
        self.workflow
    }
}
