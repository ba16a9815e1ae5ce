//! Workflow graphs: the definition model, a construction builder, and the
//! validator that compiles a definition into an executable form.

pub mod builder;
pub mod model;
pub mod validate;

pub use builder::WorkflowBuilder;
pub use model::{EdgeSpec, FailurePolicy, NodeSpec, Workflow};
pub use validate::{validate, ValidatedWorkflow, ValidationError};
