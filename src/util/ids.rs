//! Identifier generation for executions and transaction records.

use uuid::Uuid;

/// Generates prefixed, collision-free identifiers for persisted records.
///
/// Prefixes keep mixed id columns greppable in logs and database dumps.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Id for one execution of a workflow, e.g. `exec_6f9a...`.
    #[must_use]
    pub fn execution_id(&self) -> String {
        format!("exec_{}", Uuid::new_v4().simple())
    }

    /// Id for a blockchain transaction record, e.g. `tx_b04c...`.
    #[must_use]
    pub fn transaction_id(&self) -> String {
        format!("tx_{}", Uuid::new_v4().simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let generator = IdGenerator::new();
        let a = generator.execution_id();
        let b = generator.execution_id();
        assert!(a.starts_with("exec_"));
        assert_ne!(a, b);
        assert!(generator.transaction_id().starts_with("tx_"));
    }
}
