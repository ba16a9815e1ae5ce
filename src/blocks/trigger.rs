//! Trigger block: forwards the triggering payload into the graph.

use async_trait::async_trait;
use serde_json::Value;

use super::config::BlockConfig;
use super::handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput,
};
use crate::types::BlockKind;

/// Entry block. The orchestrator injects the execution's trigger payload
/// as the `trigger` input; this handler republishes it as the `payload`
/// output, and spreads object payloads field-by-field so downstream blocks
/// can reference them by name.
#[derive(Debug, Default)]
pub struct TriggerHandler;

#[async_trait]
impl BlockHandler for TriggerHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: BlockKind::Trigger,
            required_inputs: &[],
            outputs: &["payload"],
        }
    }

    async fn execute(
        &self,
        config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let BlockConfig::Trigger(config) = config else {
            return Err(HandlerError::fatal("trigger block got mismatched config"));
        };
        let payload = inputs
            .get("trigger")
            .cloned()
            .or_else(|| config.default_payload.clone())
            .unwrap_or(Value::Null);
        ctx.info("trigger fired").await;
        let mut output = NodeOutput::new();
        if let Value::Object(fields) = &payload {
            for (key, value) in fields {
                output = output.with_value(key.clone(), value.clone());
            }
        }
        Ok(HandlerOutcome::Output(output.with_value("payload", payload)))
    }
}
