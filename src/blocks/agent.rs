//! AI-agent block, delegating completion to the [`AgentBackend`]
//! capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::capabilities::{AgentBackend, AgentError};
use super::config::BlockConfig;
use super::email::render_template;
use super::handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput,
};
use crate::types::BlockKind;

pub struct AgentHandler {
    backend: Arc<dyn AgentBackend>,
}

impl AgentHandler {
    pub fn new(backend: Arc<dyn AgentBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BlockHandler for AgentHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: BlockKind::Agent,
            required_inputs: &[],
            outputs: &["completion"],
        }
    }

    async fn execute(
        &self,
        config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let BlockConfig::Agent(config) = config else {
            return Err(HandlerError::fatal("agent block got mismatched config"));
        };
        let prompt = render_template(&config.prompt, inputs);
        ctx.info("dispatching agent completion").await;

        match self
            .backend
            .complete(&prompt, config.model.as_deref())
            .await
        {
            Ok(completion) => Ok(HandlerOutcome::Output(
                NodeOutput::new().with_value("completion", json!(completion)),
            )),
            Err(e @ AgentError::Unavailable(_)) => Err(HandlerError::retryable(e.to_string())),
            Err(e) => Err(HandlerError::fatal(e.to_string())),
        }
    }
}
