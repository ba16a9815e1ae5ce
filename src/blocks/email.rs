//! Email block, delegating delivery to the [`Mailer`] capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::capabilities::{Mailer, MailerError};
use super::config::BlockConfig;
use super::handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput,
};
use crate::types::BlockKind;

/// Fill `{{name}}` placeholders in `template` from the input map.
/// Unmatched placeholders are left as-is.
pub(super) fn render_template(template: &str, inputs: &InputMap) -> String {
    let mut rendered = template.to_string();
    for (key, value) in inputs {
        let needle = format!("{{{{{key}}}}}");
        if rendered.contains(&needle) {
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&needle, &replacement);
        }
    }
    rendered
}

pub struct EmailHandler {
    mailer: Arc<dyn Mailer>,
}

impl EmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl BlockHandler for EmailHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: BlockKind::Email,
            required_inputs: &[],
            outputs: &["sent"],
        }
    }

    async fn execute(
        &self,
        config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let BlockConfig::Email(config) = config else {
            return Err(HandlerError::fatal("email block got mismatched config"));
        };
        let subject = render_template(&config.subject, inputs);
        let body = render_template(&config.body, inputs);
        ctx.info(format!("sending email to {}", config.to)).await;

        match self.mailer.send(&config.to, &subject, &body).await {
            Ok(()) => Ok(HandlerOutcome::Output(
                NodeOutput::new().with_value("sent", json!(true)),
            )),
            Err(e @ MailerError::Transport(_)) => Err(HandlerError::retryable(e.to_string())),
            Err(e) => Err(HandlerError::fatal(e.to_string())),
        }
    }
}
