//! Condition block: compares one input against a constant and routes along
//! the `"true"` or `"false"` handle.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::config::{BlockConfig, CompareOp};
use super::handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput,
};
use crate::types::BlockKind;

#[derive(Debug, Default)]
pub struct ConditionHandler;

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, HandlerError> {
    let result = match op {
        CompareOp::Eq => left == right,
        CompareOp::Ne => left != right,
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            let (l, r) = match (as_number(left), as_number(right)) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(HandlerError::fatal(format!(
                        "ordered comparison needs numbers, got {left} and {right}"
                    )))
                }
            };
            match op {
                CompareOp::Gt => l > r,
                CompareOp::Gte => l >= r,
                CompareOp::Lt => l < r,
                CompareOp::Lte => l <= r,
                _ => unreachable!(),
            }
        }
        CompareOp::Contains => match (left, right) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => {
                return Err(HandlerError::fatal(format!(
                    "contains needs a string or array on the left, got {left}"
                )))
            }
        },
    };
    Ok(result)
}

#[async_trait]
impl BlockHandler for ConditionHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: BlockKind::Condition,
            required_inputs: &[],
            outputs: &["result"],
        }
    }

    async fn execute(
        &self,
        config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let BlockConfig::Condition(config) = config else {
            return Err(HandlerError::fatal("condition block got mismatched config"));
        };
        let left = inputs.get(&config.input).ok_or_else(|| {
            HandlerError::fatal(format!("condition input {:?} not provided", config.input))
        })?;
        let result = compare(left, config.op, &config.value)?;
        let branch = if result { "true" } else { "false" };
        ctx.info(format!(
            "condition {} {:?} {} -> {branch}",
            config.input, config.op, config.value
        ))
        .await;
        Ok(HandlerOutcome::Output(
            NodeOutput::new()
                .with_value("result", json!(result))
                .with_branch(branch),
        ))
    }
}
