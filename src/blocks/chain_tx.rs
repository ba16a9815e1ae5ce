//! Chain-transaction block.
//!
//! First dispatch submits through the [`TxTracker`] and pauses the node
//! keyed to the transaction hash; an external confirmation poller resumes
//! the node, whose re-dispatch polls the receipt and completes or fails.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::config::BlockConfig;
use super::handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput, PauseRequest,
};
use crate::chain::{ChainRpcError, TxError, TxRequest, TxTracker};
use crate::store::{AttemptStatus, TxStatus};
use crate::types::{BlockKind, ResourceId};

pub struct ChainTxHandler {
    tracker: TxTracker,
}

impl ChainTxHandler {
    pub fn new(tracker: TxTracker) -> Self {
        Self { tracker }
    }

    fn map_tx_error(e: TxError) -> HandlerError {
        match e {
            TxError::Rpc(rpc) if rpc.is_retryable() => HandlerError::retryable(rpc.to_string()),
            TxError::Rpc(ChainRpcError::Rejected { message }) => HandlerError::fatal(message),
            other => HandlerError::fatal(other.to_string()),
        }
    }

    async fn finish_confirmed(&self, tx_id: &str) -> Result<HandlerOutcome, HandlerError> {
        let attempts = self
            .tracker
            .attempts(tx_id)
            .await
            .map_err(Self::map_tx_error)?;
        let confirmed = attempts
            .iter()
            .rev()
            .find(|a| a.status == AttemptStatus::Confirmed);
        let mut output = NodeOutput::new().with_value("tx_id", json!(tx_id));
        if let Some(attempt) = confirmed {
            output = output
                .with_value("tx_hash", json!(attempt.tx_hash))
                .with_value("block_number", json!(attempt.block_number))
                .with_value("gas_used", json!(attempt.gas_used));
        }
        Ok(HandlerOutcome::Output(output))
    }
}

#[async_trait]
impl BlockHandler for ChainTxHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: BlockKind::ChainTransaction,
            required_inputs: &[],
            outputs: &["tx_id", "tx_hash", "block_number", "gas_used"],
        }
    }

    /// One breaker per chain: a dead RPC endpoint for chain 1 should not
    /// gate transactions on chain 137.
    fn resource_id(&self, config: &BlockConfig) -> ResourceId {
        match config {
            BlockConfig::ChainTransaction(chain) => format!("chain:{}", chain.chain_id),
            _ => "chain".to_string(),
        }
    }

    async fn execute(
        &self,
        config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let BlockConfig::ChainTransaction(config) = config else {
            return Err(HandlerError::fatal(
                "chain transaction block got mismatched config",
            ));
        };

        // Resume path: the pause snapshot injected the tracked tx id.
        if let Some(tx_id) = inputs.get("tx_id").and_then(Value::as_str) {
            let status = self
                .tracker
                .poll_confirmation(tx_id)
                .await
                .map_err(Self::map_tx_error)?;
            return match status {
                TxStatus::Confirmed => {
                    ctx.info(format!("transaction {tx_id} confirmed")).await;
                    self.finish_confirmed(tx_id).await
                }
                TxStatus::Failed => Err(HandlerError::fatal(format!(
                    "transaction {tx_id} failed on chain"
                ))),
                // Still unmined: park again until the poller fires next.
                TxStatus::Submitted | TxStatus::Pending => {
                    Ok(HandlerOutcome::Pause(PauseRequest {
                        reason: "awaiting transaction confirmation".to_string(),
                        pending_input: json!({ "tx_id": tx_id }),
                        wait_key: Some(tx_id.to_string()),
                    }))
                }
            };
        }

        // First dispatch: broadcast and park awaiting confirmation.
        let value: u128 = if config.value.is_empty() {
            0
        } else {
            config
                .value
                .parse()
                .map_err(|_| HandlerError::fatal(format!("bad value {:?}", config.value)))?
        };
        let gas_price: u128 = config
            .gas_price
            .parse()
            .map_err(|_| HandlerError::fatal(format!("bad gas price {:?}", config.gas_price)))?;

        let request = TxRequest {
            chain_id: config.chain_id,
            to: config.to.clone(),
            value,
            gas_limit: config.gas_limit,
            gas_price,
            data: config.data.clone(),
        };
        let record = self
            .tracker
            .submit(&ctx.execution_id, &ctx.node_id, request)
            .await
            .map_err(Self::map_tx_error)?;
        ctx.info(format!(
            "transaction {} submitted to chain {}",
            record.id, record.chain_id
        ))
        .await;

        let wait_key = self
            .tracker
            .attempts(&record.id)
            .await
            .map_err(Self::map_tx_error)?
            .last()
            .map(|a| a.tx_hash.clone());
        Ok(HandlerOutcome::Pause(PauseRequest {
            reason: "awaiting transaction confirmation".to_string(),
            pending_input: json!({ "tx_id": record.id }),
            wait_key,
        }))
    }
}
