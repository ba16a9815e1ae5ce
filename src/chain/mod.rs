//! Blockchain transaction lifecycle tracking.
//!
//! A specialized sub-ledger for on-chain operations owned by node
//! executions: submission, confirmation polling, and gas-bumped
//! resubmission of stuck transactions. Broadcasting and receipt lookup go
//! through the [`ChainRpc`] capability; the tracker owns the record/attempt
//! state machine and its invariants:
//!
//! - one [`TransactionRecord`] per intended operation: a resubmission adds
//!   a [`TransactionAttempt`], never a second record
//! - at most one attempt is non-terminal at a time

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::store::{
    AttemptStatus, ExecutionStore, StoreError, TransactionAttempt, TransactionRecord, TxStatus,
};
use crate::util::IdGenerator;

/// A transaction the engine wants on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxRequest {
    pub chain_id: u64,
    pub to: String,
    /// Value in the chain's base unit.
    pub value: u128,
    pub gas_limit: u64,
    /// Gas price for the first attempt; resubmissions bump from the last
    /// attempt's price.
    pub gas_price: u128,
    /// Calldata, hex-encoded.
    pub data: Option<String>,
}

/// Receipt for a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub block_number: u64,
    pub gas_used: u64,
    /// Whether the transaction executed successfully (vs. reverted).
    pub success: bool,
}

/// Errors from the chain RPC capability.
#[derive(Debug, Error, Diagnostic)]
pub enum ChainRpcError {
    /// Transport-level failure; the broadcast may be retried.
    #[error("chain rpc network error: {message}")]
    #[diagnostic(code(flowline::chain::network))]
    Network { message: String },

    /// The node rejected the transaction (bad nonce, underpriced,
    /// malformed); retrying the same payload will not help.
    #[error("transaction rejected: {message}")]
    #[diagnostic(code(flowline::chain::rejected))]
    Rejected { message: String },
}

impl ChainRpcError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// Capability interface to a chain node. Implementations live outside the
/// engine core (JSON-RPC client, test double).
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Broadcast a signed transaction; returns the transaction hash.
    async fn broadcast(&self, request: &TxRequest) -> Result<String, ChainRpcError>;

    /// Receipt for a hash, or `None` while unmined.
    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainRpcError>;
}

/// Tracker-level errors.
#[derive(Debug, Error, Diagnostic)]
pub enum TxError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rpc(#[from] ChainRpcError),

    #[error("transaction {tx_id} is {status} and cannot {operation}")]
    #[diagnostic(
        code(flowline::chain::invalid_state),
        help("Only submitted transactions can be polled or resubmitted.")
    )]
    InvalidState {
        tx_id: String,
        status: TxStatus,
        operation: &'static str,
    },

    #[error("transaction {tx_id} has no in-flight attempt")]
    #[diagnostic(code(flowline::chain::no_attempt))]
    NoActiveAttempt { tx_id: String },

    #[error("bad gas price {value:?} on transaction {tx_id}")]
    #[diagnostic(code(flowline::chain::bad_gas_price))]
    BadGasPrice { tx_id: String, value: String },
}

/// Drives transaction records through
/// `Pending -> Submitted -> {Confirmed, Failed}`.
#[derive(Clone)]
pub struct TxTracker {
    store: Arc<dyn ExecutionStore>,
    rpc: Arc<dyn ChainRpc>,
    ids: IdGenerator,
}

impl TxTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            store,
            rpc,
            ids: IdGenerator::new(),
        }
    }

    /// Create a transaction record and broadcast the first attempt.
    ///
    /// On broadcast failure the record terminates `Failed` with a failed
    /// attempt row; the caller decides whether to retry with a fresh
    /// submission.
    #[instrument(skip(self, request), fields(execution = %execution_id, node = %node_id), err)]
    pub async fn submit(
        &self,
        execution_id: &str,
        node_id: &str,
        request: TxRequest,
    ) -> Result<TransactionRecord, TxError> {
        let now = Utc::now();
        let mut record = TransactionRecord {
            id: self.ids.transaction_id(),
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            chain_id: request.chain_id,
            to: request.to.clone(),
            value: request.value.to_string(),
            gas_limit: request.gas_limit,
            data: request.data.clone(),
            status: TxStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.create_transaction(record.clone()).await?;

        match self.rpc.broadcast(&request).await {
            Ok(tx_hash) => {
                self.store
                    .add_transaction_attempt(TransactionAttempt {
                        transaction_id: record.id.clone(),
                        attempt_no: 1,
                        tx_hash: tx_hash.clone(),
                        gas_price: request.gas_price.to_string(),
                        status: AttemptStatus::Submitted,
                        block_number: None,
                        gas_used: None,
                        error: None,
                        submitted_at: Utc::now(),
                    })
                    .await?;
                self.store
                    .update_transaction_status(&record.id, TxStatus::Submitted)
                    .await?;
                record.status = TxStatus::Submitted;
                tracing::info!(tx = %record.id, hash = %tx_hash, "transaction broadcast");
                Ok(record)
            }
            Err(e) => {
                self.store
                    .add_transaction_attempt(TransactionAttempt {
                        transaction_id: record.id.clone(),
                        attempt_no: 1,
                        tx_hash: String::new(),
                        gas_price: request.gas_price.to_string(),
                        status: AttemptStatus::Failed,
                        block_number: None,
                        gas_used: None,
                        error: Some(e.to_string()),
                        submitted_at: Utc::now(),
                    })
                    .await?;
                self.store
                    .update_transaction_status(&record.id, TxStatus::Failed)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Check the in-flight attempt for a receipt and resolve terminal
    /// status. Returns the transaction's status after the poll; `Submitted`
    /// means still unmined.
    ///
    /// Idempotent on terminal records.
    #[instrument(skip(self), err)]
    pub async fn poll_confirmation(&self, tx_id: &str) -> Result<TxStatus, TxError> {
        let record = self.store.transaction(tx_id).await?;
        if record.status.is_terminal() {
            return Ok(record.status);
        }
        if record.status != TxStatus::Submitted {
            return Err(TxError::InvalidState {
                tx_id: tx_id.to_string(),
                status: record.status,
                operation: "poll",
            });
        }
        let active = self.active_attempt(tx_id).await?;
        match self.rpc.receipt(&active.tx_hash).await? {
            None => Ok(TxStatus::Submitted),
            Some(receipt) => {
                let (attempt_status, tx_status, error) = if receipt.success {
                    (AttemptStatus::Confirmed, TxStatus::Confirmed, None)
                } else {
                    (
                        AttemptStatus::Failed,
                        TxStatus::Failed,
                        Some("transaction reverted".to_string()),
                    )
                };
                self.store
                    .update_attempt_status(
                        tx_id,
                        active.attempt_no,
                        attempt_status,
                        Some(receipt.block_number),
                        Some(receipt.gas_used),
                        error,
                    )
                    .await?;
                self.store
                    .update_transaction_status(tx_id, tx_status)
                    .await?;
                tracing::info!(
                    tx = %tx_id,
                    block = receipt.block_number,
                    status = %tx_status.encode(),
                    "transaction resolved"
                );
                Ok(tx_status)
            }
        }
    }

    /// Replace a stuck attempt with a gas-bumped rebroadcast of the same
    /// transaction. The stuck attempt is marked `Superseded` first, keeping
    /// at most one attempt in flight; the record is unchanged except for
    /// the new attempt row.
    #[instrument(skip(self), err)]
    pub async fn resubmit_with_bumped_gas(
        &self,
        tx_id: &str,
        bump_percent: u32,
    ) -> Result<TransactionAttempt, TxError> {
        let record = self.store.transaction(tx_id).await?;
        if record.status != TxStatus::Submitted {
            return Err(TxError::InvalidState {
                tx_id: tx_id.to_string(),
                status: record.status,
                operation: "resubmit",
            });
        }
        let stuck = self.active_attempt(tx_id).await?;
        let prior_price: u128 =
            stuck
                .gas_price
                .parse()
                .map_err(|_| TxError::BadGasPrice {
                    tx_id: tx_id.to_string(),
                    value: stuck.gas_price.clone(),
                })?;
        let bumped_price = prior_price + prior_price * u128::from(bump_percent) / 100;

        self.store
            .update_attempt_status(
                tx_id,
                stuck.attempt_no,
                AttemptStatus::Superseded,
                None,
                None,
                None,
            )
            .await?;

        let request = TxRequest {
            chain_id: record.chain_id,
            to: record.to.clone(),
            value: record.value.parse().unwrap_or_default(),
            gas_limit: record.gas_limit,
            gas_price: bumped_price,
            data: record.data.clone(),
        };
        match self.rpc.broadcast(&request).await {
            Ok(tx_hash) => {
                let attempt = TransactionAttempt {
                    transaction_id: tx_id.to_string(),
                    attempt_no: stuck.attempt_no + 1,
                    tx_hash,
                    gas_price: bumped_price.to_string(),
                    status: AttemptStatus::Submitted,
                    block_number: None,
                    gas_used: None,
                    error: None,
                    submitted_at: Utc::now(),
                };
                self.store.add_transaction_attempt(attempt.clone()).await?;
                tracing::info!(
                    tx = %tx_id,
                    attempt = attempt.attempt_no,
                    gas_price = %attempt.gas_price,
                    "gas-bumped resubmission broadcast"
                );
                Ok(attempt)
            }
            Err(e) => {
                // The prior attempt is already superseded; a failed
                // rebroadcast terminates the record.
                self.store
                    .update_transaction_status(tx_id, TxStatus::Failed)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Full attempt history for a transaction, ordered by attempt number.
    pub async fn attempts(&self, tx_id: &str) -> Result<Vec<TransactionAttempt>, TxError> {
        Ok(self.store.transaction_attempts(tx_id).await?)
    }

    async fn active_attempt(&self, tx_id: &str) -> Result<TransactionAttempt, TxError> {
        let attempts = self.store.transaction_attempts(tx_id).await?;
        attempts
            .into_iter()
            .rev()
            .find(|a| a.status == AttemptStatus::Submitted)
            .ok_or_else(|| TxError::NoActiveAttempt {
                tx_id: tx_id.to_string(),
            })
    }
}
