//! In-memory [`ExecutionStore`] for tests and ephemeral runs.
//!
//! A single mutex guards all tables, which makes every trait operation
//! atomic by construction. Not durable: process restart loses state, so
//! crash-recovery paths are exercised against the sqlite backend or by
//! sharing one `MemoryStore` between simulated orchestrator instances.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::records::{
    AttemptStatus, ExecutionRecord, LogRecord, NodeExecutionRecord, PauseSnapshot,
    TransactionAttempt, TransactionRecord, TxStatus,
};
use super::{ExecutionStore, Result, StoreError};
use crate::blocks::NodeOutput;
use crate::graph::Workflow;
use crate::policy::{apply_failure, apply_success, begin_probe, BreakerConfig, BreakerRecord};
use crate::types::{ExecutionStatus, NodeStatus};
use crate::util::IdGenerator;

#[derive(Default)]
struct Inner {
    executions: FxHashMap<String, ExecutionRecord>,
    // keyed by (execution_id, node_id)
    node_executions: FxHashMap<(String, String), NodeExecutionRecord>,
    logs: Vec<LogRecord>,
    pause_snapshots: FxHashMap<(String, String), PauseSnapshot>,
    transactions: FxHashMap<String, TransactionRecord>,
    attempts: FxHashMap<String, Vec<TransactionAttempt>>,
    breakers: FxHashMap<String, BreakerRecord>,
}

/// Mutex-guarded in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    ids: IdGenerator,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_execution(
        &self,
        workflow: &Workflow,
        trigger: Value,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord {
            id: self.ids.execution_id(),
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version,
            workflow: workflow.clone(),
            status: ExecutionStatus::Pending,
            trigger,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.lock()
            .executions
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn execution(&self, execution_id: &str) -> Result<ExecutionRecord> {
        self.lock()
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: "execution",
                id: execution_id.to_string(),
            })
    }

    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "execution",
                id: execution_id.to_string(),
            })?;
        let now = Utc::now();
        if status == ExecutionStatus::Running && record.started_at.is_none() {
            record.started_at = Some(now);
        }
        if status.is_terminal() {
            record.finished_at = Some(now);
        }
        record.status = status;
        Ok(())
    }

    async fn set_execution_result(
        &self,
        execution_id: &str,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .executions
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "execution",
                id: execution_id.to_string(),
            })?;
        record.output = output;
        record.error = error;
        Ok(())
    }

    async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .lock()
            .executions
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect())
    }

    async fn create_node_execution(&self, execution_id: &str, node_id: &str) -> Result<()> {
        let key = (execution_id.to_string(), node_id.to_string());
        self.lock()
            .node_executions
            .entry(key)
            .or_insert_with(|| NodeExecutionRecord::pending(execution_id, node_id));
        Ok(())
    }

    async fn node_execution(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeExecutionRecord>> {
        let key = (execution_id.to_string(), node_id.to_string());
        Ok(self.lock().node_executions.get(&key).cloned())
    }

    async fn node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecutionRecord>> {
        Ok(self
            .lock()
            .node_executions
            .values()
            .filter(|n| n.execution_id == execution_id)
            .cloned()
            .collect())
    }

    async fn try_claim_node(
        &self,
        execution_id: &str,
        node_id: &str,
        heartbeat_timeout: Duration,
    ) -> Result<bool> {
        let key = (execution_id.to_string(), node_id.to_string());
        let now = Utc::now();
        let mut inner = self.lock();
        let record = inner
            .node_executions
            .entry(key)
            .or_insert_with(|| NodeExecutionRecord::pending(execution_id, node_id));
        let claimable = match record.status {
            NodeStatus::Pending => true,
            // A running claim is presumed abandoned once its heartbeat
            // goes stale past the timeout.
            NodeStatus::Running => record
                .heartbeat_at
                .is_none_or(|hb| now - hb > heartbeat_timeout),
            _ => false,
        };
        if claimable {
            record.status = NodeStatus::Running;
            record.heartbeat_at = Some(now);
            if record.started_at.is_none() {
                record.started_at = Some(now);
            }
        }
        Ok(claimable)
    }

    async fn heartbeat_node(&self, execution_id: &str, node_id: &str) -> Result<()> {
        let key = (execution_id.to_string(), node_id.to_string());
        let mut inner = self.lock();
        if let Some(record) = inner.node_executions.get_mut(&key) {
            record.heartbeat_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_node_input(
        &self,
        execution_id: &str,
        node_id: &str,
        input: Value,
    ) -> Result<()> {
        let key = (execution_id.to_string(), node_id.to_string());
        let mut inner = self.lock();
        let record = inner
            .node_executions
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                what: "node execution",
                id: format!("{execution_id}/{node_id}"),
            })?;
        record.input = Some(input);
        Ok(())
    }

    async fn record_node_result(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        output: Option<NodeOutput>,
        error: Option<String>,
        retry_count: u32,
    ) -> Result<()> {
        let key = (execution_id.to_string(), node_id.to_string());
        let now = Utc::now();
        let mut inner = self.lock();
        let record = inner
            .node_executions
            .entry(key)
            .or_insert_with(|| NodeExecutionRecord::pending(execution_id, node_id));
        record.status = status;
        if output.is_some() {
            record.output = output;
        }
        record.error = error;
        record.retry_count = retry_count;
        if status.is_terminal() {
            record.finished_at = Some(now);
            record.duration_ms = record
                .started_at
                .map(|s| (now - s).num_milliseconds())
                .or(Some(0));
        }
        Ok(())
    }

    async fn reset_node_for_retry(&self, execution_id: &str, node_id: &str) -> Result<()> {
        let key = (execution_id.to_string(), node_id.to_string());
        let mut inner = self.lock();
        let record = inner
            .node_executions
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound {
                what: "node execution",
                id: format!("{execution_id}/{node_id}"),
            })?;
        record.status = NodeStatus::Pending;
        record.error = None;
        record.output = None;
        record.finished_at = None;
        record.duration_ms = None;
        record.heartbeat_at = None;
        Ok(())
    }

    async fn append_log(&self, log: LogRecord) -> Result<()> {
        self.lock().logs.push(log);
        Ok(())
    }

    async fn logs(&self, execution_id: &str, node_id: Option<&str>) -> Result<Vec<LogRecord>> {
        Ok(self
            .lock()
            .logs
            .iter()
            .filter(|l| {
                l.execution_id == execution_id
                    && node_id.is_none_or(|n| l.node_id.as_deref() == Some(n))
            })
            .cloned()
            .collect())
    }

    async fn save_pause_snapshot(&self, snapshot: PauseSnapshot) -> Result<()> {
        let key = (snapshot.execution_id.clone(), snapshot.node_id.clone());
        self.lock().pause_snapshots.insert(key, snapshot);
        Ok(())
    }

    async fn load_pause_snapshot(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<PauseSnapshot>> {
        let key = (execution_id.to_string(), node_id.to_string());
        Ok(self.lock().pause_snapshots.get(&key).cloned())
    }

    async fn clear_pause_snapshot(&self, execution_id: &str, node_id: &str) -> Result<()> {
        let key = (execution_id.to_string(), node_id.to_string());
        self.lock().pause_snapshots.remove(&key);
        Ok(())
    }

    async fn create_transaction(&self, tx: TransactionRecord) -> Result<()> {
        self.lock().transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn transaction(&self, tx_id: &str) -> Result<TransactionRecord> {
        self.lock()
            .transactions
            .get(tx_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: "transaction",
                id: tx_id.to_string(),
            })
    }

    async fn transactions_for_node(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|t| t.execution_id == execution_id && t.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn update_transaction_status(&self, tx_id: &str, status: TxStatus) -> Result<()> {
        let mut inner = self.lock();
        let record = inner
            .transactions
            .get_mut(tx_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "transaction",
                id: tx_id.to_string(),
            })?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn add_transaction_attempt(&self, attempt: TransactionAttempt) -> Result<()> {
        self.lock()
            .attempts
            .entry(attempt.transaction_id.clone())
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn transaction_attempts(&self, tx_id: &str) -> Result<Vec<TransactionAttempt>> {
        let mut attempts = self.lock().attempts.get(tx_id).cloned().unwrap_or_default();
        attempts.sort_by_key(|a| a.attempt_no);
        Ok(attempts)
    }

    async fn update_attempt_status(
        &self,
        tx_id: &str,
        attempt_no: u32,
        status: AttemptStatus,
        block_number: Option<u64>,
        gas_used: Option<u64>,
        error: Option<String>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let attempts = inner
            .attempts
            .get_mut(tx_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "transaction",
                id: tx_id.to_string(),
            })?;
        let attempt = attempts
            .iter_mut()
            .find(|a| a.attempt_no == attempt_no)
            .ok_or_else(|| StoreError::NotFound {
                what: "transaction attempt",
                id: format!("{tx_id}#{attempt_no}"),
            })?;
        attempt.status = status;
        attempt.block_number = block_number;
        attempt.gas_used = gas_used;
        attempt.error = error;
        Ok(())
    }

    async fn breaker_record(&self, resource_id: &str) -> Result<BreakerRecord> {
        Ok(self
            .lock()
            .breakers
            .get(resource_id)
            .cloned()
            .unwrap_or_else(|| BreakerRecord::closed(resource_id)))
    }

    async fn breaker_on_success(&self, resource_id: &str) -> Result<BreakerRecord> {
        let mut inner = self.lock();
        let current = inner
            .breakers
            .get(resource_id)
            .cloned()
            .unwrap_or_else(|| BreakerRecord::closed(resource_id));
        let next = apply_success(current, Utc::now());
        inner.breakers.insert(resource_id.to_string(), next.clone());
        Ok(next)
    }

    async fn breaker_on_failure(
        &self,
        resource_id: &str,
        config: &BreakerConfig,
    ) -> Result<BreakerRecord> {
        let mut inner = self.lock();
        let current = inner
            .breakers
            .get(resource_id)
            .cloned()
            .unwrap_or_else(|| BreakerRecord::closed(resource_id));
        let next = apply_failure(current, config, Utc::now());
        inner.breakers.insert(resource_id.to_string(), next.clone());
        Ok(next)
    }

    async fn breaker_try_probe(&self, resource_id: &str, config: &BreakerConfig) -> Result<bool> {
        let mut inner = self.lock();
        let current = inner
            .breakers
            .get(resource_id)
            .cloned()
            .unwrap_or_else(|| BreakerRecord::closed(resource_id));
        match begin_probe(&current, config, Utc::now()) {
            Some(next) => {
                inner.breakers.insert(resource_id.to_string(), next);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
