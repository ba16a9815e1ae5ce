//! SQLite-backed [`ExecutionStore`].
//!
//! Durable persistence for executions, node executions, logs, pause
//! snapshots, the chain-transaction sub-ledger, and circuit-breaker state.
//!
//! ## Behavior
//!
//! - When the `sqlite-migrations` feature is enabled (default), embedded
//!   migrations (`sqlx::migrate!("./migrations")`) run on connect;
//!   disabling the feature assumes external migration orchestration.
//! - The node claim is a single `UPDATE ... WHERE status = 'pending' OR
//!   (status = 'running' AND heartbeat_at < cutoff)`; sqlite serializes
//!   writers, so `rows_affected == 1` is the atomic claim token even with
//!   several orchestrator processes on one database.
//! - Breaker updates run inside immediate transactions: read row, apply
//!   the pure transition from [`crate::policy`], write back.
//!
//! Pure serialization lives in `sqlite_helpers`; this module is database
//! I/O only.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use super::records::{
    AttemptStatus, ExecutionRecord, LogRecord, NodeExecutionRecord, PauseSnapshot,
    TransactionAttempt, TransactionRecord, TxStatus,
};
use super::sqlite_helpers::{fmt_ts, fmt_ts_opt, from_json, from_json_opt, parse_ts, parse_ts_opt, to_json};
use super::{ExecutionStore, Result, StoreError};
use crate::blocks::NodeOutput;
use crate::graph::Workflow;
use crate::policy::{apply_failure, apply_success, begin_probe, BreakerConfig, BreakerRecord, CircuitState};
use crate::types::{ExecutionStatus, LogLevel, NodeStatus};
use crate::util::IdGenerator;

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::backend(e.to_string())
}

/// SQLite connection pool wrapper implementing [`ExecutionStore`].
pub struct SqliteStore {
    pool: Arc<SqlitePool>,
    ids: IdGenerator,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url`,
    /// e.g. `"sqlite://flowline.db"`.
    #[must_use = "store must be used to persist state"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Ensure the underlying file exists; SqlitePool::connect does not
        // create it.
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }
        let pool = SqlitePool::connect(database_url).await.map_err(db_err)?;
        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::backend(format!("migration failure: {e}")))?;
        }
        Ok(Self {
            pool: Arc::new(pool),
            ids: IdGenerator::new(),
        })
    }

    fn execution_from_row(row: &SqliteRow) -> Result<ExecutionRecord> {
        let workflow_json: String = row.try_get("workflow_json").map_err(db_err)?;
        let trigger_json: String = row.try_get("trigger_json").map_err(db_err)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        let created_at: String = row.try_get("created_at").map_err(db_err)?;
        Ok(ExecutionRecord {
            id: row.try_get("id").map_err(db_err)?,
            workflow_id: row.try_get("workflow_id").map_err(db_err)?,
            workflow_version: row
                .try_get::<i64, _>("workflow_version")
                .map_err(db_err)? as u32,
            workflow: from_json::<Workflow>(&workflow_json)?,
            status: ExecutionStatus::decode(&status),
            trigger: from_json::<Value>(&trigger_json)?,
            output: from_json_opt::<Value>(row.try_get("output_json").map_err(db_err)?)?,
            error: row.try_get("error").map_err(db_err)?,
            created_at: parse_ts(&created_at)?,
            started_at: parse_ts_opt(row.try_get("started_at").map_err(db_err)?)?,
            finished_at: parse_ts_opt(row.try_get("finished_at").map_err(db_err)?)?,
        })
    }

    fn node_execution_from_row(row: &SqliteRow) -> Result<NodeExecutionRecord> {
        let status: String = row.try_get("status").map_err(db_err)?;
        Ok(NodeExecutionRecord {
            execution_id: row.try_get("execution_id").map_err(db_err)?,
            node_id: row.try_get("node_id").map_err(db_err)?,
            status: NodeStatus::decode(&status),
            input: from_json_opt::<Value>(row.try_get("input_json").map_err(db_err)?)?,
            output: from_json_opt::<NodeOutput>(row.try_get("output_json").map_err(db_err)?)?,
            error: row.try_get("error").map_err(db_err)?,
            retry_count: row.try_get::<i64, _>("retry_count").map_err(db_err)? as u32,
            started_at: parse_ts_opt(row.try_get("started_at").map_err(db_err)?)?,
            finished_at: parse_ts_opt(row.try_get("finished_at").map_err(db_err)?)?,
            duration_ms: row.try_get("duration_ms").map_err(db_err)?,
            heartbeat_at: parse_ts_opt(row.try_get("heartbeat_at").map_err(db_err)?)?,
        })
    }

    fn log_from_row(row: &SqliteRow) -> Result<LogRecord> {
        let level: String = row.try_get("level").map_err(db_err)?;
        let logged_at: String = row.try_get("logged_at").map_err(db_err)?;
        Ok(LogRecord {
            execution_id: row.try_get("execution_id").map_err(db_err)?,
            node_id: row.try_get("node_id").map_err(db_err)?,
            level: LogLevel::decode(&level),
            message: row.try_get("message").map_err(db_err)?,
            when: parse_ts(&logged_at)?,
        })
    }

    fn transaction_from_row(row: &SqliteRow) -> Result<TransactionRecord> {
        let status: String = row.try_get("status").map_err(db_err)?;
        let created_at: String = row.try_get("created_at").map_err(db_err)?;
        let updated_at: String = row.try_get("updated_at").map_err(db_err)?;
        Ok(TransactionRecord {
            id: row.try_get("id").map_err(db_err)?,
            execution_id: row.try_get("execution_id").map_err(db_err)?,
            node_id: row.try_get("node_id").map_err(db_err)?,
            chain_id: row.try_get::<i64, _>("chain_id").map_err(db_err)? as u64,
            to: row.try_get("to_address").map_err(db_err)?,
            value: row.try_get("value").map_err(db_err)?,
            gas_limit: row.try_get::<i64, _>("gas_limit").map_err(db_err)? as u64,
            data: row.try_get("data").map_err(db_err)?,
            status: TxStatus::decode(&status),
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn attempt_from_row(row: &SqliteRow) -> Result<TransactionAttempt> {
        let status: String = row.try_get("status").map_err(db_err)?;
        let submitted_at: String = row.try_get("submitted_at").map_err(db_err)?;
        Ok(TransactionAttempt {
            transaction_id: row.try_get("transaction_id").map_err(db_err)?,
            attempt_no: row.try_get::<i64, _>("attempt_no").map_err(db_err)? as u32,
            tx_hash: row.try_get("tx_hash").map_err(db_err)?,
            gas_price: row.try_get("gas_price").map_err(db_err)?,
            status: AttemptStatus::decode(&status),
            block_number: row
                .try_get::<Option<i64>, _>("block_number")
                .map_err(db_err)?
                .map(|n| n as u64),
            gas_used: row
                .try_get::<Option<i64>, _>("gas_used")
                .map_err(db_err)?
                .map(|n| n as u64),
            error: row.try_get("error").map_err(db_err)?,
            submitted_at: parse_ts(&submitted_at)?,
        })
    }

    fn breaker_from_row(row: &SqliteRow) -> Result<BreakerRecord> {
        let state: String = row.try_get("state").map_err(db_err)?;
        Ok(BreakerRecord {
            resource_id: row.try_get("resource_id").map_err(db_err)?,
            state: CircuitState::decode(&state),
            failure_count: row.try_get::<i64, _>("failure_count").map_err(db_err)? as u32,
            success_count: row.try_get::<i64, _>("success_count").map_err(db_err)? as u32,
            last_failure_at: parse_ts_opt(row.try_get("last_failure_at").map_err(db_err)?)?,
            last_success_at: parse_ts_opt(row.try_get("last_success_at").map_err(db_err)?)?,
            opened_at: parse_ts_opt(row.try_get("opened_at").map_err(db_err)?)?,
            probe_started_at: parse_ts_opt(row.try_get("probe_started_at").map_err(db_err)?)?,
        })
    }

    async fn write_breaker(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        record: &BreakerRecord,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO circuit_breakers (resource_id, state, failure_count, success_count, \
             last_failure_at, last_success_at, opened_at, probe_started_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (resource_id) DO UPDATE SET \
             state = excluded.state, failure_count = excluded.failure_count, \
             success_count = excluded.success_count, \
             last_failure_at = excluded.last_failure_at, \
             last_success_at = excluded.last_success_at, \
             opened_at = excluded.opened_at, \
             probe_started_at = excluded.probe_started_at",
        )
        .bind(&record.resource_id)
        .bind(record.state.encode())
        .bind(record.failure_count as i64)
        .bind(record.success_count as i64)
        .bind(fmt_ts_opt(record.last_failure_at))
        .bind(fmt_ts_opt(record.last_success_at))
        .bind(fmt_ts_opt(record.opened_at))
        .bind(fmt_ts_opt(record.probe_started_at))
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn read_breaker(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        resource_id: &str,
    ) -> Result<BreakerRecord> {
        let row = sqlx::query("SELECT * FROM circuit_breakers WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Self::breaker_from_row(&row),
            None => Ok(BreakerRecord::closed(resource_id)),
        }
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    #[instrument(skip(self, workflow, trigger), err)]
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
        sqlx::query(
            "INSERT INTO executions (id, workflow_id, workflow_version, workflow_json, status, \
             trigger_json, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.workflow_id)
        .bind(record.workflow_version as i64)
        .bind(to_json(&record.workflow)?)
        .bind(record.status.encode())
        .bind(to_json(&record.trigger)?)
        .bind(fmt_ts(record.created_at))
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(record)
    }

    async fn execution(&self, execution_id: &str) -> Result<ExecutionRecord> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound {
                what: "execution",
                id: execution_id.to_string(),
            })?;
        Self::execution_from_row(&row)
    }

    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<()> {
        let now = fmt_ts(Utc::now());
        let finished = if status.is_terminal() {
            Some(now.clone())
        } else {
            None
        };
        let started = if status == ExecutionStatus::Running {
            Some(now)
        } else {
            None
        };
        let affected = sqlx::query(
            "UPDATE executions SET status = ?, \
             started_at = COALESCE(started_at, ?), \
             finished_at = COALESCE(?, finished_at) \
             WHERE id = ?",
        )
        .bind(status.encode())
        .bind(started)
        .bind(finished)
        .bind(execution_id)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound {
                what: "execution",
                id: execution_id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_execution_result(
        &self,
        execution_id: &str,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        let output_json = output.as_ref().map(to_json).transpose()?;
        sqlx::query("UPDATE executions SET output_json = ?, error = ? WHERE id = ?")
            .bind(output_json)
            .bind(error)
            .bind(execution_id)
            .execute(&*self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn executions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query("SELECT * FROM executions WHERE status = ? ORDER BY created_at")
            .bind(status.encode())
            .fetch_all(&*self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::execution_from_row).collect()
    }

    async fn create_node_execution(&self, execution_id: &str, node_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO node_executions (execution_id, node_id, status) \
             VALUES (?, ?, 'pending')",
        )
        .bind(execution_id)
        .bind(node_id)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn node_execution(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<NodeExecutionRecord>> {
        let row =
            sqlx::query("SELECT * FROM node_executions WHERE execution_id = ? AND node_id = ?")
                .bind(execution_id)
                .bind(node_id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_err)?;
        row.as_ref().map(Self::node_execution_from_row).transpose()
    }

    async fn node_executions(&self, execution_id: &str) -> Result<Vec<NodeExecutionRecord>> {
        let rows = sqlx::query("SELECT * FROM node_executions WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(Self::node_execution_from_row).collect()
    }

    async fn try_claim_node(
        &self,
        execution_id: &str,
        node_id: &str,
        heartbeat_timeout: Duration,
    ) -> Result<bool> {
        self.create_node_execution(execution_id, node_id).await?;
        let now = Utc::now();
        let stale_cutoff = fmt_ts(now - heartbeat_timeout);
        let now_s = fmt_ts(now);
        let affected = sqlx::query(
            "UPDATE node_executions SET status = 'running', heartbeat_at = ?, \
             started_at = COALESCE(started_at, ?) \
             WHERE execution_id = ? AND node_id = ? AND \
             (status = 'pending' OR (status = 'running' AND \
              (heartbeat_at IS NULL OR heartbeat_at < ?)))",
        )
        .bind(&now_s)
        .bind(&now_s)
        .bind(execution_id)
        .bind(node_id)
        .bind(&stale_cutoff)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn heartbeat_node(&self, execution_id: &str, node_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE node_executions SET heartbeat_at = ? \
             WHERE execution_id = ? AND node_id = ? AND status = 'running'",
        )
        .bind(fmt_ts(Utc::now()))
        .bind(execution_id)
        .bind(node_id)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_node_input(
        &self,
        execution_id: &str,
        node_id: &str,
        input: Value,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE node_executions SET input_json = ? WHERE execution_id = ? AND node_id = ?",
        )
        .bind(to_json(&input)?)
        .bind(execution_id)
        .bind(node_id)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
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
        self.create_node_execution(execution_id, node_id).await?;
        let now = Utc::now();
        let finished = if status.is_terminal() {
            Some(fmt_ts(now))
        } else {
            None
        };
        let output_json = output.as_ref().map(to_json).transpose()?;
        sqlx::query(
            "UPDATE node_executions SET status = ?, \
             output_json = COALESCE(?, output_json), error = ?, retry_count = ?, \
             finished_at = ?, \
             duration_ms = CASE WHEN ? IS NOT NULL AND started_at IS NOT NULL \
                 THEN CAST((julianday(?) - julianday(started_at)) * 86400000 AS INTEGER) \
                 ELSE duration_ms END \
             WHERE execution_id = ? AND node_id = ?",
        )
        .bind(status.encode())
        .bind(output_json)
        .bind(error)
        .bind(retry_count as i64)
        .bind(finished.clone())
        .bind(finished.clone())
        .bind(finished)
        .bind(execution_id)
        .bind(node_id)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn reset_node_for_retry(&self, execution_id: &str, node_id: &str) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE node_executions SET status = 'pending', error = NULL, output_json = NULL, \
             finished_at = NULL, duration_ms = NULL, heartbeat_at = NULL \
             WHERE execution_id = ? AND node_id = ?",
        )
        .bind(execution_id)
        .bind(node_id)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound {
                what: "node execution",
                id: format!("{execution_id}/{node_id}"),
            });
        }
        Ok(())
    }

    async fn append_log(&self, log: LogRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO execution_logs (execution_id, node_id, level, message, logged_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&log.execution_id)
        .bind(&log.node_id)
        .bind(log.level.encode())
        .bind(&log.message)
        .bind(fmt_ts(log.when))
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn logs(&self, execution_id: &str, node_id: Option<&str>) -> Result<Vec<LogRecord>> {
        let rows = match node_id {
            Some(node) => {
                sqlx::query(
                    "SELECT * FROM execution_logs WHERE execution_id = ? AND node_id = ? \
                     ORDER BY id",
                )
                .bind(execution_id)
                .bind(node)
                .fetch_all(&*self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM execution_logs WHERE execution_id = ? ORDER BY id")
                    .bind(execution_id)
                    .fetch_all(&*self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        rows.iter().map(Self::log_from_row).collect()
    }

    async fn save_pause_snapshot(&self, snapshot: PauseSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO pause_snapshots (execution_id, node_id, pending_input_json, reason, \
             wait_key, created_at) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (execution_id, node_id) DO UPDATE SET \
             pending_input_json = excluded.pending_input_json, reason = excluded.reason, \
             wait_key = excluded.wait_key, created_at = excluded.created_at",
        )
        .bind(&snapshot.execution_id)
        .bind(&snapshot.node_id)
        .bind(to_json(&snapshot.pending_input)?)
        .bind(&snapshot.reason)
        .bind(&snapshot.wait_key)
        .bind(fmt_ts(snapshot.created_at))
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_pause_snapshot(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<PauseSnapshot>> {
        let row =
            sqlx::query("SELECT * FROM pause_snapshots WHERE execution_id = ? AND node_id = ?")
                .bind(execution_id)
                .bind(node_id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(db_err)?;
        row.map(|row| {
            let pending_input_json: String = row.try_get("pending_input_json").map_err(db_err)?;
            let created_at: String = row.try_get("created_at").map_err(db_err)?;
            Ok(PauseSnapshot {
                execution_id: row.try_get("execution_id").map_err(db_err)?,
                node_id: row.try_get("node_id").map_err(db_err)?,
                pending_input: from_json(&pending_input_json)?,
                reason: row.try_get("reason").map_err(db_err)?,
                wait_key: row.try_get("wait_key").map_err(db_err)?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    async fn clear_pause_snapshot(&self, execution_id: &str, node_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM pause_snapshots WHERE execution_id = ? AND node_id = ?")
            .bind(execution_id)
            .bind(node_id)
            .execute(&*self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn create_transaction(&self, tx: TransactionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO chain_transactions (id, execution_id, node_id, chain_id, to_address, \
             value, gas_limit, data, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tx.id)
        .bind(&tx.execution_id)
        .bind(&tx.node_id)
        .bind(tx.chain_id as i64)
        .bind(&tx.to)
        .bind(&tx.value)
        .bind(tx.gas_limit as i64)
        .bind(&tx.data)
        .bind(tx.status.encode())
        .bind(fmt_ts(tx.created_at))
        .bind(fmt_ts(tx.updated_at))
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn transaction(&self, tx_id: &str) -> Result<TransactionRecord> {
        let row = sqlx::query("SELECT * FROM chain_transactions WHERE id = ?")
            .bind(tx_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound {
                what: "transaction",
                id: tx_id.to_string(),
            })?;
        Self::transaction_from_row(&row)
    }

    async fn transactions_for_node(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM chain_transactions WHERE execution_id = ? AND node_id = ? \
             ORDER BY created_at",
        )
        .bind(execution_id)
        .bind(node_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::transaction_from_row).collect()
    }

    async fn update_transaction_status(&self, tx_id: &str, status: TxStatus) -> Result<()> {
        let affected =
            sqlx::query("UPDATE chain_transactions SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.encode())
                .bind(fmt_ts(Utc::now()))
                .bind(tx_id)
                .execute(&*self.pool)
                .await
                .map_err(db_err)?
                .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound {
                what: "transaction",
                id: tx_id.to_string(),
            });
        }
        Ok(())
    }

    async fn add_transaction_attempt(&self, attempt: TransactionAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO chain_tx_attempts (transaction_id, attempt_no, tx_hash, gas_price, \
             status, block_number, gas_used, error, submitted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attempt.transaction_id)
        .bind(attempt.attempt_no as i64)
        .bind(&attempt.tx_hash)
        .bind(&attempt.gas_price)
        .bind(attempt.status.encode())
        .bind(attempt.block_number.map(|n| n as i64))
        .bind(attempt.gas_used.map(|n| n as i64))
        .bind(&attempt.error)
        .bind(fmt_ts(attempt.submitted_at))
        .execute(&*self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn transaction_attempts(&self, tx_id: &str) -> Result<Vec<TransactionAttempt>> {
        let rows = sqlx::query(
            "SELECT * FROM chain_tx_attempts WHERE transaction_id = ? ORDER BY attempt_no",
        )
        .bind(tx_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(Self::attempt_from_row).collect()
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
        let affected = sqlx::query(
            "UPDATE chain_tx_attempts SET status = ?, block_number = ?, gas_used = ?, error = ? \
             WHERE transaction_id = ? AND attempt_no = ?",
        )
        .bind(status.encode())
        .bind(block_number.map(|n| n as i64))
        .bind(gas_used.map(|n| n as i64))
        .bind(error)
        .bind(tx_id)
        .bind(attempt_no as i64)
        .execute(&*self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound {
                what: "transaction attempt",
                id: format!("{tx_id}#{attempt_no}"),
            });
        }
        Ok(())
    }

    async fn breaker_record(&self, resource_id: &str) -> Result<BreakerRecord> {
        let row = sqlx::query("SELECT * FROM circuit_breakers WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Self::breaker_from_row(&row),
            None => Ok(BreakerRecord::closed(resource_id)),
        }
    }

    async fn breaker_on_success(&self, resource_id: &str) -> Result<BreakerRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let current = Self::read_breaker(&mut tx, resource_id).await?;
        let next = apply_success(current, Utc::now());
        Self::write_breaker(&mut tx, &next).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(next)
    }

    async fn breaker_on_failure(
        &self,
        resource_id: &str,
        config: &BreakerConfig,
    ) -> Result<BreakerRecord> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let current = Self::read_breaker(&mut tx, resource_id).await?;
        let next = apply_failure(current, config, Utc::now());
        Self::write_breaker(&mut tx, &next).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(next)
    }

    async fn breaker_try_probe(&self, resource_id: &str, config: &BreakerConfig) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let current = Self::read_breaker(&mut tx, resource_id).await?;
        match begin_probe(&current, config, Utc::now()) {
            Some(next) => {
                Self::write_breaker(&mut tx, &next).await?;
                tx.commit().await.map_err(db_err)?;
                Ok(true)
            }
            None => {
                tx.rollback().await.map_err(db_err)?;
                Ok(false)
            }
        }
    }
}
