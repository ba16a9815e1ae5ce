//! Crash recovery: re-drive executions a dead orchestrator left behind.

use tracing::instrument;

use super::orchestrator::{Orchestrator, OrchestratorError};
use crate::types::{ExecutionId, ExecutionStatus};

impl Orchestrator {
    /// Scan the store for executions stranded `Running` or never started
    /// (`Pending`) and drive each to its next stopping point.
    ///
    /// Completed upstream nodes are left untouched (their results are
    /// durable), nodes `Running` past the heartbeat timeout are re-claimed
    /// by the normal claim path, and `Paused` executions stay parked until
    /// an explicit resume. Returns the executions that were driven.
    #[instrument(skip(self), err)]
    pub async fn recover(&self) -> Result<Vec<ExecutionId>, OrchestratorError> {
        let mut stranded = self
            .store()
            .executions_with_status(ExecutionStatus::Running)
            .await?;
        stranded.extend(
            self.store()
                .executions_with_status(ExecutionStatus::Pending)
                .await?,
        );

        let mut recovered = Vec::with_capacity(stranded.len());
        for execution in stranded {
            tracing::info!(
                execution = %execution.id,
                status = %execution.status,
                "recovering stranded execution"
            );
            match self.run(&execution.id).await {
                Ok(record) => {
                    tracing::info!(
                        execution = %record.id,
                        status = %record.status,
                        "recovery drive finished"
                    );
                    recovered.push(execution.id);
                }
                Err(e) => {
                    tracing::error!(execution = %execution.id, error = %e, "recovery drive failed");
                }
            }
        }
        Ok(recovered)
    }
}
