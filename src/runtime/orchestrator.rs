//! The orchestrator: walks a validated DAG, claims and dispatches ready
//! nodes, and drives each execution to a terminal or paused state.
//!
//! All cross-node coordination goes through the store's atomic claim, so
//! any number of orchestrator instances (including a crash-recovered one)
//! can scan the same execution without double-dispatching a node. The
//! control loop never blocks on a single node's I/O: dispatches run as
//! spawned tasks bounded by a per-execution semaphore, and the loop wakes
//! on each completion to re-evaluate readiness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::config::EngineConfig;
use super::dispatch::{merge_json, Disposition, NodeDispatcher, NodeTaskResult};
use crate::blocks::{BlockRegistry, InputMap};
use crate::events::{EventBus, EventEmitter, EventPayload};
use crate::graph::{validate, NodeSpec, ValidatedWorkflow, ValidationError, Workflow};
use crate::policy::DispatchPolicy;
use crate::store::{ExecutionRecord, ExecutionStore, LogRecord, NodeExecutionRecord, StoreError};
use crate::types::{ExecutionId, ExecutionStatus, LogLevel, NodeId, NodeStatus};

/// Orchestrator and administrative-operation errors.
#[derive(Debug, Error, Diagnostic)]
pub enum OrchestratorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("execution {execution_id} is {status}, expected {expected}")]
    #[diagnostic(code(flowline::orchestrator::invalid_state))]
    InvalidExecutionState {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        expected: &'static str,
    },

    /// Resume was requested for a node that is not paused. Explicit so
    /// callers can tell "nothing to do" from a double-resume race.
    #[error("node {node_id} in execution {execution_id} is not paused")]
    #[diagnostic(code(flowline::orchestrator::not_paused))]
    NotPaused {
        execution_id: ExecutionId,
        node_id: NodeId,
    },

    #[error("node {node_id} in execution {execution_id} is not failed")]
    #[diagnostic(code(flowline::orchestrator::not_failed))]
    NotFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
    },

    /// The node claim was lost to a concurrent caller.
    #[error("node {node_id} in execution {execution_id} was claimed concurrently")]
    #[diagnostic(code(flowline::orchestrator::claim_lost))]
    ClaimLost {
        execution_id: ExecutionId,
        node_id: NodeId,
    },
}

type Result<T> = std::result::Result<T, OrchestratorError>;

/// Readiness of one node given its upstream edge states.
enum Resolution {
    /// Some upstream edge is unresolved; wait.
    Blocked,
    /// All edges resolved but none delivered data: the node skips.
    Skip,
    /// All edges resolved with data: dispatch with these inputs.
    Ready(InputMap),
}

/// Workflow execution engine entry point.
///
/// One orchestrator serves many concurrent executions; per-execution state
/// lives in the store, not in this struct. Admin operations (`pause`,
/// `cancel`, `resume`, `retry_node`) return explicit errors rather than
/// silently no-oping.
pub struct Orchestrator {
    registry: Arc<BlockRegistry>,
    store: Arc<dyn ExecutionStore>,
    config: EngineConfig,
    bus: EventBus,
    emitter: EventEmitter,
    dispatcher: NodeDispatcher,
    active: Mutex<FxHashMap<ExecutionId, CancellationToken>>,
    shutting_down: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator with the default stdout event bus.
    #[must_use]
    pub fn new(
        registry: Arc<BlockRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> Self {
        Self::with_bus(registry, store, config, EventBus::default(), true)
    }

    /// Create an orchestrator with a custom event bus (streaming sinks,
    /// memory sinks for tests).
    #[must_use]
    pub fn with_bus(
        registry: Arc<BlockRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
        bus: EventBus,
        start_listener: bool,
    ) -> Self {
        if start_listener {
            bus.listen_for_events();
        }
        let emitter = bus.emitter();
        let policy = DispatchPolicy::new(store.clone(), config.retry, config.breaker);
        let dispatcher = NodeDispatcher {
            store: store.clone(),
            registry: registry.clone(),
            policy,
            emitter: emitter.clone(),
            heartbeat_interval: config.heartbeat_interval,
            default_node_timeout: config.default_node_timeout,
        };
        Self {
            registry,
            store,
            config,
            bus,
            emitter,
            dispatcher,
            active: Mutex::new(FxHashMap::default()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Begin a graceful shutdown: drive loops stop dispatching new nodes,
    /// drain their in-flight handlers, and return with their executions
    /// left `Running` for [`recover`](Self::recover) on the next start.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// The event bus, for attaching additional sinks.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Validate a workflow and create an execution for it. This is the
    /// single trigger-in entry point; a failed validation never produces an
    /// execution record.
    #[instrument(skip(self, workflow, trigger), fields(workflow = %workflow.id), err)]
    pub async fn enqueue_execution(
        &self,
        workflow: &Workflow,
        trigger: Value,
    ) -> Result<ExecutionId> {
        validate(workflow, &self.registry)?;
        let record = self.store.create_execution(workflow, trigger).await?;
        let _ = self.emitter.emit(EventPayload::ExecutionStatus {
            execution_id: record.id.clone(),
            status: ExecutionStatus::Pending,
        });
        self.store
            .append_log(LogRecord::execution(
                &record.id,
                LogLevel::Info,
                format!("execution enqueued for workflow {} v{}", record.workflow_id, record.workflow_version),
            ))
            .await?;
        tracing::info!(execution = %record.id, workflow = %record.workflow_id, "execution enqueued");
        Ok(record.id)
    }

    /// Enqueue and drive to the first stopping point (terminal or paused).
    pub async fn execute(
        &self,
        workflow: &Workflow,
        trigger: Value,
    ) -> Result<ExecutionRecord> {
        let execution_id = self.enqueue_execution(workflow, trigger).await?;
        self.run(&execution_id).await
    }

    /// Drive an execution in a background task.
    pub fn spawn_run(
        self: &Arc<Self>,
        execution_id: &str,
    ) -> tokio::task::JoinHandle<Result<ExecutionRecord>> {
        let this = Arc::clone(self);
        let execution_id = execution_id.to_string();
        tokio::spawn(async move { this.run(&execution_id).await })
    }

    /// Drive an execution until it completes, fails, is cancelled, or
    /// pauses. Safe to call concurrently or after a crash: the store claim
    /// keeps every node at one dispatch.
    #[instrument(skip(self), err)]
    pub async fn run(&self, execution_id: &str) -> Result<ExecutionRecord> {
        let record = self.store.execution(execution_id).await?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        let validated = validate(&record.workflow, &self.registry)?;
        match record.status {
            ExecutionStatus::Pending => {
                self.set_execution_status(execution_id, ExecutionStatus::Running)
                    .await?;
            }
            ExecutionStatus::Running => {}
            // Parked: only an explicit resume moves it forward again.
            ExecutionStatus::Paused => return Ok(record),
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                return Ok(record)
            }
        }

        let cancel = self.cancel_token(execution_id);
        let semaphore = Arc::new(Semaphore::new(self.config.max_node_parallelism));
        let mut inflight: JoinSet<NodeTaskResult> = JoinSet::new();
        let mut inflight_nodes: FxHashSet<NodeId> = FxHashSet::default();

        loop {
            // Admin operations act through the store; honor them between
            // dispatch rounds.
            let current = self.store.execution(execution_id).await?;
            match current.status {
                ExecutionStatus::Paused => {
                    self.drain(&mut inflight).await;
                    break;
                }
                ExecutionStatus::Cancelled => {
                    cancel.cancel();
                    self.drain(&mut inflight).await;
                    break;
                }
                ExecutionStatus::Completed | ExecutionStatus::Failed => {
                    self.drain(&mut inflight).await;
                    break;
                }
                ExecutionStatus::Pending | ExecutionStatus::Running => {}
            }
            if cancel.is_cancelled() {
                if !self.execution_is_terminal(execution_id).await? {
                    self.fail_execution(execution_id, "execution cancelled".to_string(), true)
                        .await?;
                }
                self.drain(&mut inflight).await;
                break;
            }
            if self.is_shutting_down() {
                // Leave the execution Running; recovery resumes it.
                self.drain(&mut inflight).await;
                break;
            }

            let states = self.node_state_map(execution_id).await?;
            let mut progressed = false;
            for node_id in validated.topo_order() {
                if inflight_nodes.contains(node_id) {
                    continue;
                }
                let status = states
                    .get(node_id)
                    .map_or(NodeStatus::Pending, |r| r.status);
                // Running here means another instance owns the claim (or a
                // crashed one left it); the claim below settles ownership.
                if status.is_terminal() || status == NodeStatus::Paused {
                    continue;
                }
                let node = validated
                    .node(node_id)
                    .expect("topo order only contains known nodes");
                match self.resolve_incoming(&validated, &states, node, &current.trigger) {
                    Resolution::Blocked => {}
                    Resolution::Skip => {
                        self.skip_node(execution_id, node_id).await?;
                        progressed = true;
                    }
                    Resolution::Ready(inputs) => {
                        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                            // Fan-out limit reached; dispatch more after a
                            // completion frees a slot.
                            break;
                        };
                        let claimed = self
                            .store
                            .try_claim_node(
                                execution_id,
                                node_id,
                                self.config.heartbeat_timeout_chrono(),
                            )
                            .await?;
                        if !claimed {
                            continue;
                        }
                        let prior_retries = states.get(node_id).map_or(0, |r| r.retry_count);
                        let dispatcher = self.dispatcher.clone();
                        let execution_id = execution_id.to_string();
                        let node = node.clone();
                        let cancel = cancel.clone();
                        inflight_nodes.insert(node.id.clone());
                        inflight.spawn(async move {
                            let _permit = permit;
                            dispatcher
                                .dispatch(&execution_id, node, inputs, cancel, prior_retries)
                                .await
                        });
                        progressed = true;
                    }
                }
            }

            if inflight.is_empty() {
                if progressed {
                    continue;
                }
                // Nothing running and nothing newly ready: settle the
                // execution's fate from stored node states.
                let states = self.node_state_map(execution_id).await?;
                if self.settle(execution_id, &validated, &states).await? {
                    break;
                }
                // A foreign claim is still live; wait for it to finish or
                // go stale.
                tokio::time::sleep(self.config.heartbeat_interval).await;
                continue;
            }

            let joined = inflight
                .join_next()
                .await
                .expect("join_next on non-empty set");
            match joined {
                Ok(result) => {
                    inflight_nodes.remove(&result.node_id);
                    match result.disposition {
                        Disposition::Completed => {}
                        Disposition::Paused => {
                            // A concurrent cancel wins over the pause.
                            if !self.execution_is_terminal(execution_id).await? {
                                self.set_execution_status(execution_id, ExecutionStatus::Paused)
                                    .await?;
                            }
                            self.drain(&mut inflight).await;
                            break;
                        }
                        Disposition::Failed { propagate, error } => {
                            if propagate {
                                if !self.execution_is_terminal(execution_id).await? {
                                    self.fail_execution(
                                        execution_id,
                                        format!("node {} failed: {error}", result.node_id),
                                        false,
                                    )
                                    .await?;
                                }
                                // No new dispatch; in-flight handlers get
                                // the cancellation signal.
                                cancel.cancel();
                                self.drain(&mut inflight).await;
                                break;
                            }
                            // Continue-on-failure: dependents resolve as
                            // skipped on the next scan.
                        }
                    }
                }
                Err(join_error) => {
                    if !self.execution_is_terminal(execution_id).await? {
                        self.fail_execution(
                            execution_id,
                            format!("node task panicked: {join_error}"),
                            false,
                        )
                        .await?;
                    }
                    cancel.cancel();
                    self.drain(&mut inflight).await;
                    break;
                }
            }
        }

        self.release_cancel_token(execution_id);
        Ok(self.store.execution(execution_id).await?)
    }

    /// Administrative pause: stop dispatching new nodes. In-flight handlers
    /// run to completion; their results are recorded.
    #[instrument(skip(self), err)]
    pub async fn pause_execution(&self, execution_id: &str) -> Result<()> {
        let record = self.store.execution(execution_id).await?;
        match record.status {
            ExecutionStatus::Pending | ExecutionStatus::Running => {
                self.set_execution_status(execution_id, ExecutionStatus::Paused)
                    .await
            }
            status => Err(OrchestratorError::InvalidExecutionState {
                execution_id: execution_id.to_string(),
                status,
                expected: "pending or running",
            }),
        }
    }

    /// Cancel an execution: no new dispatch after the cancel is recorded;
    /// in-flight handlers are signalled and expected to stop promptly.
    #[instrument(skip(self), err)]
    pub async fn cancel(&self, execution_id: &str) -> Result<()> {
        let record = self.store.execution(execution_id).await?;
        if record.status.is_terminal() {
            return Err(OrchestratorError::InvalidExecutionState {
                execution_id: execution_id.to_string(),
                status: record.status,
                expected: "a non-terminal status",
            });
        }
        self.store
            .set_execution_result(execution_id, None, Some("cancelled by operator".to_string()))
            .await?;
        self.set_execution_status(execution_id, ExecutionStatus::Cancelled)
            .await?;
        if let Some(token) = self.active.lock().unwrap().get(execution_id) {
            token.cancel();
        }
        Ok(())
    }

    /// Resume a paused node with external data merged into its pending
    /// input, then keep driving the execution. The node dispatches exactly
    /// once more; upstream nodes are not re-run.
    #[instrument(skip(self, resume_data), err)]
    pub async fn resume(
        &self,
        execution_id: &str,
        node_id: &str,
        resume_data: Value,
    ) -> Result<ExecutionRecord> {
        let node_record = self
            .store
            .node_execution(execution_id, node_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotPaused {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            })?;
        if node_record.status != NodeStatus::Paused {
            return Err(OrchestratorError::NotPaused {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            });
        }
        let snapshot = self
            .store
            .load_pause_snapshot(execution_id, node_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotPaused {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            })?;

        let merged = merge_json(snapshot.pending_input, resume_data);
        self.store
            .clear_pause_snapshot(execution_id, node_id)
            .await?;
        self.store
            .reset_node_for_retry(execution_id, node_id)
            .await?;
        self.store
            .record_node_input(execution_id, node_id, merged.clone())
            .await?;
        let claimed = self
            .store
            .try_claim_node(
                execution_id,
                node_id,
                self.config.heartbeat_timeout_chrono(),
            )
            .await?;
        if !claimed {
            return Err(OrchestratorError::ClaimLost {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            });
        }
        self.set_execution_status(execution_id, ExecutionStatus::Running)
            .await?;

        let record = self.store.execution(execution_id).await?;
        let node = record
            .workflow
            .node(node_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: "workflow node",
                id: node_id.to_string(),
            })?;
        let cancel = self.cancel_token(execution_id);
        let result = self
            .dispatcher
            .dispatch(
                execution_id,
                node,
                value_to_inputs(&merged),
                cancel,
                node_record.retry_count,
            )
            .await;

        match result.disposition {
            Disposition::Completed | Disposition::Failed { propagate: false, .. } => {
                self.run(execution_id).await
            }
            Disposition::Paused => {
                self.set_execution_status(execution_id, ExecutionStatus::Paused)
                    .await?;
                self.release_cancel_token(execution_id);
                Ok(self.store.execution(execution_id).await?)
            }
            Disposition::Failed { propagate: true, error } => {
                self.fail_execution(
                    execution_id,
                    format!("node {node_id} failed: {error}"),
                    false,
                )
                .await?;
                self.release_cancel_token(execution_id);
                Ok(self.store.execution(execution_id).await?)
            }
        }
    }

    /// Administrative retry of a failed node: reset it to pending and keep
    /// driving. Inputs are rebuilt from stored upstream outputs.
    #[instrument(skip(self), err)]
    pub async fn retry_node(&self, execution_id: &str, node_id: &str) -> Result<ExecutionRecord> {
        let node_record = self
            .store
            .node_execution(execution_id, node_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFailed {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            })?;
        if node_record.status != NodeStatus::Failed {
            return Err(OrchestratorError::NotFailed {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
            });
        }
        self.store
            .reset_node_for_retry(execution_id, node_id)
            .await?;
        self.store
            .set_execution_result(execution_id, None, None)
            .await?;
        self.set_execution_status(execution_id, ExecutionStatus::Running)
            .await?;
        self.run(execution_id).await
    }

    // ---- internals ----

    fn cancel_token(&self, execution_id: &str) -> CancellationToken {
        self.active
            .lock()
            .unwrap()
            .entry(execution_id.to_string())
            .or_default()
            .clone()
    }

    fn release_cancel_token(&self, execution_id: &str) {
        self.active.lock().unwrap().remove(execution_id);
    }

    async fn execution_is_terminal(&self, execution_id: &str) -> Result<bool> {
        Ok(self.store.execution(execution_id).await?.status.is_terminal())
    }

    async fn node_state_map(
        &self,
        execution_id: &str,
    ) -> Result<FxHashMap<NodeId, NodeExecutionRecord>> {
        Ok(self
            .store
            .node_executions(execution_id)
            .await?
            .into_iter()
            .map(|r| (r.node_id.clone(), r))
            .collect())
    }

    fn resolve_incoming(
        &self,
        validated: &ValidatedWorkflow,
        states: &FxHashMap<NodeId, NodeExecutionRecord>,
        node: &NodeSpec,
        trigger: &Value,
    ) -> Resolution {
        let mut inputs: InputMap = node
            .input_defaults
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let edges = validated.incoming(&node.id);
        if edges.is_empty() {
            // Entry node: the trigger payload is its input.
            inputs.insert("trigger".to_string(), trigger.clone());
            return Resolution::Ready(inputs);
        }

        let mut any_data = false;
        for edge in edges {
            let source_status = states
                .get(&edge.source)
                .map_or(NodeStatus::Pending, |r| r.status);
            match source_status {
                NodeStatus::Completed => {
                    let output = states
                        .get(&edge.source)
                        .and_then(|r| r.output.clone())
                        .unwrap_or_default();
                    let takes_branch = edge
                        .source_handle
                        .as_deref()
                        .is_none_or(|handle| match &output.branch {
                            Some(branch) => branch == handle,
                            None => true,
                        });
                    if !takes_branch {
                        continue; // resolved: untaken branch, no data
                    }
                    any_data = true;
                    let value = edge
                        .source_handle
                        .as_deref()
                        .and_then(|handle| output.values.get(handle).cloned())
                        .unwrap_or_else(|| {
                            Value::Object(
                                output
                                    .values
                                    .iter()
                                    .map(|(k, v)| (k.clone(), v.clone()))
                                    .collect::<Map<String, Value>>(),
                            )
                        });
                    match &edge.target_handle {
                        Some(handle) => {
                            inputs.insert(handle.clone(), value);
                        }
                        None => match value {
                            // No explicit input name: object payloads
                            // spread into the input map, scalars bind
                            // under the source node's id.
                            Value::Object(map) => {
                                for (k, v) in map {
                                    inputs.insert(k, v);
                                }
                            }
                            other => {
                                inputs.insert(edge.source.clone(), other);
                            }
                        },
                    }
                }
                NodeStatus::Skipped => {}
                NodeStatus::Failed => {
                    let continues = validated
                        .node(&edge.source)
                        .is_some_and(|n| n.failure_policy.continues_on_failure());
                    if !continues {
                        // The execution is failing; settle() handles it.
                        return Resolution::Blocked;
                    }
                    // Absorbed failure: resolved, no data.
                }
                NodeStatus::Pending | NodeStatus::Running | NodeStatus::Paused => {
                    return Resolution::Blocked;
                }
            }
        }

        if any_data {
            Resolution::Ready(inputs)
        } else {
            Resolution::Skip
        }
    }

    async fn skip_node(&self, execution_id: &str, node_id: &str) -> Result<()> {
        self.store
            .create_node_execution(execution_id, node_id)
            .await?;
        self.store
            .record_node_result(execution_id, node_id, NodeStatus::Skipped, None, None, 0)
            .await?;
        let _ = self.emitter.emit(EventPayload::NodeStatus {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            status: NodeStatus::Skipped,
            attempt: 0,
        });
        Ok(())
    }

    /// Decide the execution's fate when nothing is in flight and nothing
    /// new became ready. Returns `true` when settled (loop breaks) and
    /// `false` when a foreign running claim exists (loop waits for it to
    /// finish or go stale).
    async fn settle(
        &self,
        execution_id: &str,
        validated: &ValidatedWorkflow,
        states: &FxHashMap<NodeId, NodeExecutionRecord>,
    ) -> Result<bool> {
        // A recorded propagate-failure (e.g. found during crash recovery)
        // fails the execution.
        for record in states.values() {
            if record.status == NodeStatus::Failed {
                let continues = validated
                    .node(&record.node_id)
                    .is_some_and(|n| n.failure_policy.continues_on_failure());
                if !continues {
                    let error = record
                        .error
                        .clone()
                        .unwrap_or_else(|| "node failed".to_string());
                    self.fail_execution(
                        execution_id,
                        format!("node {} failed: {error}", record.node_id),
                        false,
                    )
                    .await?;
                    return Ok(true);
                }
            }
        }
        if states.values().any(|r| r.status == NodeStatus::Paused) {
            self.set_execution_status(execution_id, ExecutionStatus::Paused)
                .await?;
            return Ok(true);
        }
        if states.values().any(|r| r.status == NodeStatus::Running) {
            return Ok(false);
        }

        let all_terminal = validated.topo_order().iter().all(|node_id| {
            states
                .get(node_id)
                .is_some_and(|r| r.status.is_terminal())
        });
        if all_terminal {
            let output = self.collect_output(validated, states);
            self.store
                .set_execution_result(execution_id, Some(output), None)
                .await?;
            self.set_execution_status(execution_id, ExecutionStatus::Completed)
                .await?;
            self.store
                .append_log(LogRecord::execution(
                    execution_id,
                    LogLevel::Info,
                    "execution completed",
                ))
                .await?;
            return Ok(true);
        }

        // Valid DAGs always make progress; reaching here means stored state
        // is inconsistent with the definition.
        self.fail_execution(
            execution_id,
            "execution stalled: no runnable nodes remain".to_string(),
            false,
        )
        .await?;
        Ok(true)
    }

    /// Final output: merged values of terminal leaf nodes, topological
    /// order, later keys winning.
    fn collect_output(
        &self,
        validated: &ValidatedWorkflow,
        states: &FxHashMap<NodeId, NodeExecutionRecord>,
    ) -> Value {
        let mut merged = Map::new();
        for node_id in validated.topo_order() {
            if !validated.outgoing(node_id).is_empty() {
                continue;
            }
            if let Some(output) = states.get(node_id).and_then(|r| r.output.as_ref()) {
                for (k, v) in &output.values {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        Value::Object(merged)
    }

    async fn set_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
    ) -> Result<()> {
        self.store
            .update_execution_status(execution_id, status)
            .await?;
        let _ = self.emitter.emit(EventPayload::ExecutionStatus {
            execution_id: execution_id.to_string(),
            status,
        });
        Ok(())
    }

    async fn fail_execution(
        &self,
        execution_id: &str,
        error: String,
        cancelled: bool,
    ) -> Result<()> {
        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        self.store
            .set_execution_result(execution_id, None, Some(error.clone()))
            .await?;
        self.set_execution_status(execution_id, status).await?;
        self.store
            .append_log(LogRecord::execution(execution_id, LogLevel::Error, error))
            .await?;
        Ok(())
    }

    async fn drain(&self, inflight: &mut JoinSet<NodeTaskResult>) {
        while let Some(result) = inflight.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "in-flight node task failed during drain");
            }
        }
    }
}

/// Convert a pending-input JSON value into the handler input map. Object
/// fields become named inputs; anything else binds under `"input"`.
pub(crate) fn value_to_inputs(value: &Value) -> InputMap {
    let mut inputs = InputMap::default();
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                inputs.insert(k.clone(), v.clone());
            }
        }
        Value::Null => {}
        other => {
            inputs.insert("input".to_string(), other.clone());
        }
    }
    inputs
}
