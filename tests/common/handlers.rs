//! Test doubles: scripted block handlers and capability stubs.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};

use flowline::blocks::{
    AgentBackend, AgentError, BlockConfig, BlockDescriptor, BlockHandler, HandlerContext,
    HandlerError, HandlerOutcome, InputMap, Mailer, MailerError, NodeOutput, PauseRequest,
};
use flowline::chain::{ChainRpc, ChainRpcError, TxReceipt, TxRequest};
use flowline::types::{BlockKind, ResourceId};

/// What a [`TestHandler`] does when dispatched.
pub enum Behavior {
    /// Complete with `{ok: true, node, echo: <inputs>}`.
    Succeed,
    /// Fail retryably for the first `times` calls, then succeed.
    FailRetryable { times: u32 },
    /// Always fail with a non-retryable error.
    FailFatal,
    /// Pause until dispatched with a `resume_token` input.
    Pause,
    /// Sleep (observing cancellation), then succeed.
    Sleep { millis: u64 },
}

/// Scripted handler for orchestrator tests. Counts calls and records the
/// inputs of every dispatch.
pub struct TestHandler {
    kind: BlockKind,
    required: &'static [&'static str],
    resource: Option<String>,
    behavior: Behavior,
    pub calls: Arc<AtomicU32>,
    pub seen_inputs: Arc<Mutex<Vec<InputMap>>>,
}

impl TestHandler {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            kind: BlockKind::Custom(name.to_string()),
            required: &[],
            resource: None,
            behavior,
            calls: Arc::new(AtomicU32::new(0)),
            seen_inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_required(mut self, required: &'static [&'static str]) -> Self {
        self.required = required;
        self
    }

    /// Pin the breaker resource, so several handlers share one breaker.
    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn success_output(&self, ctx: &HandlerContext, inputs: &InputMap) -> HandlerOutcome {
        let echo: Map<String, Value> = inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        HandlerOutcome::Output(
            NodeOutput::new()
                .with_value("ok", json!(true))
                .with_value("node", json!(ctx.node_id))
                .with_value("echo", Value::Object(echo)),
        )
    }
}

#[async_trait]
impl BlockHandler for TestHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: self.kind.clone(),
            required_inputs: self.required,
            outputs: &["ok", "node", "echo"],
        }
    }

    fn resource_id(&self, _config: &BlockConfig) -> ResourceId {
        self.resource
            .clone()
            .unwrap_or_else(|| self.kind.encode())
    }

    async fn execute(
        &self,
        _config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_inputs.lock().unwrap().push(inputs.clone());
        match &self.behavior {
            Behavior::Succeed => Ok(self.success_output(ctx, inputs)),
            Behavior::FailRetryable { times } => {
                if call <= *times {
                    Err(HandlerError::retryable(format!("transient failure {call}")))
                } else {
                    Ok(self.success_output(ctx, inputs))
                }
            }
            Behavior::FailFatal => Err(HandlerError::fatal("unrecoverable failure")),
            Behavior::Pause => match inputs.get("resume_token") {
                Some(token) => Ok(HandlerOutcome::Output(
                    NodeOutput::new()
                        .with_value("ok", json!(true))
                        .with_value("resume_token", token.clone()),
                )),
                None => Ok(HandlerOutcome::Pause(PauseRequest {
                    reason: "awaiting external input".to_string(),
                    pending_input: json!({"stage": "waiting"}),
                    wait_key: None,
                })),
            },
            Behavior::Sleep { millis } => {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => Err(HandlerError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_millis(*millis)) => {
                        Ok(self.success_output(ctx, inputs))
                    }
                }
            }
        }
    }
}

/// Mailer stub capturing sent mail.
#[derive(Clone, Default)]
pub struct StubMailer {
    pub sent: Arc<Mutex<Vec<(String, String, String)>>>,
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

/// Agent backend stub echoing the prompt.
#[derive(Clone, Default)]
pub struct StubAgent;

#[async_trait]
impl AgentBackend for StubAgent {
    async fn complete(&self, prompt: &str, _model: Option<&str>) -> Result<String, AgentError> {
        Ok(format!("echo: {prompt}"))
    }
}

/// Chain RPC double with settable receipts and scriptable broadcast
/// failures.
#[derive(Clone, Default)]
pub struct MockChain {
    pub broadcasts: Arc<Mutex<Vec<TxRequest>>>,
    receipts: Arc<Mutex<FxHashMap<String, TxReceipt>>>,
    fail_broadcasts: Arc<AtomicU32>,
    hash_counter: Arc<AtomicU32>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` broadcasts fail with a network error.
    pub fn fail_next_broadcasts(&self, times: u32) {
        self.fail_broadcasts.store(times, Ordering::SeqCst);
    }

    /// Mine a transaction: the next receipt lookup for `hash` succeeds.
    pub fn mine(&self, hash: &str, block_number: u64, success: bool) {
        self.receipts.lock().unwrap().insert(
            hash.to_string(),
            TxReceipt {
                block_number,
                gas_used: 21_000,
                success,
            },
        );
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }

    pub fn last_hash(&self) -> String {
        format!("0xhash{}", self.hash_counter.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn broadcast(&self, request: &TxRequest) -> Result<String, ChainRpcError> {
        let remaining = self.fail_broadcasts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_broadcasts.store(remaining - 1, Ordering::SeqCst);
            return Err(ChainRpcError::network("rpc unreachable"));
        }
        self.broadcasts.lock().unwrap().push(request.clone());
        let n = self.hash_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0xhash{n}"))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainRpcError> {
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }
}
