//! Shared engine and workflow fixtures.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use flowline::blocks::{
    BlockConfig, BlockHandler, BlockRegistry, BlockRegistryBuilder, CompareOp, ConditionConfig,
    TriggerConfig,
};
use flowline::events::{EventBus, MemorySink};
use flowline::graph::{Workflow, WorkflowBuilder};
use flowline::policy::{BreakerConfig, RetryConfig};
use flowline::runtime::{EngineConfig, Orchestrator};
use flowline::store::MemoryStore;
use flowline::types::BlockKind;

/// Engine tuning for tests: fast heartbeats, millisecond backoff, small
/// breaker cooldown.
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_heartbeat(Duration::from_millis(20), Duration::from_millis(200))
        .with_default_node_timeout(Duration::from_secs(5))
        .with_retry(RetryConfig {
            base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
        })
        .with_breaker(BreakerConfig {
            failure_threshold: 3,
            window: chrono::Duration::seconds(60),
            cooldown: chrono::Duration::milliseconds(100),
        })
}

/// Orchestrator + store + captured events for one test.
pub struct TestEngine {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub sink: MemorySink,
}

/// Build an engine whose registry contains the built-ins plus the given
/// custom handlers, events captured in memory.
pub fn engine_with(handlers: Vec<(&str, Arc<dyn BlockHandler>)>) -> TestEngine {
    let mut builder = BlockRegistry::builder();
    for (name, handler) in handlers {
        builder = builder.register(BlockKind::Custom(name.to_string()), handler);
    }
    engine_from_builder(builder)
}

/// Same, starting from a caller-prepared registry builder (capabilities
/// already injected).
pub fn engine_from_builder(builder: BlockRegistryBuilder) -> TestEngine {
    engine_from_builder_with_store(builder, Arc::new(MemoryStore::new()))
}

/// Variant sharing a caller-owned store (capability implementations that
/// persist, simulated crash recovery).
pub fn engine_from_builder_with_store(
    builder: BlockRegistryBuilder,
    store: Arc<MemoryStore>,
) -> TestEngine {
    let registry = Arc::new(builder.build());
    let sink = MemorySink::new();
    let bus = EventBus::with_sinks(vec![Box::new(sink.clone())]);
    let orchestrator = Arc::new(Orchestrator::with_bus(
        registry,
        store.clone(),
        fast_config(),
        bus,
        true,
    ));
    TestEngine {
        orchestrator,
        store,
        sink,
    }
}

/// Config for a custom probe block.
pub fn probe_config(name: &str) -> BlockConfig {
    BlockConfig::Custom {
        kind: name.to_string(),
        params: json!({}),
    }
}

/// The branch scenario: trigger -> condition(price > 100) ->
/// [true: probe_a, false: probe_b].
pub fn branch_workflow() -> Workflow {
    WorkflowBuilder::new("price-alert")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block(
            "check",
            BlockConfig::Condition(ConditionConfig {
                input: "price".into(),
                op: CompareOp::Gt,
                value: json!(100),
            }),
        )
        .add_block("email_a", probe_config("probe_a"))
        .add_block("email_b", probe_config("probe_b"))
        .add_edge("start", "check")
        .add_branch("check", "true", "email_a")
        .add_branch("check", "false", "email_b")
        .build()
}

/// Linear two-step workflow: trigger -> one custom block.
pub fn linear_workflow(block_name: &str) -> Workflow {
    WorkflowBuilder::new("linear")
        .add_block("start", BlockConfig::Trigger(TriggerConfig::default()))
        .add_block("work", probe_config(block_name))
        .add_edge("start", "work")
        .build()
}
