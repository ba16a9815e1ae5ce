//! Typed, per-block-kind node configuration.
//!
//! Node configuration arrives from the authoring layer as JSON. Rather than
//! threading an untyped map through the pipeline, each block kind owns a
//! config struct and [`BlockConfig`] is the tagged union over them. The
//! validator rejects a node whose config variant does not match its block
//! kind before any execution record exists.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::BlockKind;

/// Tagged union of block configurations, keyed by block type.
///
/// Serialized form uses an internal `type` tag so workflow JSON reads as
/// `{"type": "http_request", "method": "GET", ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockConfig {
    Trigger(TriggerConfig),
    Condition(ConditionConfig),
    HttpRequest(HttpConfig),
    Email(EmailConfig),
    ChainTransaction(ChainTxConfig),
    Agent(AgentConfig),
    /// Escape hatch for user-registered block types; the registered handler
    /// is responsible for interpreting `params`.
    Custom {
        kind: String,
        #[serde(default)]
        params: Value,
    },
}

impl BlockConfig {
    /// The block kind this configuration belongs to.
    #[must_use]
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Trigger(_) => BlockKind::Trigger,
            Self::Condition(_) => BlockKind::Condition,
            Self::HttpRequest(_) => BlockKind::HttpRequest,
            Self::Email(_) => BlockKind::Email,
            Self::ChainTransaction(_) => BlockKind::ChainTransaction,
            Self::Agent(_) => BlockKind::Agent,
            Self::Custom { kind, .. } => BlockKind::Custom(kind.clone()),
        }
    }
}

/// Trigger blocks forward the execution's trigger payload downstream.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Fallback payload when the trigger fires with no body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_payload: Option<Value>,
}

/// Comparison operator for condition blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// Condition blocks compare one named input against a constant and route
/// along the `"true"` or `"false"` handle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Name of the input to inspect.
    pub input: String,
    pub op: CompareOp,
    /// Right-hand operand.
    pub value: Value,
}

/// HTTP request block configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl HttpConfig {
    fn default_method() -> String {
        "GET".to_string()
    }
}

/// Email block configuration; delivery goes through the [`Mailer`]
/// capability.
///
/// [`Mailer`]: crate::blocks::Mailer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub to: String,
    pub subject: String,
    /// Body template; `{{name}}` placeholders are filled from inputs.
    #[serde(default)]
    pub body: String,
}

/// On-chain transaction block configuration.
///
/// Monetary and gas quantities are decimal strings to survive JSON
/// round-trips of values beyond `2^53`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainTxConfig {
    pub chain_id: u64,
    /// Destination address.
    pub to: String,
    /// Value in the chain's base unit, decimal string.
    #[serde(default)]
    pub value: String,
    pub gas_limit: u64,
    /// Starting gas price in the chain's base unit, decimal string.
    pub gas_price: String,
    /// Calldata, hex-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// AI-agent block configuration; completion goes through the
/// [`AgentBackend`] capability.
///
/// [`AgentBackend`]: crate::blocks::AgentBackend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
