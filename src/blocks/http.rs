//! HTTP request block.
//!
//! The only block that speaks HTTP; the orchestrator never sees the
//! request. Transport failures and 5xx/429 responses are retryable, other
//! error statuses are fatal.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::config::BlockConfig;
use super::handler::{
    BlockDescriptor, BlockHandler, HandlerContext, HandlerError, HandlerOutcome, InputMap,
    NodeOutput,
};
use crate::types::{BlockKind, ResourceId};

pub struct HttpHandler {
    client: reqwest::Client,
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl HttpHandler {
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlockHandler for HttpHandler {
    fn descriptor(&self) -> BlockDescriptor {
        BlockDescriptor {
            kind: BlockKind::HttpRequest,
            required_inputs: &[],
            outputs: &["status", "body"],
        }
    }

    /// Breaker granularity is the target host, so one failing API does not
    /// trip calls to others.
    fn resource_id(&self, config: &BlockConfig) -> ResourceId {
        if let BlockConfig::HttpRequest(http) = config {
            if let Ok(url) = reqwest::Url::parse(&http.url) {
                if let Some(host) = url.host_str() {
                    return format!("http:{host}");
                }
            }
        }
        "http".to_string()
    }

    async fn execute(
        &self,
        config: &BlockConfig,
        inputs: &InputMap,
        ctx: &HandlerContext,
    ) -> Result<HandlerOutcome, HandlerError> {
        let BlockConfig::HttpRequest(config) = config else {
            return Err(HandlerError::fatal("http block got mismatched config"));
        };
        let method = reqwest::Method::from_bytes(config.method.as_bytes())
            .map_err(|_| HandlerError::fatal(format!("invalid http method {:?}", config.method)))?;

        let mut request = self.client.request(method, &config.url);
        for (name, value) in &config.headers {
            request = request.header(name, value);
        }
        let body = config.body.clone().or_else(|| inputs.get("body").cloned());
        if let Some(body) = body {
            request = request.json(&body);
        }

        ctx.info(format!("{} {}", config.method, config.url)).await;

        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(HandlerError::Cancelled),
            result = request.send() => result.map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    HandlerError::retryable(format!("http transport error: {e}"))
                } else {
                    HandlerError::fatal(format!("http error: {e}"))
                }
            })?,
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| HandlerError::retryable(format!("http body read error: {e}")))?;
        let body_value: Value =
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        if status.is_server_error() || status.as_u16() == 429 {
            return Err(HandlerError::retryable(format!(
                "http status {status} from {}",
                config.url
            )));
        }
        if !status.is_success() {
            return Err(HandlerError::fatal(format!(
                "http status {status} from {}",
                config.url
            )));
        }

        Ok(HandlerOutcome::Output(
            NodeOutput::new()
                .with_value("status", json!(status.as_u16()))
                .with_value("body", body_value),
        ))
    }
}
