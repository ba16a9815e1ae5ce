//! Capability interfaces for block side effects.
//!
//! Blocks whose side effects need external infrastructure (mail relay, AI
//! model) receive it through these seams. The engine core ships no
//! implementations beyond test doubles; the embedding service injects real
//! ones at registry build time.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

/// Outbound email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailerError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum MailerError {
    /// Transport failure; the send may be retried.
    #[error("mail transport error: {0}")]
    #[diagnostic(code(flowline::mailer::transport))]
    Transport(String),

    /// The relay rejected the message; retrying will not help.
    #[error("mail rejected: {0}")]
    #[diagnostic(code(flowline::mailer::rejected))]
    Rejected(String),
}

impl MailerError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Completion backend for agent blocks.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn complete(&self, prompt: &str, model: Option<&str>) -> Result<String, AgentError>;
}

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    /// Backend unreachable or overloaded; retryable.
    #[error("agent backend unavailable: {0}")]
    #[diagnostic(code(flowline::agent::unavailable))]
    Unavailable(String),

    /// The backend declined the request; not retryable.
    #[error("agent request refused: {0}")]
    #[diagnostic(code(flowline::agent::refused))]
    Refused(String),
}

impl AgentError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
