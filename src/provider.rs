//! The reasoning collaborator seam.
//!
//! The core treats reasoning as an opaque string-in/string-out call: it
//! builds a prompt, awaits the reply, and runs the reply through response
//! coercion. Concrete backends live outside this crate.

use async_trait::async_trait;
use mockall::automock;

#[derive(Debug, Clone)]
pub struct ReasonRequest {
    pub prompt: String,
    /// Declared type at the call site, used for prompt construction and
    /// response coercion.
    pub expected_type: Option<String>,
    pub trace_id: String,
}

#[derive(Debug, Clone)]
pub struct ReasonResponse {
    pub output: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("reasoning request failed: {0}")]
    RequestFailed(String),
    #[error("reasoning request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[automock]
#[async_trait]
pub trait ReasonProvider: Send + Sync {
    async fn reason(&self, request: &ReasonRequest) -> ProviderResult<ReasonResponse>;

    fn name(&self) -> &str;
}

/// Fixed-reply provider for tests and offline runs.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    reply: String,
}

impl StaticProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl ReasonProvider for StaticProvider {
    async fn reason(&self, _request: &ReasonRequest) -> ProviderResult<ReasonResponse> {
        Ok(ReasonResponse {
            output: self.reply.clone(),
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}
