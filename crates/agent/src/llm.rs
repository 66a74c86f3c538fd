use async_trait::async_trait;
use thiserror::Error;

use toolgate_core::catalog::ToolSpec;
use toolgate_core::domain::{AssistantMessage, Message};

/// Model faults, classified by how the caller recovers from them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    /// Provider-side strict tool-call schema failure.
    #[error("failed to call a function: {0}")]
    FunctionCall(String),
    /// Tool-call arguments that parsed but do not fit the tool's schema.
    #[error("tool call validation failed: {0}")]
    Validation(String),
    #[error("model request timed out after {0}s")]
    Timeout(u64),
    #[error("model invocation failed: {0}")]
    Fatal(String),
}

impl LlmError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::FunctionCall(_) => "function_call",
            Self::Validation(_) => "validation",
            Self::Timeout(_) => "timeout",
            Self::Fatal(_) => "fatal",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LlmRequest<'a> {
    pub messages: &'a [Message],
    /// `None` invokes the model with no tools bound.
    pub tools: Option<&'a [ToolSpec]>,
    pub strict: bool,
    pub temperature: Option<f32>,
}

impl<'a> LlmRequest<'a> {
    pub fn with_tools(messages: &'a [Message], tools: &'a [ToolSpec]) -> Self {
        Self { messages, tools: Some(tools), strict: true, temperature: None }
    }

    pub fn plain(messages: &'a [Message]) -> Self {
        Self { messages, tools: None, strict: false, temperature: None }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Callback receiving incremental assistant text as it streams in.
pub type DeltaSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

pub fn ignore_deltas(_: &str) {}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(
        &self,
        request: LlmRequest<'_>,
        on_delta: DeltaSink<'_>,
    ) -> Result<AssistantMessage, LlmError>;
}
