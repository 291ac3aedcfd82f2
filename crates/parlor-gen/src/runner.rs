//! The model-runner seam.
//!
//! A [`ModelRunner`] is the only place the workspace touches a model
//! provider. Everything above it — engines, the dispatcher, the applier —
//! sees fully resolved prompts going in and JSON coming out, so tests
//! swap in a canned runner and the whole stack runs without network.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// Transient provider failure (5xx, connection reset, capacity).
    /// Image diffusion retries these once.
    #[error("provider error: {0}")]
    Provider(String),

    /// The provider refused the prompt. Never retried: the same prompt
    /// gets the same refusal.
    #[error("content filtered by provider")]
    ContentFiltered,

    /// The provider answered with something that isn't usable output.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Parameters for a plain text completion.
#[derive(Debug, Clone)]
pub struct TextCompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
}

/// Parameters for a chat completion, optionally with a structured-output
/// contract the dispatcher validates.
#[derive(Debug, Clone)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub schema: Option<serde_json::Value>,
}

/// Parameters for either image path.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
}

/// One model provider. Implementations are expected to be cheap to
/// share behind an `Arc`.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    /// Free-text completion; the returned string is the generation.
    async fn text_completion(&self, req: TextCompletionRequest) -> Result<String, RunnerError>;

    /// Chat completion. When the request carries a schema the provider
    /// is asked for structured output, and the dispatcher re-checks the
    /// shape regardless.
    async fn chat_completion(
        &self,
        req: ChatCompletionRequest,
    ) -> Result<serde_json::Value, RunnerError>;

    /// Diffusion image generation; returns a URL to the stored image.
    async fn image_diffusion(&self, req: ImageRequest) -> Result<String, RunnerError>;

    /// Single-pass image generation; returns a URL to the stored image.
    async fn image_direct(&self, req: ImageRequest) -> Result<String, RunnerError>;
}
