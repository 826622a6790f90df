use async_trait::async_trait;

use crate::types::TokenUsage;
use crate::{Error, Result};

/// One model reply: generated text, the engine-reported finish reason (if
/// any), and the token usage of this single call.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub text: String,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
}

/// A text-generation model behind a single-call interface. The retry driver
/// owns attempts, validation, and backoff; implementations only perform one
/// call per `generate`.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<ModelReply>;

    /// Whether an error from this provider is a transient rate-limit/quota
    /// condition worth backing off and retrying. The default is a
    /// best-effort substring probe over the error message; providers with
    /// structured error types should override it.
    fn is_rate_limited(&self, err: &Error) -> bool {
        default_rate_limit_probe(err)
    }
}

pub fn default_rate_limit_probe(err: &Error) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("resource_exhausted")
        || message.contains("429")
        || message.contains("quota")
        || (message.contains("rate") && message.contains("limit"))
}
