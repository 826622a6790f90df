use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use jd_core::models::{ChatModel, ModelReply};
use jd_core::{Error, Result, TokenUsage};

pub const MODEL_ID: &str = "gemini-2.5-flash";

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f32 = 0.2;

pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model_id: String,
}

impl fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiModel")
            .field("api_key", &"<redacted>")
            .field("model_id", &self.model_id)
            .finish()
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    /// Thinking disabled to avoid hidden-token truncation and reduce cost.
    thinking_config: ThinkingConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl GeminiModel {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Model("Gemini API key is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model_id: MODEL_ID.to_string(),
        })
    }
}

#[async_trait]
impl ChatModel for GeminiModel {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<ModelReply> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
                max_output_tokens,
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        };

        let response = self
            .client
            .post(format!(
                "{BASE_URL}/models/{}:generateContent",
                self.model_id
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Keep the body in the message so rate-limit classification can
            // see RESOURCE_EXHAUSTED/quota markers alongside the status.
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("{status}: {body}")));
        }

        let payload: GenerateResponse = response.json().await?;

        let candidate = payload.candidates.first();
        let text = candidate
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string();
        let finish_reason = candidate.and_then(|c| c.finish_reason.clone());

        let usage = payload
            .usage_metadata
            .map(|u| {
                let total = if u.total_token_count > 0 {
                    u.total_token_count
                } else {
                    u.prompt_token_count + u.candidates_token_count
                };
                TokenUsage {
                    input: u.prompt_token_count,
                    output: u.candidates_token_count,
                    total,
                }
            })
            .unwrap_or_default();

        Ok(ModelReply {
            text,
            finish_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        assert!(GeminiModel::new("").is_err());
        let model = GeminiModel::new("test-key").unwrap();
        assert_eq!(model.name(), "Gemini");
        // Debug output must not leak the key.
        assert!(!format!("{model:?}").contains("test-key"));
    }

    #[test]
    fn provider_errors_classify_as_rate_limited() {
        let model = GeminiModel::new("test-key").unwrap();
        assert!(model.is_rate_limited(&Error::Model(
            "429 Too Many Requests: RESOURCE_EXHAUSTED".to_string()
        )));
        assert!(!model.is_rate_limited(&Error::Model("400 Bad Request: oops".to_string())));
    }
}
