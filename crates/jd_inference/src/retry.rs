use std::time::Duration;

use rand::Rng;

use jd_core::models::ChatModel;
use jd_core::TokenUsage;

use crate::diagnostics::Diagnostics;

/// Attempt budget shared by validation reprompts and rate-limit retries.
pub const MAX_MODEL_ATTEMPTS: u32 = 6;

/// Small pause between reprompted attempts so the provider is not hammered
/// on the non-backoff path.
const ATTEMPT_DELAY: Duration = Duration::from_millis(100);

/// Outcome of one validation pass over a model reply.
pub enum Validation<T> {
    Accept(T),
    /// Rejected; the instruction is prepended to the prompt for the next
    /// attempt.
    Reprompt(&'static str),
}

/// One retried model call: drives up to [`MAX_MODEL_ATTEMPTS`] attempts of a
/// single logical request with a mutable prompt.
///
/// Exit conditions, in order of evaluation per attempt:
/// - reply accepted by the validator → success;
/// - reply rejected → corrective instruction prepended, next attempt;
/// - provider error classified as rate-limit → exponential backoff with
///   jitter, prompt untouched, next attempt;
/// - any other error → immediate `<prefix>_exception:<kind>` failure, raw
///   error recorded;
/// - budget exhausted → `<prefix>_incomplete:<finish_reason>` failure, last
///   raw text recorded.
///
/// Token usage is accumulated across every attempt and returned with both
/// success and failure: failed attempts consumed quota too.
pub struct ModelCall<'a> {
    pub model: &'a dyn ChatModel,
    pub diagnostics: &'a Diagnostics,
    pub item_id: &'a str,
    pub stage: &'a str,
    pub reason_prefix: &'a str,
    pub max_output_tokens: u32,
}

impl ModelCall<'_> {
    pub async fn drive<T, F>(
        &self,
        prompt: String,
        validate: F,
    ) -> (TokenUsage, std::result::Result<T, String>)
    where
        F: Fn(&str, Option<&str>) -> Validation<T>,
    {
        let mut prompt = prompt;
        let mut usage = TokenUsage::default();
        let mut last_text = String::new();
        let mut last_finish: Option<String> = None;

        for attempt in 0..MAX_MODEL_ATTEMPTS {
            match self.model.generate(&prompt, self.max_output_tokens).await {
                Ok(reply) => {
                    usage.add(reply.usage);
                    match validate(&reply.text, reply.finish_reason.as_deref()) {
                        Validation::Accept(value) => return (usage, Ok(value)),
                        Validation::Reprompt(instruction) => {
                            last_text = reply.text;
                            last_finish = reply.finish_reason;
                            prompt = format!("{instruction}\n\n{prompt}");
                            tokio::time::sleep(ATTEMPT_DELAY).await;
                        }
                    }
                }
                Err(err) if self.model.is_rate_limited(&err) => {
                    backoff_sleep(attempt).await;
                }
                Err(err) => {
                    self.diagnostics
                        .record(self.item_id, self.stage, "exception", &err.to_string());
                    return (
                        usage,
                        Err(format!("{}_exception:{}", self.reason_prefix, err.kind())),
                    );
                }
            }
        }

        let finish = last_finish
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or("unknown");
        self.diagnostics.record(
            self.item_id,
            self.stage,
            "raw",
            &format!("finish_reason={finish}\n\n{last_text}"),
        );
        (
            usage,
            Err(format!("{}_incomplete:{}", self.reason_prefix, finish)),
        )
    }
}

/// `min(60, 2^attempt)` seconds plus uniform jitter up to 25% of the base.
async fn backoff_sleep(attempt: u32) {
    let base = (1u64 << attempt.min(6)).min(60) as f64;
    let jitter = rand::thread_rng().gen_range(0.0..=0.25 * base);
    tokio::time::sleep(Duration::from_secs_f64(base + jitter)).await;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use jd_core::models::ModelReply;
    use jd_core::{Error, Result};

    use super::*;
    use crate::sections::parse_sections;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ModelReply>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn reply(text: &str, tokens: u64) -> Result<ModelReply> {
            Ok(ModelReply {
                text: text.to_string(),
                finish_reason: Some("STOP".to_string()),
                usage: TokenUsage {
                    input: tokens,
                    output: tokens,
                    total: tokens * 2,
                },
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _max_output_tokens: u32) -> Result<ModelReply> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted model ran out of replies")
        }
    }

    fn validator(text: &str, _finish: Option<&str>) -> Validation<String> {
        match parse_sections(text, &["EN_SUMMARY"])
            .remove("EN_SUMMARY")
            .flatten()
        {
            Some(value) => Validation::Accept(value),
            None => Validation::Reprompt("Format is invalid. Return exactly EN_SUMMARY field."),
        }
    }

    fn call<'a>(model: &'a ScriptedModel, diagnostics: &'a Diagnostics) -> ModelCall<'a> {
        ModelCall {
            model,
            diagnostics,
            item_id: "111",
            stage: "summary",
            reason_prefix: "en",
            max_output_tokens: 2600,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_rate_limit_errors() {
        let model = ScriptedModel::new(vec![
            Err(Error::Model("429 Too Many Requests".to_string())),
            Err(Error::Model("RESOURCE_EXHAUSTED: quota".to_string())),
            ScriptedModel::reply("EN_SUMMARY:\nA valid summary.", 7),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path());

        let (usage, result) = call(&model, &diagnostics)
            .drive("prompt".to_string(), validator)
            .await;

        assert_eq!(result.unwrap(), "A valid summary.");
        assert_eq!(usage.total, 14);
        // Backoff never rewrites the prompt.
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts.iter().all(|p| p == "prompt"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_malformed_output_exhausts_budget() {
        let replies = (0..MAX_MODEL_ATTEMPTS)
            .map(|_| ScriptedModel::reply("no tags here", 3))
            .collect();
        let model = ScriptedModel::new(replies);
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path());

        let (usage, result) = call(&model, &diagnostics)
            .drive("prompt".to_string(), validator)
            .await;

        assert_eq!(result.unwrap_err(), "en_incomplete:STOP");
        assert_eq!(usage.total, (MAX_MODEL_ATTEMPTS as u64) * 6);

        // Every rejection prepends the corrective instruction once.
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), MAX_MODEL_ATTEMPTS as usize);
        assert!(prompts[1].starts_with("Format is invalid."));
        assert!(prompts[1].ends_with("prompt"));

        // The raw dump is written exactly once.
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["111_summary_raw.txt".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_aborts_immediately() {
        let model = ScriptedModel::new(vec![Err(Error::Database("disk on fire".to_string()))]);
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path());

        let (usage, result) = call(&model, &diagnostics)
            .drive("prompt".to_string(), validator)
            .await;

        assert_eq!(result.unwrap_err(), "en_exception:Database");
        assert_eq!(usage.total, 0);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["111_summary_exception.txt".to_string()]);
    }
}
