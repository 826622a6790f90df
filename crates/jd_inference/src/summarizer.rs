use std::sync::Arc;

use jd_core::models::ChatModel;
use jd_core::{Article, SummaryBundle, TokenUsage};

use crate::diagnostics::Diagnostics;
use crate::message::render_message;
use crate::retry::{ModelCall, Validation};
use crate::sections::{is_incomplete_text, parse_sections};

/// Requested length of the condensed English summary, in characters.
pub const SUMMARY_TARGET_CHARS: usize = 1000;

/// Anything shorter than this is rejected as a non-summary.
const MIN_SUMMARY_CHARS: usize = 200;

const EN_MAX_OUTPUT_TOKENS: u32 = 2600;
const RU_MAX_OUTPUT_TOKENS: u32 = 3200;

/// Two-stage summarization: condense the English abstract, then translate
/// title and summary to Russian. Each stage runs through the retry driver
/// independently; the translation stage only runs after the summary stage
/// succeeded, and a failure of either aborts the item with that stage's
/// reason tag.
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    diagnostics: Diagnostics,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>, diagnostics: Diagnostics) -> Self {
        Self { model, diagnostics }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Full two-stage run for one article. Returns the token usage of every
    /// attempt plus either the persistable bundle or a machine-readable
    /// failure reason.
    pub async fn summarize_article(
        &self,
        article: &Article,
    ) -> (TokenUsage, std::result::Result<SummaryBundle, String>) {
        let mut usage = TokenUsage::default();

        let abstract_en = match article.abstract_en.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return (usage, Err("missing_abstract".to_string())),
        };

        let (en_usage, en_result) = self.summarize_abstract(&article.pmid, abstract_en).await;
        usage.add(en_usage);
        let summary_en = match en_result {
            Ok(summary) => summary,
            Err(reason) => return (usage, Err(reason)),
        };

        let title_en = article.title_en.as_deref().unwrap_or("");
        let (ru_usage, ru_result) = self
            .translate_summary(&article.pmid, title_en, &summary_en)
            .await;
        usage.add(ru_usage);
        let (title_ru, summary_ru) = match ru_result {
            Ok(translated) => translated,
            Err(reason) => return (usage, Err(reason)),
        };

        let message_html = render_message(
            &title_ru,
            article.journal.as_deref().unwrap_or(""),
            article.publication_date.as_deref().unwrap_or(""),
            &article.authors,
            &summary_ru,
            article.canonical_link().unwrap_or(""),
        );

        (
            usage,
            Ok(SummaryBundle {
                title_ru,
                summary_en,
                summary_ru,
                message_html,
            }),
        )
    }

    async fn summarize_abstract(
        &self,
        pmid: &str,
        abstract_en: &str,
    ) -> (TokenUsage, std::result::Result<String, String>) {
        let call = ModelCall {
            model: self.model.as_ref(),
            diagnostics: &self.diagnostics,
            item_id: pmid,
            stage: "summary",
            reason_prefix: "en",
            max_output_tokens: EN_MAX_OUTPUT_TOKENS,
        };

        call.drive(en_summary_prompt(abstract_en), |text, finish_reason| {
            let summary = match parse_sections(text, &["EN_SUMMARY"])
                .remove("EN_SUMMARY")
                .flatten()
            {
                Some(summary) => summary,
                None => {
                    return Validation::Reprompt(
                        "Format is invalid. Return exactly EN_SUMMARY field.",
                    )
                }
            };

            if is_incomplete_text(&summary, finish_reason) {
                return Validation::Reprompt(
                    "Summary is incomplete. Return a complete summary with a full ending and no ellipsis.",
                );
            }
            if summary.chars().count() < MIN_SUMMARY_CHARS {
                return Validation::Reprompt("Summary is too short. Rewrite around 1000 characters.");
            }
            Validation::Accept(summary)
        })
        .await
    }

    async fn translate_summary(
        &self,
        pmid: &str,
        title_en: &str,
        summary_en: &str,
    ) -> (TokenUsage, std::result::Result<(String, String), String>) {
        let call = ModelCall {
            model: self.model.as_ref(),
            diagnostics: &self.diagnostics,
            item_id: pmid,
            stage: "translate",
            reason_prefix: "ru",
            max_output_tokens: RU_MAX_OUTPUT_TOKENS,
        };

        call.drive(translate_prompt(title_en, summary_en), |text, finish_reason| {
            let mut parsed = parse_sections(text, &["RU_TITLE", "RU_SUMMARY"]);
            let (title_ru, summary_ru) = match (
                parsed.remove("RU_TITLE").flatten(),
                parsed.remove("RU_SUMMARY").flatten(),
            ) {
                (Some(title), Some(summary)) => (title, summary),
                _ => {
                    return Validation::Reprompt("Format is invalid. Return only RU_TITLE and RU_SUMMARY.")
                }
            };

            if is_incomplete_text(&summary_ru, finish_reason) {
                return Validation::Reprompt(
                    "RU summary is incomplete. Translate the entire English summary and end with a full sentence.",
                );
            }
            Validation::Accept((title_ru, summary_ru))
        })
        .await
    }
}

fn en_summary_prompt(abstract_en: &str) -> String {
    format!(
        "Summarize the abstract in English.\n\
         \n\
         Rules:\n\
         - Use only the facts in the abstract.\n\
         - Plain text only, no markdown, no bullets.\n\
         - Target length is about {SUMMARY_TARGET_CHARS} characters.\n\
         - Keep it concise but complete (do not end with ellipsis).\n\
         \n\
         Return strictly in this format:\n\
         EN_SUMMARY:\n\
         ...\n\
         \n\
         ABSTRACT (EN):\n\
         {abstract_en}"
    )
}

fn translate_prompt(title_en: &str, summary_en: &str) -> String {
    format!(
        "Translate to Russian:\n\
         1) Article title\n\
         2) English summary\n\
         \n\
         Rules:\n\
         - Preserve meaning and clinical details.\n\
         - Translate the full summary completely, without omissions or shortening.\n\
         - Plain text only, no markdown, no bullets.\n\
         \n\
         Return strictly in this format:\n\
         RU_TITLE: ...\n\
         RU_SUMMARY:\n\
         ...\n\
         \n\
         TITLE (EN): {title_en}\n\
         \n\
         SUMMARY (EN):\n\
         {summary_en}"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use jd_core::models::ModelReply;
    use jd_core::{Error, Result};

    use super::*;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<ModelReply>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<ModelReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(0),
            }
        }

        fn reply(text: String) -> Result<ModelReply> {
            Ok(ModelReply {
                text,
                finish_reason: Some("STOP".to_string()),
                usage: TokenUsage {
                    input: 100,
                    output: 50,
                    total: 150,
                },
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _prompt: &str, _max_output_tokens: u32) -> Result<ModelReply> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted model ran out of replies")
        }
    }

    fn long_summary() -> String {
        "This randomized trial enrolled a large cohort and met its primary endpoint. "
            .repeat(4)
            .trim_end()
            .to_string()
    }

    fn article() -> Article {
        Article {
            pmid: "42".to_string(),
            journal: Some("Nature".to_string()),
            publication_date: Some("2024-03-01".to_string()),
            title_en: Some("A trial of something".to_string()),
            abstract_en: Some("Background: something. Results: it worked.".to_string()),
            authors: vec!["Alice Smith".to_string()],
            link: Some("https://doi.org/10.1000/x".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_stage_success_builds_bundle() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::reply(format!("EN_SUMMARY:\n{}", long_summary())),
            ScriptedModel::reply(
                "RU_TITLE: Испытание нового препарата\nRU_SUMMARY:\nПолное резюме на русском."
                    .to_string(),
            ),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let summarizer = Summarizer::new(Arc::new(model), Diagnostics::new(dir.path()));

        let (usage, result) = summarizer.summarize_article(&article()).await;
        let bundle = result.unwrap();

        assert_eq!(bundle.title_ru, "Испытание нового препарата");
        assert_eq!(bundle.summary_en, long_summary());
        assert_eq!(bundle.summary_ru, "Полное резюме на русском.");
        assert!(bundle.message_html.starts_with("<b>Испытание нового препарата</b>"));
        assert!(bundle.message_html.contains("Авторы: Alice Smith"));
        assert!(bundle
            .message_html
            .contains("<a href=\"https://doi.org/10.1000/x\">Оригинальная статья</a>"));
        assert_eq!(usage.total, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_abstract_rejected_before_any_call() {
        let model = ScriptedModel::new(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let summarizer = Summarizer::new(Arc::new(model), Diagnostics::new(dir.path()));

        let mut article = article();
        article.abstract_en = Some("   ".to_string());
        let (usage, result) = summarizer.summarize_article(&article).await;

        assert_eq!(result.unwrap_err(), "missing_abstract");
        assert_eq!(usage.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn short_summary_is_reprompted() {
        let model = ScriptedModel::new(vec![
            ScriptedModel::reply("EN_SUMMARY:\nToo short.".to_string()),
            ScriptedModel::reply(format!("EN_SUMMARY:\n{}", long_summary())),
            ScriptedModel::reply("RU_TITLE: Т\nRU_SUMMARY:\nРезюме.".to_string()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let summarizer = Summarizer::new(Arc::new(model), Diagnostics::new(dir.path()));

        let (_, result) = summarizer.summarize_article(&article()).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn translation_failure_carries_ru_reason() {
        let mut replies = vec![ScriptedModel::reply(format!(
            "EN_SUMMARY:\n{}",
            long_summary()
        ))];
        replies.push(Err(Error::Model("invalid request".to_string())));
        let model = ScriptedModel::new(replies);
        let dir = tempfile::tempdir().unwrap();
        let summarizer = Summarizer::new(Arc::new(model), Diagnostics::new(dir.path()));

        let (usage, result) = summarizer.summarize_article(&article()).await;
        assert_eq!(result.unwrap_err(), "ru_exception:Model");
        // Stage-A tokens are still reported after a stage-B failure.
        assert_eq!(usage.total, 150);
    }
}
