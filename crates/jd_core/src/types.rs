use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One literature record, tracked from fetch through summarization to
/// delivery. Summarization fields are all-or-nothing: either none of
/// `title_ru`/`summary_en`/`summary_ru`/`message_html`/`summarized_at` are
/// set, or all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Article {
    pub pmid: String,
    pub journal: Option<String>,
    /// Best-effort publication date: `YYYY`, `YYYY-MM`, or `YYYY-MM-DD`.
    pub publication_date: Option<String>,
    pub title_en: Option<String>,
    pub abstract_en: Option<String>,
    pub authors: Vec<String>,
    pub doi: Option<String>,
    /// Canonical link (DOI link preferred, else the PubMed page).
    pub link: Option<String>,
    pub pubmed_url: Option<String>,
    pub doi_url: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub title_ru: Option<String>,
    pub summary_en: Option<String>,
    pub summary_ru: Option<String>,
    pub message_html: Option<String>,
    pub summarized_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn has_abstract(&self) -> bool {
        self.abstract_en
            .as_deref()
            .map_or(false, |a| !a.trim().is_empty())
    }

    pub fn canonical_link(&self) -> Option<&str> {
        self.link
            .as_deref()
            .or(self.doi_url.as_deref())
            .or(self.pubmed_url.as_deref())
    }
}

/// Everything the summarizer produces for one article, persisted in a single
/// atomic update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryBundle {
    pub title_ru: String,
    pub summary_en: String,
    pub summary_ru: String,
    pub message_html: String,
}

/// Token counters accumulated across model calls, including failed attempts
/// (those consumed quota too and must be reported).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        self.total += other.total;
    }
}

/// Aggregate outcome of one pipeline run. Always produced, even when every
/// stage failed, so callers can report a clear zero/partial/full outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    /// Articles actually inserted this run.
    pub fetched_new: u64,
    /// Articles the source returned before dedup.
    pub fetched_raw: u64,
    pub skipped_existing: u64,
    pub pending: u64,
    pub summarized: u64,
    pub failed: u64,
    pub tokens: TokenUsage,
    pub fail_reasons: BTreeMap<String, u64>,
    pub elapsed_secs: u64,
}

impl PipelineStats {
    pub fn record_failure(&mut self, reason: &str, count: u64) {
        *self.fail_reasons.entry(reason.to_string()).or_insert(0) += count;
    }

    pub fn fail_reasons_line(&self) -> String {
        if self.fail_reasons.is_empty() {
            return "none".to_string();
        }
        self.fail_reasons
            .iter()
            .map(|(reason, count)| format!("{reason}:{count}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Store-wide article counts, reported by the status command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArticleCounts {
    pub total: u64,
    pub summarized: u64,
    pub pending: u64,
}
