use std::collections::HashSet;

use async_trait::async_trait;

use crate::types::{Article, ArticleCounts, SummaryBundle};
use crate::Result;

/// Durable record store for articles, subscribers, and run bookkeeping.
///
/// Every method is a short-lived operation that commits immediately; the
/// upsert conflict semantics are the only locking the pipeline relies on.
#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Insert or refresh fetched articles. On conflict only the English/raw
    /// metadata columns are updated; summarization columns are never
    /// touched, so re-ingesting an already-summarized article keeps its
    /// Russian fields. Returns the number of rows written.
    async fn upsert_raw_articles(&self, articles: &[Article]) -> Result<usize>;

    /// Which of the given identifiers are already known.
    async fn existing_pmids(&self, pmids: &[String]) -> Result<HashSet<String>>;

    /// Pending articles among the given identifiers: not yet summarized and
    /// carrying a non-empty abstract, newest-fetched first.
    async fn unsummarized_for_pmids(&self, pmids: &[String], limit: u32) -> Result<Vec<Article>>;

    /// Persist a completed summarization in one atomic update.
    async fn mark_summarized(&self, pmid: &str, summary: &SummaryBundle) -> Result<()>;

    /// Summarized articles not yet marked sent, oldest summarization first.
    async fn unsent(&self, limit: u32) -> Result<Vec<Article>>;

    async fn mark_sent(&self, pmid: &str) -> Result<()>;

    /// Summarized articles whose publication date (date part) equals the
    /// target, ordered by journal then title.
    async fn summarized_by_date(&self, target_date: &str) -> Result<Vec<Article>>;

    /// Summarized articles in the inclusive date range, newest first.
    async fn summarized_between(&self, date_from: &str, date_to: &str) -> Result<Vec<Article>>;

    async fn article_counts(&self) -> Result<ArticleCounts>;

    /// Register or refresh a subscriber. Display metadata is only updated
    /// when the new values are non-empty; the active flag and the update
    /// timestamp are always written.
    async fn upsert_subscriber(
        &self,
        chat_id: i64,
        is_active: bool,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<()>;

    async fn set_subscription(&self, chat_id: i64, is_active: bool) -> Result<()>;

    async fn is_subscribed(&self, chat_id: i64) -> Result<bool>;

    async fn active_subscribers(&self) -> Result<Vec<i64>>;

    /// Record a completed delivery for (subscriber, target date). Presence
    /// of the record suppresses redelivery regardless of the count.
    async fn mark_delivery(&self, chat_id: i64, target_date: &str, article_count: u32)
        -> Result<()>;

    async fn was_delivered(&self, chat_id: i64, target_date: &str) -> Result<bool>;

    /// Record an ingestion attempt for the target date. Presence means the
    /// scheduler must not re-trigger ingestion for that date, regardless of
    /// how many articles were found.
    async fn mark_fetch_run(&self, target_date: &str, mode: &str, fetched_count: u32)
        -> Result<()>;

    async fn has_fetch_run(&self, target_date: &str) -> Result<bool>;

    async fn set_state(&self, key: &str, value: &str) -> Result<()>;

    async fn get_state(&self, key: &str) -> Result<Option<String>>;
}
