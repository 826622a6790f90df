use async_trait::async_trait;

use crate::types::Article;
use crate::Result;

/// Upstream literature source. Implementations return only records carrying
/// a non-empty abstract; dedup against the store is the pipeline's job.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Fetch articles for the last `days_back` days, excluding today.
    async fn fetch_recent(&self, days_back: u32) -> Result<Vec<Article>>;
}
