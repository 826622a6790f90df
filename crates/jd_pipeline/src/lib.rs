use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use jd_core::models::ChatModel;
use jd_core::source::ArticleSource;
use jd_core::storage::DigestStore;
use jd_core::{Article, PipelineStats, Result};
use jd_inference::{Diagnostics, Summarizer};

/// Pause between items so consecutive two-call round-trips do not hammer the
/// provider.
const ITEM_DELAY: Duration = Duration::from_millis(350);

/// Result of reconciling one fetched batch against the store.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub skipped_existing: usize,
    /// Identifiers inserted this run; scopes the summarization pass to
    /// genuinely new items instead of the whole backlog.
    pub new_pmids: Vec<String>,
}

/// Inserts only articles whose identifier is not yet known. The upsert
/// leaves summarization columns untouched, so replaying a batch is safe.
pub async fn ingest(store: &dyn DigestStore, fetched: &[Article]) -> Result<IngestOutcome> {
    let pmids: Vec<String> = fetched
        .iter()
        .map(|a| a.pmid.clone())
        .filter(|p| !p.is_empty())
        .collect();
    let existing = store.existing_pmids(&pmids).await?;

    let fresh: Vec<Article> = fetched
        .iter()
        .filter(|a| !a.pmid.is_empty() && !existing.contains(&a.pmid))
        .cloned()
        .collect();
    let skipped_existing = fetched.len() - fresh.len();

    let inserted = store.upsert_raw_articles(&fresh).await?;
    Ok(IngestOutcome {
        inserted,
        skipped_existing,
        new_pmids: fresh.into_iter().map(|a| a.pmid).collect(),
    })
}

/// End-to-end run driver: fetch → dedup/ingest → summarize pending → stats.
///
/// An upstream fetch failure degrades to zero fetched articles and never
/// aborts the rest of the run; a missing model short-circuits the whole
/// summarization pass. Items are processed strictly sequentially, and one
/// item's failure does not affect its siblings.
pub struct Pipeline {
    store: Arc<dyn DigestStore>,
    source: Arc<dyn ArticleSource>,
    summarizer: Option<Summarizer>,
    item_delay: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DigestStore>,
        source: Arc<dyn ArticleSource>,
        model: Option<Arc<dyn ChatModel>>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            store,
            source,
            summarizer: model.map(|m| Summarizer::new(m, diagnostics)),
            item_delay: ITEM_DELAY,
        }
    }

    pub async fn run(&self, days_back: u32, limit: u32) -> Result<PipelineStats> {
        let started = Instant::now();
        let mut stats = PipelineStats::default();

        let fetched = match self.source.fetch_recent(days_back).await {
            Ok(articles) => articles,
            Err(e) => {
                warn!("fetch failed: {e}");
                Vec::new()
            }
        };
        stats.fetched_raw = fetched.len() as u64;

        let outcome = ingest(self.store.as_ref(), &fetched).await?;
        stats.fetched_new = outcome.inserted as u64;
        stats.skipped_existing = outcome.skipped_existing as u64;

        let pending = self
            .store
            .unsummarized_for_pmids(&outcome.new_pmids, limit)
            .await?;
        stats.pending = pending.len() as u64;
        if pending.is_empty() {
            return Ok(stats);
        }

        let summarizer = match &self.summarizer {
            Some(summarizer) => summarizer,
            None => {
                warn!("model API key is missing; cannot summarize pending articles");
                stats.failed = stats.pending;
                stats.record_failure("missing_api_key", stats.pending);
                return Ok(stats);
            }
        };

        let total = pending.len();
        for (idx, article) in pending.iter().enumerate() {
            info!("[{}/{total}] PMID {} processing", idx + 1, article.pmid);

            let (usage, result) = summarizer.summarize_article(article).await;
            stats.tokens.add(usage);

            match result {
                Ok(bundle) => {
                    self.store.mark_summarized(&article.pmid, &bundle).await?;
                    stats.summarized += 1;
                    info!(
                        "[{}/{total}] PMID {} OK | ok={} failed={} | item_tokens={} | run_tokens={}",
                        idx + 1,
                        article.pmid,
                        stats.summarized,
                        stats.failed,
                        usage.total,
                        stats.tokens.total,
                    );
                }
                Err(reason) => {
                    stats.failed += 1;
                    stats.record_failure(&reason, 1);
                    info!(
                        "[{}/{total}] PMID {} FAILED ({reason}) | ok={} failed={} | run_tokens={}",
                        idx + 1,
                        article.pmid,
                        stats.summarized,
                        stats.failed,
                        stats.tokens.total,
                    );
                    continue;
                }
            }

            tokio::time::sleep(self.item_delay).await;
        }

        stats.elapsed_secs = started.elapsed().as_secs();
        Ok(stats)
    }
}
