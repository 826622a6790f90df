use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use tracing::info;

use jd_core::storage::DigestStore;
use jd_core::Result;
use jd_pipeline::Pipeline;

use crate::api::Transport;
use crate::digest::fallback_message;

pub const STATE_BOOTSTRAP_DONE: &str = "bootstrap_last7_done";

const BOOTSTRAP_DAYS: u32 = 7;
const BOOTSTRAP_ITEM_LIMIT: u32 = 1000;
const DAILY_ITEM_LIMIT: u32 = 500;

/// Pause between per-article sends to respect transport rate limits.
const SEND_DELAY: Duration = Duration::from_millis(150);

/// Once-daily gate: true at or after the configured wall-clock threshold.
pub fn past_daily_threshold(now: DateTime<Tz>, hour: u32, minute: u32) -> bool {
    (now.hour(), now.minute()) >= (hour, minute)
}

/// The fixed target date for a day's cycle: yesterday in the delivery
/// timezone.
pub fn target_yesterday(now: DateTime<Tz>) -> String {
    (now.date_naive() - ChronoDuration::days(1))
        .format("%Y-%m-%d")
        .to_string()
}

/// Daily delivery driver, evaluated on every iteration of the polling loop.
/// Both the expensive fetch and the per-subscriber sends are guarded by
/// persisted idempotency records, so re-evaluating many times per day after
/// the threshold triggers each at most once.
pub struct Scheduler {
    store: Arc<dyn DigestStore>,
    transport: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    timezone: Tz,
    daily_hour: u32,
    daily_minute: u32,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn DigestStore>,
        transport: Arc<dyn Transport>,
        pipeline: Arc<Pipeline>,
        timezone: Tz,
        daily_hour: u32,
        daily_minute: u32,
    ) -> Self {
        Self {
            store,
            transport,
            pipeline,
            timezone,
            daily_hour,
            daily_minute,
        }
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    pub async fn run_due_jobs(&self) -> Result<()> {
        let now = self.now();
        if !past_daily_threshold(now, self.daily_hour, self.daily_minute) {
            return Ok(());
        }

        let target = target_yesterday(now);
        self.run_daily_fetch_if_needed(&target).await?;
        self.run_daily_send_if_needed(&target).await
    }

    /// One-time backfill on first-ever start: fetch and summarize the
    /// trailing week, then mark those dates fetched so the daily job does
    /// not immediately redo them.
    pub async fn bootstrap_if_needed(&self) -> Result<()> {
        if self.store.get_state(STATE_BOOTSTRAP_DONE).await?.as_deref() == Some("1") {
            return Ok(());
        }

        info!("bootstrap: fetch + summarize for last {BOOTSTRAP_DAYS} days");
        let stats = self
            .pipeline
            .run(BOOTSTRAP_DAYS, BOOTSTRAP_ITEM_LIMIT)
            .await?;
        info!(
            "bootstrap done: fetched={} summarized={} failed={}",
            stats.fetched_new, stats.summarized, stats.failed
        );

        let today = self.now().date_naive();
        for days_ago in 1..=BOOTSTRAP_DAYS {
            let date = (today - ChronoDuration::days(days_ago as i64))
                .format("%Y-%m-%d")
                .to_string();
            self.store
                .mark_fetch_run(&date, "bootstrap7", stats.fetched_new as u32)
                .await?;
        }

        self.store.set_state(STATE_BOOTSTRAP_DONE, "1").await
    }

    /// Marks the run even when every item failed: the policy is one attempt
    /// per day, not one success per day.
    pub async fn run_daily_fetch_if_needed(&self, target: &str) -> Result<()> {
        if self.store.has_fetch_run(target).await? {
            return Ok(());
        }

        info!("daily fetch + summarize for {target}");
        let stats = self.pipeline.run(1, DAILY_ITEM_LIMIT).await?;
        self.store
            .mark_fetch_run(target, "daily1", stats.fetched_new as u32)
            .await?;

        info!(
            "{target}: fetched={} summarized={} failed={}",
            stats.fetched_new, stats.summarized, stats.failed
        );
        Ok(())
    }

    pub async fn run_daily_send_if_needed(&self, target: &str) -> Result<()> {
        for chat_id in self.store.active_subscribers().await? {
            if self.store.was_delivered(chat_id, target).await? {
                continue;
            }
            let sent = self.send_daily_digest(chat_id, target).await?;
            self.store.mark_delivery(chat_id, target, sent).await?;
            info!("delivered {sent} articles to chat {chat_id} for {target}");
        }
        Ok(())
    }

    async fn send_daily_digest(&self, chat_id: i64, target: &str) -> Result<u32> {
        let articles = self.store.summarized_by_date(target).await?;
        if articles.is_empty() {
            self.transport
                .send_message(chat_id, &format!("За {target} нет обработанных статей."), None)
                .await?;
            return Ok(0);
        }

        self.transport
            .send_message(
                chat_id,
                &format!(
                    "<b>Ежедневная подборка за {target}</b>\nКоличество: {}",
                    articles.len()
                ),
                None,
            )
            .await?;

        let mut sent = 0;
        for article in &articles {
            let text = match &article.message_html {
                Some(message) => message.clone(),
                None => fallback_message(article),
            };
            self.transport.send_message(chat_id, &text, None).await?;
            sent += 1;
            tokio::time::sleep(SEND_DELAY).await;
        }
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use jd_core::source::ArticleSource;
    use jd_core::{Article, SummaryBundle};
    use jd_inference::Diagnostics;
    use jd_storage::SqliteStore;
    use tempfile::tempdir;

    use super::*;
    use crate::api::{InlineKeyboard, Update};

    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<(i64, String)>>,
        pub answered: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                answered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_message(
            &self,
            chat_id: i64,
            text: &str,
            _keyboard: Option<&InlineKeyboard>,
        ) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }

        async fn get_updates(
            &self,
            _offset: Option<i64>,
            _timeout_secs: u32,
        ) -> Result<Vec<Update>> {
            Ok(Vec::new())
        }

        async fn answer_callback(&self, _callback_id: &str, text: Option<&str>) -> Result<()> {
            self.answered
                .lock()
                .unwrap()
                .push(text.unwrap_or("").to_string());
            Ok(())
        }
    }

    struct CountingSource {
        calls: Mutex<u32>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ArticleSource for CountingSource {
        async fn fetch_recent(&self, _days_back: u32) -> Result<Vec<Article>> {
            *self.calls.lock().unwrap() += 1;
            Ok(Vec::new())
        }
    }

    fn summarized_article(pmid: &str, date: &str) -> (Article, SummaryBundle) {
        let article = Article {
            pmid: pmid.to_string(),
            journal: Some("Nature".to_string()),
            publication_date: Some(date.to_string()),
            title_en: Some("A trial".to_string()),
            abstract_en: Some("Background: data.".to_string()),
            ..Default::default()
        };
        let bundle = SummaryBundle {
            title_ru: "Заголовок".to_string(),
            summary_en: "Summary.".to_string(),
            summary_ru: "Резюме.".to_string(),
            message_html: format!("<b>Статья {pmid}</b>"),
        };
        (article, bundle)
    }

    async fn scheduler_with(
        dir: &tempfile::TempDir,
        source: Arc<CountingSource>,
    ) -> (Arc<SqliteStore>, Arc<RecordingTransport>, Scheduler) {
        let store = Arc::new(SqliteStore::open(&dir.path().join("test.db")).await.unwrap());
        let transport = Arc::new(RecordingTransport::new());
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            source,
            None,
            Diagnostics::new(dir.path().join("raw")),
        ));
        let scheduler = Scheduler::new(
            store.clone(),
            transport.clone(),
            pipeline,
            chrono_tz::Europe::Paris,
            9,
            0,
        );
        (store, transport, scheduler)
    }

    #[test]
    fn threshold_gate_boundaries() {
        let tz = chrono_tz::Europe::Paris;
        let before = tz.with_ymd_and_hms(2024, 3, 2, 8, 59, 59).unwrap();
        let exact = tz.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        let after = tz.with_ymd_and_hms(2024, 3, 2, 18, 30, 0).unwrap();

        assert!(!past_daily_threshold(before, 9, 0));
        assert!(past_daily_threshold(exact, 9, 0));
        assert!(past_daily_threshold(after, 9, 0));
        assert_eq!(target_yesterday(exact), "2024-03-01");
    }

    #[tokio::test]
    async fn delivery_skips_already_delivered_subscriber() {
        let dir = tempdir().unwrap();
        let source = Arc::new(CountingSource::new());
        let (store, transport, scheduler) = scheduler_with(&dir, source).await;

        let (article, bundle) = summarized_article("900", "2024-03-01");
        store.upsert_raw_articles(&[article]).await.unwrap();
        store.mark_summarized("900", &bundle).await.unwrap();

        store.set_subscription(1, true).await.unwrap();
        store.set_subscription(2, true).await.unwrap();
        store.mark_delivery(1, "2024-03-01", 1).await.unwrap();

        scheduler
            .run_daily_send_if_needed("2024-03-01")
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        // Header plus one article, only for the second subscriber.
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(chat_id, _)| *chat_id == 2));
        assert!(sent[0].1.contains("Ежедневная подборка за 2024-03-01"));
        assert!(sent[0].1.contains("Количество: 1"));
        assert_eq!(sent[1].1, "<b>Статья 900</b>");
        drop(sent);

        assert!(store.was_delivered(2, "2024-03-01").await.unwrap());

        // A second evaluation is a no-op for everyone.
        scheduler
            .run_daily_send_if_needed("2024-03-01")
            .await
            .unwrap();
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_day_still_notifies_and_records() {
        let dir = tempdir().unwrap();
        let source = Arc::new(CountingSource::new());
        let (store, transport, scheduler) = scheduler_with(&dir, source).await;

        store.set_subscription(5, true).await.unwrap();
        scheduler
            .run_daily_send_if_needed("2024-03-01")
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("нет обработанных статей"));
        drop(sent);

        // Even a zero-article day is recorded and never redelivered.
        assert!(store.was_delivered(5, "2024-03-01").await.unwrap());
    }

    #[tokio::test]
    async fn existing_fetch_run_suppresses_pipeline() {
        let dir = tempdir().unwrap();
        let source = Arc::new(CountingSource::new());
        let (store, _transport, scheduler) = scheduler_with(&dir, source.clone()).await;

        store
            .mark_fetch_run("2024-03-01", "daily1", 3)
            .await
            .unwrap();
        scheduler
            .run_daily_fetch_if_needed("2024-03-01")
            .await
            .unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn daily_fetch_runs_once_then_marks() {
        let dir = tempdir().unwrap();
        let source = Arc::new(CountingSource::new());
        let (store, _transport, scheduler) = scheduler_with(&dir, source.clone()).await;

        scheduler
            .run_daily_fetch_if_needed("2024-03-01")
            .await
            .unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 1);
        assert!(store.has_fetch_run("2024-03-01").await.unwrap());

        scheduler
            .run_daily_fetch_if_needed("2024-03-01")
            .await
            .unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn bootstrap_runs_once_ever() {
        let dir = tempdir().unwrap();
        let source = Arc::new(CountingSource::new());
        let (store, _transport, scheduler) = scheduler_with(&dir, source.clone()).await;

        scheduler.bootstrap_if_needed().await.unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 1);
        assert_eq!(
            store.get_state(STATE_BOOTSTRAP_DONE).await.unwrap().as_deref(),
            Some("1")
        );

        // Trailing-week markers keep the daily job from refetching.
        let yesterday = target_yesterday(Utc::now().with_timezone(&chrono_tz::Europe::Paris));
        assert!(store.has_fetch_run(&yesterday).await.unwrap());

        scheduler.bootstrap_if_needed().await.unwrap();
        assert_eq!(*source.calls.lock().unwrap(), 1);
    }
}
