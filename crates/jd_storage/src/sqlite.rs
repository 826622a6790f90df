use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use jd_core::storage::DigestStore;
use jd_core::{Article, ArticleCounts, Error, Result, SummaryBundle};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        pmid TEXT PRIMARY KEY,

        journal TEXT,
        publication_date TEXT,

        title_en TEXT,
        abstract_en TEXT,
        summary_en TEXT,
        authors_json TEXT,

        doi TEXT,
        link TEXT,
        pubmed_url TEXT,
        doi_url TEXT,

        fetched_at TEXT,

        title_ru TEXT,
        summary_ru TEXT,
        message_html TEXT,
        summarized_at TEXT,

        sent_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_articles_fetched_at ON articles(fetched_at)",
    "CREATE INDEX IF NOT EXISTS idx_articles_summarized_at ON articles(summarized_at)",
    "CREATE INDEX IF NOT EXISTS idx_articles_sent_at ON articles(sent_at)",
    r#"
    CREATE TABLE IF NOT EXISTS subscribers (
        chat_id INTEGER PRIMARY KEY,
        is_active INTEGER NOT NULL DEFAULT 1,
        username TEXT,
        first_name TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_subscribers_active ON subscribers(is_active)",
    r#"
    CREATE TABLE IF NOT EXISTS delivery_log (
        chat_id INTEGER NOT NULL,
        target_date TEXT NOT NULL,
        article_count INTEGER NOT NULL DEFAULT 0,
        sent_at TEXT NOT NULL,
        PRIMARY KEY(chat_id, target_date)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_delivery_date ON delivery_log(target_date)",
    r#"
    CREATE TABLE IF NOT EXISTS fetch_runs (
        target_date TEXT PRIMARY KEY,
        mode TEXT NOT NULL,
        fetched_count INTEGER NOT NULL DEFAULT 0,
        fetched_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS bot_state (
        key TEXT PRIMARY KEY,
        value TEXT
    )
    "#,
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(db_err)?;

        for migration in MIGRATIONS {
            sqlx::query(migration).execute(&pool).await.map_err(db_err)?;
        }

        Ok(Self { pool })
    }
}

fn db_err(err: sqlx::Error) -> Error {
    Error::Database(err.to_string())
}

fn utc_now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    match raw {
        Some(value) => {
            let parsed = DateTime::parse_from_rfc3339(&value)
                .map_err(|e| Error::Database(format!("bad timestamp {value:?}: {e}")))?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
        None => Ok(None),
    }
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    let authors_json: Option<String> = row.try_get("authors_json").map_err(db_err)?;
    let authors = match authors_json {
        Some(raw) => serde_json::from_str(&raw)?,
        None => Vec::new(),
    };

    Ok(Article {
        pmid: row.try_get("pmid").map_err(db_err)?,
        journal: row.try_get("journal").map_err(db_err)?,
        publication_date: row.try_get("publication_date").map_err(db_err)?,
        title_en: row.try_get("title_en").map_err(db_err)?,
        abstract_en: row.try_get("abstract_en").map_err(db_err)?,
        authors,
        doi: row.try_get("doi").map_err(db_err)?,
        link: row.try_get("link").map_err(db_err)?,
        pubmed_url: row.try_get("pubmed_url").map_err(db_err)?,
        doi_url: row.try_get("doi_url").map_err(db_err)?,
        fetched_at: parse_timestamp(row.try_get("fetched_at").map_err(db_err)?)?,
        title_ru: row.try_get("title_ru").map_err(db_err)?,
        summary_en: row.try_get("summary_en").map_err(db_err)?,
        summary_ru: row.try_get("summary_ru").map_err(db_err)?,
        message_html: row.try_get("message_html").map_err(db_err)?,
        summarized_at: parse_timestamp(row.try_get("summarized_at").map_err(db_err)?)?,
        sent_at: parse_timestamp(row.try_get("sent_at").map_err(db_err)?)?,
    })
}

fn unique_pmids(pmids: &[String]) -> Vec<String> {
    pmids
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[async_trait]
impl DigestStore for SqliteStore {
    async fn upsert_raw_articles(&self, articles: &[Article]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }

        let now = utc_now_iso();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut written = 0usize;

        for article in articles {
            if article.pmid.is_empty() {
                continue;
            }
            let authors_json = serde_json::to_string(&article.authors)?;
            sqlx::query(
                r#"
                INSERT INTO articles (
                    pmid, journal, publication_date, title_en, abstract_en, authors_json,
                    doi, link, pubmed_url, doi_url, fetched_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(pmid) DO UPDATE SET
                    journal=excluded.journal,
                    publication_date=excluded.publication_date,
                    title_en=excluded.title_en,
                    abstract_en=excluded.abstract_en,
                    authors_json=excluded.authors_json,
                    doi=excluded.doi,
                    link=excluded.link,
                    pubmed_url=excluded.pubmed_url,
                    doi_url=excluded.doi_url,
                    fetched_at=excluded.fetched_at
                "#,
            )
            .bind(&article.pmid)
            .bind(article.journal.as_deref())
            .bind(article.publication_date.as_deref())
            .bind(article.title_en.as_deref())
            .bind(article.abstract_en.as_deref())
            .bind(authors_json)
            .bind(article.doi.as_deref())
            .bind(article.link.as_deref())
            .bind(article.pubmed_url.as_deref())
            .bind(article.doi_url.as_deref())
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            written += 1;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(written)
    }

    async fn existing_pmids(&self, pmids: &[String]) -> Result<HashSet<String>> {
        let unique = unique_pmids(pmids);
        if unique.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; unique.len()].join(",");
        let sql = format!("SELECT pmid FROM articles WHERE pmid IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for pmid in &unique {
            query = query.bind(pmid);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        let mut known = HashSet::with_capacity(rows.len());
        for row in rows {
            known.insert(row.try_get("pmid").map_err(db_err)?);
        }
        Ok(known)
    }

    async fn unsummarized_for_pmids(&self, pmids: &[String], limit: u32) -> Result<Vec<Article>> {
        let unique = unique_pmids(pmids);
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; unique.len()].join(",");
        let sql = format!(
            r#"
            SELECT *
            FROM articles
            WHERE summarized_at IS NULL
              AND abstract_en IS NOT NULL
              AND LENGTH(TRIM(abstract_en)) > 0
              AND pmid IN ({placeholders})
            ORDER BY fetched_at DESC
            LIMIT ?
            "#
        );
        let mut query = sqlx::query(&sql);
        for pmid in &unique {
            query = query.bind(pmid);
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(article_from_row).collect()
    }

    async fn mark_summarized(&self, pmid: &str, summary: &SummaryBundle) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE articles
            SET title_ru = ?,
                summary_en = ?,
                summary_ru = ?,
                message_html = ?,
                summarized_at = ?
            WHERE pmid = ?
            "#,
        )
        .bind(&summary.title_ru)
        .bind(&summary.summary_en)
        .bind(&summary.summary_ru)
        .bind(&summary.message_html)
        .bind(utc_now_iso())
        .bind(pmid)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn unsent(&self, limit: u32) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM articles
            WHERE summarized_at IS NOT NULL
              AND sent_at IS NULL
            ORDER BY summarized_at ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(article_from_row).collect()
    }

    async fn mark_sent(&self, pmid: &str) -> Result<()> {
        sqlx::query("UPDATE articles SET sent_at = ? WHERE pmid = ?")
            .bind(utc_now_iso())
            .bind(pmid)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn summarized_by_date(&self, target_date: &str) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM articles
            WHERE summarized_at IS NOT NULL
              AND substr(COALESCE(publication_date, ''), 1, 10) = ?
            ORDER BY journal ASC, title_en ASC
            "#,
        )
        .bind(target_date)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(article_from_row).collect()
    }

    async fn summarized_between(&self, date_from: &str, date_to: &str) -> Result<Vec<Article>> {
        let rows = sqlx::query(
            r#"
            SELECT *
            FROM articles
            WHERE summarized_at IS NOT NULL
              AND substr(COALESCE(publication_date, ''), 1, 10) >= ?
              AND substr(COALESCE(publication_date, ''), 1, 10) <= ?
            ORDER BY publication_date DESC, journal ASC, title_en ASC
            "#,
        )
        .bind(date_from)
        .bind(date_to)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(article_from_row).collect()
    }

    async fn article_counts(&self) -> Result<ArticleCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN summarized_at IS NOT NULL THEN 1 ELSE 0 END) AS summarized
            FROM articles
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let total: i64 = row.try_get("total").map_err(db_err)?;
        let summarized: i64 = row
            .try_get::<Option<i64>, _>("summarized")
            .map_err(db_err)?
            .unwrap_or(0);
        Ok(ArticleCounts {
            total: total as u64,
            summarized: summarized as u64,
            pending: (total - summarized).max(0) as u64,
        })
    }

    async fn upsert_subscriber(
        &self,
        chat_id: i64,
        is_active: bool,
        username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<()> {
        let now = utc_now_iso();
        sqlx::query(
            r#"
            INSERT INTO subscribers (chat_id, is_active, username, first_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                is_active = excluded.is_active,
                username = COALESCE(excluded.username, subscribers.username),
                first_name = COALESCE(excluded.first_name, subscribers.first_name),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chat_id)
        .bind(is_active as i64)
        .bind(username.filter(|u| !u.is_empty()))
        .bind(first_name.filter(|f| !f.is_empty()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_subscription(&self, chat_id: i64, is_active: bool) -> Result<()> {
        let now = utc_now_iso();
        sqlx::query(
            r#"
            INSERT INTO subscribers (chat_id, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(chat_id)
        .bind(is_active as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn is_subscribed(&self, chat_id: i64) -> Result<bool> {
        let row = sqlx::query("SELECT is_active FROM subscribers WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>("is_active").map_err(db_err)? == 1),
            None => Ok(false),
        }
    }

    async fn active_subscribers(&self) -> Result<Vec<i64>> {
        let rows =
            sqlx::query("SELECT chat_id FROM subscribers WHERE is_active = 1 ORDER BY chat_id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        rows.iter()
            .map(|row| row.try_get("chat_id").map_err(db_err))
            .collect()
    }

    async fn mark_delivery(
        &self,
        chat_id: i64,
        target_date: &str,
        article_count: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_log (chat_id, target_date, article_count, sent_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(chat_id, target_date) DO UPDATE SET
                article_count = excluded.article_count,
                sent_at = excluded.sent_at
            "#,
        )
        .bind(chat_id)
        .bind(target_date)
        .bind(article_count as i64)
        .bind(utc_now_iso())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn was_delivered(&self, chat_id: i64, target_date: &str) -> Result<bool> {
        let row =
            sqlx::query("SELECT 1 FROM delivery_log WHERE chat_id = ? AND target_date = ? LIMIT 1")
                .bind(chat_id)
                .bind(target_date)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn mark_fetch_run(
        &self,
        target_date: &str,
        mode: &str,
        fetched_count: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO fetch_runs (target_date, mode, fetched_count, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(target_date) DO UPDATE SET
                mode = excluded.mode,
                fetched_count = excluded.fetched_count,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(target_date)
        .bind(mode)
        .bind(fetched_count as i64)
        .bind(utc_now_iso())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn has_fetch_run(&self, target_date: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM fetch_runs WHERE target_date = ? LIMIT 1")
            .bind(target_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.is_some())
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM bot_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => Ok(row.try_get("value").map_err(db_err)?),
            None => Ok(None),
        }
    }
}
