use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::debug;

use jd_core::config::{Config, DateType};
use jd_core::source::ArticleSource;
use jd_core::{Article, Error, Result};

use crate::dates::date_range_last_days;
use crate::parse::parse_efetch;

const BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// PubMed E-utilities client: paginated esearch over the journal allow-list,
/// batched efetch for article details, fixed delay between all requests.
pub struct PubMedClient {
    http: reqwest::Client,
    journals: Vec<String>,
    date_type: DateType,
    page_size: u32,
    batch_size: u32,
    request_delay: Duration,
    api_key: Option<String>,
    timezone: Tz,
}

#[derive(Deserialize)]
struct EsearchEnvelope {
    esearchresult: EsearchResult,
}

#[derive(Deserialize)]
struct EsearchResult {
    #[serde(default)]
    count: String,
    #[serde(default)]
    idlist: Vec<String>,
}

impl PubMedClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            journals: config.journals.clone(),
            date_type: config.date_type,
            page_size: config.esearch_page_size,
            batch_size: config.efetch_batch_size.max(1),
            request_delay: config.request_delay,
            api_key: config.pubmed_api_key.clone(),
            timezone: config.timezone,
        })
    }

    async fn esearch_all_pmids(
        &self,
        term: &str,
        mindate: &str,
        maxdate: &str,
    ) -> Result<Vec<String>> {
        let mut pmids: Vec<String> = Vec::new();
        let mut retstart: u64 = 0;

        loop {
            let retmax = self.page_size.to_string();
            let start = retstart.to_string();
            let mut params: Vec<(&str, &str)> = vec![
                ("db", "pubmed"),
                ("term", term),
                ("retmode", "json"),
                ("retmax", &retmax),
                ("retstart", &start),
                ("datetype", self.date_type.as_str()),
                ("mindate", mindate),
                ("maxdate", maxdate),
            ];
            if let Some(key) = self.api_key.as_deref() {
                params.push(("api_key", key));
            }

            let payload: EsearchEnvelope = self
                .http
                .get(format!("{BASE_URL}esearch.fcgi"))
                .query(&params)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            let count: u64 = payload
                .esearchresult
                .count
                .parse()
                .map_err(|_| {
                    Error::Fetch(format!("bad esearch count: {}", payload.esearchresult.count))
                })?;
            let batch = payload.esearchresult.idlist;
            let batch_len = batch.len() as u64;
            debug!("esearch page at {retstart}: {batch_len} of {count} ids");

            pmids.extend(batch);
            retstart += batch_len;

            tokio::time::sleep(self.request_delay).await;

            if retstart >= count || batch_len == 0 {
                break;
            }
        }

        Ok(pmids)
    }

    async fn efetch_articles(&self, pmids: &[String]) -> Result<Vec<Article>> {
        let mut articles = Vec::new();

        for batch in pmids.chunks(self.batch_size as usize) {
            let ids = batch.join(",");
            let mut params: Vec<(&str, &str)> =
                vec![("db", "pubmed"), ("id", &ids), ("retmode", "xml")];
            if let Some(key) = self.api_key.as_deref() {
                params.push(("api_key", key));
            }

            let xml = self
                .http
                .get(format!("{BASE_URL}efetch.fcgi"))
                .query(&params)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;

            articles.extend(parse_efetch(&xml)?);

            tokio::time::sleep(self.request_delay).await;
        }

        Ok(articles)
    }
}

#[async_trait]
impl ArticleSource for PubMedClient {
    async fn fetch_recent(&self, days_back: u32) -> Result<Vec<Article>> {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let (mindate, maxdate) = date_range_last_days(today, days_back.max(1));
        let term = build_journal_query(&self.journals);

        let pmids = self.esearch_all_pmids(&term, &mindate, &maxdate).await?;
        debug!("esearch returned {} ids for {mindate}..{maxdate}", pmids.len());
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let articles = self.efetch_articles(&pmids).await?;

        // Keep only records with an abstract; the rest are letters,
        // corrections, and editorials the summarizer cannot use.
        Ok(articles.into_iter().filter(Article::has_abstract).collect())
    }
}

pub fn build_journal_query(journals: &[String]) -> String {
    let parts = journals
        .iter()
        .map(|j| format!("\"{j}\"[jour]"))
        .collect::<Vec<_>>();
    format!("({})", parts.join(" OR "))
}
