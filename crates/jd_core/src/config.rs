use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;

use crate::{Error, Result};

/// Journals tracked by default; override with `JD_JOURNALS`.
pub const TOP_JOURNALS: &[&str] = &[
    "Nature",
    "Science",
    "Cell",
    "Nature Medicine",
    "The Lancet",
    "JAMA",
    "New England Journal of Medicine",
    "BMJ",
];

pub const DEFAULT_DAYS_BACK: u32 = 1;
pub const DEFAULT_ESEARCH_PAGE_SIZE: u32 = 500;
pub const DEFAULT_EFETCH_BATCH_SIZE: u32 = 200;
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(120);

/// Which PubMed date field the search window applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateType {
    /// Publication date (`pdat`).
    Published,
    /// Date the record was added to the database (`edat`), best for daily
    /// ingestion.
    EntrezAdded,
}

impl DateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateType::Published => "pdat",
            DateType::EntrezAdded => "edat",
        }
    }
}

impl FromStr for DateType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pdat" => Ok(DateType::Published),
            "edat" => Ok(DateType::EntrezAdded),
            other => Err(Error::Config(format!("unknown date type: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub journals: Vec<String>,
    pub date_type: DateType,
    pub days_back: u32,
    pub esearch_page_size: u32,
    pub efetch_batch_size: u32,
    pub request_delay: Duration,
    pub pubmed_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub telegram_token: Option<String>,
    pub timezone: Tz,
    pub daily_hour: u32,
    pub daily_minute: u32,
    pub db_path: PathBuf,
    pub raw_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let journals = match env_var("JD_JOURNALS") {
            Some(raw) => raw
                .split(',')
                .map(|j| j.trim().to_string())
                .filter(|j| !j.is_empty())
                .collect(),
            None => TOP_JOURNALS.iter().map(|j| j.to_string()).collect(),
        };

        let date_type = match env_var("JD_DATE_TYPE") {
            Some(raw) => raw.parse()?,
            None => DateType::Published,
        };

        let timezone: Tz = match env_var("BOT_TIMEZONE") {
            Some(name) => name
                .parse()
                .map_err(|_| Error::Config(format!("unknown timezone: {name}")))?,
            None => chrono_tz::Europe::Paris,
        };

        Ok(Self {
            journals,
            date_type,
            days_back: env_parse("JD_DAYS_BACK")?.unwrap_or(DEFAULT_DAYS_BACK),
            esearch_page_size: env_parse("JD_ESEARCH_PAGE_SIZE")?
                .unwrap_or(DEFAULT_ESEARCH_PAGE_SIZE),
            efetch_batch_size: env_parse("JD_EFETCH_BATCH_SIZE")?
                .unwrap_or(DEFAULT_EFETCH_BATCH_SIZE),
            request_delay: env_parse("JD_REQUEST_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REQUEST_DELAY),
            pubmed_api_key: env_var("PUBMED_API_KEY"),
            gemini_api_key: env_var("GEMINI_API_KEY"),
            telegram_token: env_var("TELEGRAM_BOT_TOKEN"),
            timezone,
            daily_hour: env_parse("BOT_DAILY_HOUR")?.unwrap_or(9).min(23),
            daily_minute: env_parse("BOT_DAILY_MINUTE")?.unwrap_or(0).min(59),
            db_path: env_var("JD_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/bot.db")),
            raw_dir: env_var("JD_RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("out/raw_model")),
        })
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value for {key}: {raw}"))),
        None => Ok(None),
    }
}
