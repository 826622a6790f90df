use chrono::{Duration, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref YEAR_RE: Regex = Regex::new(r"\d{4}").unwrap();
    static ref DIGITS_RE: Regex = Regex::new(r"\d{1,2}").unwrap();
    static ref MONTH_NAME_RE: Regex = Regex::new(r"\b([A-Za-z]{3,9})\b").unwrap();
    static ref BOUNDED_DAY_RE: Regex = Regex::new(r"\b(\d{1,2})\b").unwrap();
}

/// Search window for the last `days_back` days, excluding today. Returned as
/// `(mindate, maxdate)` in the `YYYY/MM/DD` form E-utilities expect.
pub fn date_range_last_days(today: NaiveDate, days_back: u32) -> (String, String) {
    let max_day = today - Duration::days(1);
    let min_day = today - Duration::days(days_back as i64);
    (
        min_day.format("%Y/%m/%d").to_string(),
        max_day.format("%Y/%m/%d").to_string(),
    )
}

pub fn normalize_year(value: &str) -> Option<String> {
    YEAR_RE.find(value.trim()).map(|m| m.as_str().to_string())
}

pub fn normalize_month(value: &str) -> Option<String> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.chars().all(|c| c.is_ascii_digit()) {
        let n: u32 = raw.parse().ok()?;
        return (1..=12).contains(&n).then(|| format!("{n:02}"));
    }

    let lower = raw.to_lowercase();
    let key4: String = lower.chars().take(4).collect();
    if let Some(month) = month_number(key4.trim_end_matches('.')) {
        return Some(month.to_string());
    }
    let key3: String = lower.chars().take(3).collect();
    month_number(&key3).map(|m| m.to_string())
}

pub fn normalize_day(value: &str) -> Option<String> {
    let m = DIGITS_RE.find(value.trim())?;
    let n: u32 = m.as_str().parse().ok()?;
    (1..=31).contains(&n).then(|| format!("{n:02}"))
}

/// MedlineDate values are free text like "2024 Jan-Feb" or "2023 Nov 15";
/// best effort, year-only when the rest is unusable.
pub fn normalize_medline_date(value: &str) -> Option<String> {
    let text = value.trim();
    let year = normalize_year(text)?;

    let month_match = match MONTH_NAME_RE.find(text) {
        Some(m) => m,
        None => return Some(year),
    };
    let month = match normalize_month(month_match.as_str()) {
        Some(m) => m,
        None => return Some(year),
    };

    let rest = &text[month_match.end()..];
    match BOUNDED_DAY_RE.find(rest).and_then(|m| normalize_day(m.as_str())) {
        Some(day) => Some(format!("{year}-{month}-{day}")),
        None => Some(format!("{year}-{month}")),
    }
}

fn month_number(key: &str) -> Option<&'static str> {
    Some(match key {
        "jan" => "01",
        "feb" => "02",
        "mar" => "03",
        "apr" => "04",
        "may" => "05",
        "jun" => "06",
        "jul" => "07",
        "aug" => "08",
        "sep" | "sept" => "09",
        "oct" => "10",
        "nov" => "11",
        "dec" => "12",
        _ => return None,
    })
}
