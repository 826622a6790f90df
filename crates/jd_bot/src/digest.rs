use jd_core::html::escape;
use jd_core::Article;

/// Telegram caps messages at 4096 characters; stay under it with headroom.
pub const MESSAGE_CHUNK_LIMIT: usize = 3800;

/// One `date | journal | linked title` line per article for the weekly list.
pub fn week_lines(articles: &[Article]) -> Vec<String> {
    articles
        .iter()
        .map(|article| {
            let date: String = article
                .publication_date
                .as_deref()
                .unwrap_or("")
                .chars()
                .take(10)
                .collect();
            let title = escape(
                article
                    .title_ru
                    .as_deref()
                    .or(article.title_en.as_deref())
                    .unwrap_or("(Без названия)"),
            );
            let journal = escape(article.journal.as_deref().unwrap_or(""));
            match article.canonical_link().filter(|l| !l.is_empty()) {
                Some(link) => format!(
                    "{date} | <i>{journal}</i> | <a href=\"{}\">{title}</a>",
                    escape(link)
                ),
                None => format!("{date} | <i>{journal}</i> | {title}"),
            }
        })
        .collect()
}

/// Packs lines under the header into as few messages as fit the chunk
/// limit; every chunk repeats the header.
pub fn chunk_lines(header: &str, lines: &[String]) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut chunk = format!("{header}\n");

    for line in lines {
        let candidate = format!("{chunk}{line}\n");
        if candidate.chars().count() > MESSAGE_CHUNK_LIMIT {
            chunks.push(chunk.trim().to_string());
            chunk = format!("{header}\n{line}\n");
        } else {
            chunk = candidate;
        }
    }

    let last = chunk.trim();
    if !last.is_empty() {
        chunks.push(last.to_string());
    }
    chunks
}

/// Delivery text for articles summarized before message rendering existed,
/// or whose stored message is missing for any other reason.
pub fn fallback_message(article: &Article) -> String {
    let title = escape(
        article
            .title_ru
            .as_deref()
            .or(article.title_en.as_deref())
            .unwrap_or("Без названия"),
    );
    let summary = escape(
        article
            .summary_ru
            .as_deref()
            .or(article.summary_en.as_deref())
            .unwrap_or(""),
    );

    let mut message = format!("<b>{title}</b>\n\n{summary}");
    if let Some(link) = article.canonical_link().filter(|l| !l.is_empty()) {
        message.push_str(&format!("\n\n<a href=\"{}\">Открыть статью</a>", escape(link)));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(pmid: &str, title_ru: Option<&str>) -> Article {
        Article {
            pmid: pmid.to_string(),
            journal: Some("Nature".to_string()),
            publication_date: Some("2024-03-01".to_string()),
            title_en: Some("English title".to_string()),
            title_ru: title_ru.map(str::to_string),
            link: Some("https://doi.org/10.1000/x".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn week_line_prefers_russian_title_and_links() {
        let lines = week_lines(&[article("1", Some("Русское название"))]);
        assert_eq!(
            lines[0],
            "2024-03-01 | <i>Nature</i> | <a href=\"https://doi.org/10.1000/x\">Русское название</a>"
        );
    }

    #[test]
    fn week_line_without_link_is_plain() {
        let mut a = article("1", None);
        a.link = None;
        a.doi_url = None;
        a.pubmed_url = None;
        let lines = week_lines(&[a]);
        assert_eq!(lines[0], "2024-03-01 | <i>Nature</i> | English title");
    }

    #[test]
    fn week_line_truncates_date_to_day_precision() {
        let mut a = article("1", None);
        a.publication_date = Some("2024-03".to_string());
        assert!(week_lines(&[a])[0].starts_with("2024-03 |"));
    }

    #[test]
    fn chunking_repeats_header_and_keeps_every_line() {
        let header = "<b>Статьи за период</b>";
        let lines: Vec<String> = (0..100).map(|i| format!("line {i} {}", "x".repeat(90))).collect();

        let chunks = chunk_lines(header, &lines);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.starts_with(header));
            assert!(chunk.chars().count() <= MESSAGE_CHUNK_LIMIT);
        }
        let joined = chunks.join("\n");
        for line in &lines {
            assert!(joined.contains(line.as_str()));
        }
    }

    #[test]
    fn fallback_message_uses_best_available_fields() {
        let mut a = article("1", None);
        a.summary_en = Some("English summary.".to_string());
        let message = fallback_message(&a);
        assert!(message.starts_with("<b>English title</b>"));
        assert!(message.contains("English summary."));
        assert!(message.contains("Открыть статью"));
    }
}
