use jd_core::html::escape;

/// Author names shown before collapsing the rest into a `(+N)` suffix.
const AUTHOR_DISPLAY_CAP: usize = 8;

/// Renders the fixed-template delivery message for one summarized article:
/// bold Russian title, italic journal/date line, capped author list, labeled
/// summary paragraph, and the canonical-article link. Every interpolated
/// value is escaped for Telegram HTML.
pub fn render_message(
    title_ru: &str,
    journal: &str,
    date: &str,
    authors: &[String],
    summary_ru: &str,
    link: &str,
) -> String {
    let mut authors_line = authors
        .iter()
        .take(AUTHOR_DISPLAY_CAP)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if authors.len() > AUTHOR_DISPLAY_CAP {
        authors_line.push_str(&format!(" (+{})", authors.len() - AUTHOR_DISPLAY_CAP));
    }

    format!(
        "<b>{}</b>\n\
         <i>{}</i> - {}\n\
         Авторы: {}\n\
         \n<b>Краткое резюме (по аннотации):</b>\n\
         {}\n\
         \n<a href=\"{}\">Оригинальная статья</a>",
        escape(title_ru),
        escape(journal),
        escape(date),
        escape(&authors_line),
        escape(summary_ru),
        escape(link),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_author_list_at_eight() {
        let authors: Vec<String> = (1..=10).map(|i| format!("Name{i}")).collect();
        let message = render_message("Т", "Nature", "2024-03-01", &authors, "Резюме.", "");
        assert!(message.contains(
            "Авторы: Name1, Name2, Name3, Name4, Name5, Name6, Name7, Name8 (+2)"
        ));
        assert!(!message.contains("Name9"));
    }

    #[test]
    fn short_author_list_has_no_suffix() {
        let authors = vec!["Alice Smith".to_string(), "Bob Jones".to_string()];
        let message = render_message("Т", "Nature", "2024-03-01", &authors, "Резюме.", "");
        assert!(message.contains("Авторы: Alice Smith, Bob Jones\n"));
        assert!(!message.contains("(+"));
    }

    #[test]
    fn escapes_interpolated_values() {
        let message = render_message(
            "Риск <50%",
            "Nature & Science",
            "2024",
            &[],
            "A & B",
            "https://doi.org/10.1000/a?b=1&c=2",
        );
        assert!(message.starts_with("<b>Риск &lt;50%</b>"));
        assert!(message.contains("<i>Nature &amp; Science</i>"));
        assert!(message.contains("\"https://doi.org/10.1000/a?b=1&amp;c=2\""));
    }
}
