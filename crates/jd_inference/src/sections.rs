use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG_LINE: Regex = Regex::new(r"^([A-Z_]+):\s*(.*)$").unwrap();
    static ref EXCESS_BLANKS: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Extracts labeled fields from free-form model output.
///
/// A line of the form `TAG:` (where the tag is one of `keys`) opens a block,
/// optionally seeded with the trailing same-line text; following lines
/// accumulate into it until another recognized tag line appears. If a tag
/// recurs the longest non-empty candidate wins, which defends against the
/// model repeating a field correctly after an initial malformed attempt.
/// Runs of 3+ blank lines collapse to 2. An absent tag yields `None`, never
/// an error; callers decide whether that is fatal.
pub fn parse_sections<'k>(text: &str, keys: &[&'k str]) -> HashMap<&'k str, Option<String>> {
    let mut out: HashMap<&str, Option<String>> = keys.iter().map(|k| (*k, None)).collect();
    if text.is_empty() {
        return out;
    }

    let raw = text.replace("\r\n", "\n");
    let mut blocks: HashMap<&str, Vec<Vec<&str>>> = keys.iter().map(|k| (*k, Vec::new())).collect();
    let mut current_key: Option<&str> = None;
    let mut current_block: Vec<&str> = Vec::new();

    for line in raw.trim().lines() {
        if let Some(captures) = TAG_LINE.captures(line) {
            let tag = captures.get(1).map_or("", |m| m.as_str());
            if let Some(key) = keys.iter().find(|k| **k == tag) {
                if let Some(open) = current_key.take() {
                    if !current_block.is_empty() {
                        blocks.entry(open).or_default().push(current_block);
                    }
                }
                current_key = Some(*key);
                current_block = Vec::new();
                let head = captures.get(2).map_or("", |m| m.as_str()).trim();
                if !head.is_empty() {
                    current_block.push(head);
                }
                continue;
            }
        }

        if current_key.is_some() {
            current_block.push(line);
        }
    }
    if let Some(open) = current_key {
        if !current_block.is_empty() {
            blocks.entry(open).or_default().push(current_block);
        }
    }

    for key in keys {
        let candidates: Vec<String> = blocks
            .remove(*key)
            .unwrap_or_default()
            .into_iter()
            .map(|block| block.join("\n").trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();

        if let Some(best) = candidates.into_iter().max_by_key(|value| value.len()) {
            out.insert(*key, Some(EXCESS_BLANKS.replace_all(&best, "\n\n").into_owned()));
        }
    }

    out
}

/// Heuristic truncation check over generated text plus the engine-reported
/// finish reason. Best effort only; a clean-looking ending is no guarantee
/// the model actually finished.
pub fn is_incomplete_text(text: &str, finish_reason: Option<&str>) -> bool {
    if text.is_empty() {
        return true;
    }

    if finish_reason
        .map(|r| r.to_uppercase().contains("MAX_TOKENS"))
        .unwrap_or(false)
    {
        return true;
    }

    let tail = text.trim_end();
    if tail.ends_with("...") || tail.ends_with('…') {
        return true;
    }
    tail.ends_with([',', ';', ':'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiline_block() {
        let text = "EN_SUMMARY:\nFirst line.\nSecond line.\n";
        let parsed = parse_sections(text, &["EN_SUMMARY", "RU_TITLE"]);
        assert_eq!(
            parsed["EN_SUMMARY"].as_deref(),
            Some("First line.\nSecond line.")
        );
        assert_eq!(parsed["RU_TITLE"], None);
    }

    #[test]
    fn same_line_head_seeds_block() {
        let text = "RU_TITLE: Заголовок статьи\nRU_SUMMARY:\nПолное резюме.";
        let parsed = parse_sections(text, &["RU_TITLE", "RU_SUMMARY"]);
        assert_eq!(parsed["RU_TITLE"].as_deref(), Some("Заголовок статьи"));
        assert_eq!(parsed["RU_SUMMARY"].as_deref(), Some("Полное резюме."));
    }

    #[test]
    fn repeated_tag_keeps_longest_candidate() {
        let text = "EN_SUMMARY:\nshort\nEN_SUMMARY:\nThe much longer, corrected summary text.";
        let parsed = parse_sections(text, &["EN_SUMMARY"]);
        assert_eq!(
            parsed["EN_SUMMARY"].as_deref(),
            Some("The much longer, corrected summary text.")
        );
    }

    #[test]
    fn collapses_excess_blank_lines() {
        let text = "EN_SUMMARY:\nPart one.\n\n\n\nPart two.";
        let parsed = parse_sections(text, &["EN_SUMMARY"]);
        assert_eq!(parsed["EN_SUMMARY"].as_deref(), Some("Part one.\n\nPart two."));
    }

    #[test]
    fn unknown_tags_stay_inside_current_block() {
        let text = "EN_SUMMARY:\nValue with\nNOT_A_KEY: embedded line";
        let parsed = parse_sections(text, &["EN_SUMMARY"]);
        assert_eq!(
            parsed["EN_SUMMARY"].as_deref(),
            Some("Value with\nNOT_A_KEY: embedded line")
        );
    }

    #[test]
    fn empty_text_yields_all_none() {
        let parsed = parse_sections("", &["EN_SUMMARY"]);
        assert_eq!(parsed["EN_SUMMARY"], None);
    }

    #[test]
    fn incomplete_detection_boundaries() {
        assert!(is_incomplete_text("", None));
        assert!(is_incomplete_text("Cut mid-thought", Some("MAX_TOKENS")));
        assert!(is_incomplete_text("Trailing ellipsis...", Some("STOP")));
        assert!(is_incomplete_text("Trailing ellipsis…", Some("STOP")));
        assert!(is_incomplete_text("ends with a comma,", None));
        assert!(is_incomplete_text("ends with a colon:", None));
        assert!(is_incomplete_text("ends with a semicolon; ", None));
        assert!(!is_incomplete_text("End of report.", Some("STOP")));
        assert!(!is_incomplete_text("A full sentence.", None));
    }
}
