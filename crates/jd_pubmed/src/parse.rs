use roxmltree::{Document, Node};

use jd_core::{Article, Error, Result};

use crate::dates::{
    normalize_day, normalize_medline_date, normalize_month, normalize_year,
};

const PUBMED_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";
const DOI_URL: &str = "https://doi.org";

/// Parses an efetch XML payload into article records. Records without a PMID
/// are dropped; abstract filtering is left to the caller.
pub fn parse_efetch(xml: &str) -> Result<Vec<Article>> {
    let doc = Document::parse(xml).map_err(|e| Error::Fetch(format!("bad efetch XML: {e}")))?;

    let mut articles = Vec::new();
    for node in doc
        .descendants()
        .filter(|n| n.has_tag_name("PubmedArticle"))
    {
        if let Some(article) = parse_article(node) {
            articles.push(article);
        }
    }
    Ok(articles)
}

fn parse_article(node: Node<'_, '_>) -> Option<Article> {
    let pmid = find_text(node, "PMID")?;

    let doi = node
        .descendants()
        .filter(|n| n.has_tag_name("ArticleId"))
        .find(|n| n.attribute("IdType") == Some("doi"))
        .map(deep_text)
        .filter(|v| !v.is_empty());

    let pubmed_url = format!("{PUBMED_URL}/{pmid}/");
    let doi_url = doi.as_deref().map(|d| format!("{DOI_URL}/{d}"));
    let link = doi_url.clone().unwrap_or_else(|| pubmed_url.clone());

    Some(Article {
        pmid,
        journal: node
            .descendants()
            .find(|n| n.has_tag_name("Journal"))
            .and_then(|j| find_text(j, "Title")),
        publication_date: extract_date(node),
        title_en: find_text(node, "ArticleTitle"),
        abstract_en: parse_abstract(node),
        authors: parse_authors(node),
        doi,
        link: Some(link),
        pubmed_url: Some(pubmed_url),
        doi_url,
        ..Default::default()
    })
}

/// Labeled abstract paragraphs are joined as `Label: text` lines, matching
/// how structured abstracts read on PubMed itself.
fn parse_abstract(node: Node<'_, '_>) -> Option<String> {
    let abstract_node = node.descendants().find(|n| n.has_tag_name("Abstract"))?;
    let mut parts = Vec::new();
    for item in abstract_node
        .descendants()
        .filter(|n| n.has_tag_name("AbstractText"))
    {
        let text = deep_text(item);
        if text.is_empty() {
            continue;
        }
        match item.attribute("Label") {
            Some(label) => parts.push(format!("{label}: {text}")),
            None => parts.push(text),
        }
    }
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn parse_authors(node: Node<'_, '_>) -> Vec<String> {
    let Some(list) = node.descendants().find(|n| n.has_tag_name("AuthorList")) else {
        return Vec::new();
    };

    let mut authors = Vec::new();
    for author in list.descendants().filter(|n| n.has_tag_name("Author")) {
        let name = [find_text(author, "ForeName"), find_text(author, "LastName")]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !name.is_empty() {
            authors.push(name);
        }
    }
    authors
}

/// Best-effort full date string: prefers ArticleDate (usually Y/M/D), falls
/// back to the journal-issue PubDate, then the free-text MedlineDate.
/// Output examples: `2026-02-17`, `2026-02`, `2026`.
fn extract_date(node: Node<'_, '_>) -> Option<String> {
    if let Some(article_date) = node.descendants().find(|n| n.has_tag_name("ArticleDate")) {
        if let Some(date) = compose_date(article_date) {
            return Some(date);
        }
    }

    let issue = node.descendants().find(|n| n.has_tag_name("JournalIssue"))?;
    let pub_date = issue.descendants().find(|n| n.has_tag_name("PubDate"))?;
    if let Some(date) = compose_date(pub_date) {
        return Some(date);
    }
    find_text(pub_date, "MedlineDate").map(|m| normalize_medline_date(&m).unwrap_or(m))
}

fn compose_date(node: Node<'_, '_>) -> Option<String> {
    let year = find_text(node, "Year").and_then(|y| normalize_year(&y))?;
    let month = find_text(node, "Month").and_then(|m| normalize_month(&m));
    let day = find_text(node, "Day").and_then(|d| normalize_day(&d));

    Some(match (month, day) {
        (Some(month), Some(day)) => format!("{year}-{month}-{day}"),
        (Some(month), None) => format!("{year}-{month}"),
        _ => year,
    })
}

fn find_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    node.descendants()
        .find(|n| n.has_tag_name(tag))
        .map(deep_text)
        .filter(|t| !t.is_empty())
}

fn deep_text(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect::<String>()
        .trim()
        .to_string()
}
