//! On-page metadata extraction from captured HTML.
use scraper::{ElementRef, Html, Selector};

use crate::model::PageMetadata;

const MAX_TITLE_CHARS: usize = 200;

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn count(document: &Html, selector: &str) -> usize {
    match Selector::parse(selector) {
        Ok(selector) => document.select(&selector).count(),
        Err(_) => 0,
    }
}

fn meta_named<'a>(document: &'a Html, name: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse("meta[name]").ok()?;
    document.select(&selector).find(|el| {
        el.value()
            .attr("name")
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    })
}

/// Parse the five completeness markers, H1 count and title.
pub fn extract(html: &str) -> PageMetadata {
    if html.trim().is_empty() {
        return PageMetadata::default();
    }
    let document = Html::parse_document(html);

    let title = select_first(&document, "title")
        .map(|el| el.text().collect::<String>())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .map(|t| t.chars().take(MAX_TITLE_CHARS).collect::<String>());

    let has_meta_description = meta_named(&document, "description")
        .and_then(|el| el.value().attr("content"))
        .is_some_and(|c| !c.trim().is_empty());

    let has_open_graph = Selector::parse("meta[property]")
        .map(|sel| {
            document.select(&sel).any(|el| {
                el.value()
                    .attr("property")
                    .is_some_and(|p| p.starts_with("og:"))
            })
        })
        .unwrap_or(false);

    let has_favicon = Selector::parse("link[rel]")
        .map(|sel| {
            document.select(&sel).any(|el| {
                el.value()
                    .attr("rel")
                    .is_some_and(|rel| rel.to_ascii_lowercase().contains("icon"))
            })
        })
        .unwrap_or(false);

    PageMetadata {
        has_title: title.is_some(),
        has_meta_description,
        has_viewport: meta_named(&document, "viewport").is_some(),
        has_open_graph,
        has_favicon,
        h1_count: count(&document, "h1") as u32,
        title,
    }
}
