//! HTML parsing with the `scraper` crate: raw anchor hrefs and page titles.

use arachne_core::traits::{LinkExtractor, TitleExtractor};
use scraper::{ElementRef, Html, Selector};

/// Collects the `href` of every `<a>` element, in document order.
#[derive(Debug, Clone, Default)]
pub struct ScraperLinkExtractor;

impl LinkExtractor for ScraperLinkExtractor {
    fn extract_links(&self, html: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        document
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .map(str::to_string)
            .collect()
    }
}

/// Prefers the `<title>` text, falling back to the first `<h1>`.
///
/// Whitespace is trimmed; an element whose text is blank counts as absent.
#[derive(Debug, Clone, Default)]
pub struct ScraperTitleExtractor;

impl ScraperTitleExtractor {
    fn first_text(document: &Html, tag: &str) -> Option<String> {
        let selector = Selector::parse(tag).ok()?;
        document
            .select(&selector)
            .next()
            .map(text_of)
            .filter(|text| !text.is_empty())
    }
}

impl TitleExtractor for ScraperTitleExtractor {
    fn extract_title(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        Self::first_text(&document, "title").or_else(|| Self::first_text(&document, "h1"))
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
