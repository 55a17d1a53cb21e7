//! Same-origin link filter applied to every discovered href.

use url::Url;

/// Path suffixes that never lead to an HTML page worth exploring.
pub const SKIPPED_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".png", ".gif", ".zip", ".mp4", ".css", ".js",
];

/// Resolve `href` against the page it was found on and keep it only if it
/// stays on the same host.
///
/// Returns the absolute URL when accepted. Malformed input is rejected.
pub fn resolve_link(page: &Url, href: &str) -> Option<Url> {
    let candidate = page.join(href.trim()).ok()?;
    is_crawlable(&candidate, page).then_some(candidate)
}

/// Filter rules for an absolute candidate URL found on `page`:
/// http(s) only, non-empty host equal to the page host, and no blacklisted
/// file extension at the end of the path.
pub fn is_crawlable(candidate: &Url, page: &Url) -> bool {
    if !matches!(candidate.scheme(), "http" | "https") {
        return false;
    }

    let host = match candidate.host_str() {
        Some(host) if !host.is_empty() => host,
        _ => return false,
    };
    if Some(host) != page.host_str() || candidate.port() != page.port() {
        return false;
    }

    let path = candidate.path().to_ascii_lowercase();
    !SKIPPED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Resolve and filter a batch of hrefs, dropping duplicates within the page.
pub fn crawlable_links<'a, I>(page: &Url, hrefs: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut links: Vec<String> = Vec::new();
    for href in hrefs {
        if let Some(url) = resolve_link(page, href) {
            let url = String::from(url);
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    links
}
