use std::future::Future;

use crate::error::AppError;
use crate::status::{CrawlReport, ExportedFiles};

/// Fetches raw HTML content from a URL.
pub trait Fetcher: Send + Sync + Clone + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Pulls raw `href` values out of an HTML document.
///
/// Values are returned as written in the page; resolution against the page
/// URL and origin filtering happen in [`crate::filter`].
pub trait LinkExtractor: Send + Sync + Clone + 'static {
    fn extract_links(&self, html: &str) -> Vec<String>;
}

/// Finds a human-readable title in an HTML document.
pub trait TitleExtractor: Send + Sync + Clone + 'static {
    /// Returns `None` when the document has neither a title nor a heading.
    fn extract_title(&self, html: &str) -> Option<String>;
}

/// Consumes the finalized result set of a crawl.
pub trait ResultSink: Send + Sync + Clone + 'static {
    fn export(
        &self,
        report: &CrawlReport,
    ) -> impl Future<Output = Result<ExportedFiles, AppError>> + Send;
}

/// A no-op ResultSink for use when nothing should be written.
#[derive(Debug, Clone)]
pub struct NullSink;

impl ResultSink for NullSink {
    async fn export(&self, _report: &CrawlReport) -> Result<ExportedFiles, AppError> {
        Ok(ExportedFiles::default())
    }
}
