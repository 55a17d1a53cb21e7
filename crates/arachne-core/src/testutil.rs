//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AppError;
use crate::status::{CrawlReport, ExportedFiles};
use crate::traits::{Fetcher, LinkExtractor, ResultSink, TitleExtractor};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher serving a fixed site keyed by URL.
///
/// Unknown URLs fail with an HTTP 404 error. An optional delay holds every
/// fetch in flight, as a slow server would.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, String>>>,
    delay: Option<Duration>,
    pub fetched: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for {url}")))
    }
}

// ---------------------------------------------------------------------------
// MockLinkExtractor
// ---------------------------------------------------------------------------

/// Mock link extractor that picks up every `href="..."` attribute verbatim.
#[derive(Clone, Default)]
pub struct MockLinkExtractor;

impl LinkExtractor for MockLinkExtractor {
    fn extract_links(&self, html: &str) -> Vec<String> {
        html.split("href=\"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .map(str::to_string)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MockTitleExtractor
// ---------------------------------------------------------------------------

/// Mock title extractor reading the first `<title>` or `<h1>` element.
#[derive(Clone, Default)]
pub struct MockTitleExtractor;

impl MockTitleExtractor {
    fn element(html: &str, tag: &str) -> Option<String> {
        let open = format!("<{tag}>");
        let close = format!("</{tag}>");
        let start = html.find(&open)? + open.len();
        let end = html[start..].find(&close)? + start;
        let text = html[start..end].trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl TitleExtractor for MockTitleExtractor {
    fn extract_title(&self, html: &str) -> Option<String> {
        Self::element(html, "title").or_else(|| Self::element(html, "h1"))
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// Mock sink recording every exported report.
#[derive(Clone, Default)]
pub struct MockSink {
    pub reports: Arc<Mutex<Vec<CrawlReport>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose next export fails.
    pub fn with_error(error: AppError) -> Self {
        Self {
            reports: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn last_report(&self) -> Option<CrawlReport> {
        self.reports.lock().unwrap().last().cloned()
    }
}

impl ResultSink for MockSink {
    async fn export(&self, report: &CrawlReport) -> Result<ExportedFiles, AppError> {
        if let Some(e) = self.error.lock().unwrap().take() {
            return Err(e);
        }
        self.reports.lock().unwrap().push(report.clone());
        Ok(ExportedFiles {
            csv_filename: Some("mock.csv".into()),
            txt_filename: Some("mock.txt".into()),
            json_filename: Some("mock.json".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Worker reporter that keeps a one-line description of every event.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingReporter {
    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

impl WorkerReporter for RecordingReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let line = match event {
            WorkerEvent::Started { role, .. } => format!("started {role}"),
            WorkerEvent::Idle => "idle".to_string(),
            WorkerEvent::Processing { url, .. } => format!("processing {url}"),
            WorkerEvent::Duplicate { url } => format!("duplicate {url}"),
            WorkerEvent::FetchFailed { url, .. } => format!("fetch_failed {url}"),
            WorkerEvent::Explored { url, new_links } => format!("explored {url} {new_links}"),
            WorkerEvent::Extracted { url, title } => format!("extracted {url} {title}"),
            WorkerEvent::Progress { processed, .. } => format!("progress {processed}"),
            WorkerEvent::MalformedItem { .. } => "malformed".to_string(),
            WorkerEvent::BrokerUnavailable { .. } => "broker_unavailable".to_string(),
            WorkerEvent::ItemFailed { .. } => "item_failed".to_string(),
            WorkerEvent::Stopped { processed, .. } => format!("stopped {processed}"),
        };
        self.events.lock().unwrap().push(line);
    }
}
