//! Observable crawl state: periodic status snapshots, the final report
//! assembled at completion, and the events pushed to observers.

use std::time::Duration;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::broker::{Broker, get_i64, keys};
use crate::error::AppError;
use crate::job::{ConfigSummary, StopReason};
use crate::models::{ResultRecord, decode};
use crate::util::round_to;

/// Number of records carried by report summaries and the JSON export.
pub const SAMPLE_LIMIT: usize = 100;

/// Point-in-time view of a running crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    /// Seconds since the seed was pushed, one decimal.
    pub elapsed: f64,
    /// Seconds until the deadline, one decimal.
    pub remaining: f64,
    pub urls_found: i64,
    pub urls_extracted: i64,
    pub visited_count: u64,
    pub explored_queue_len: u64,
    pub exploit_queue_len: u64,
    /// Extracted pages per second, two decimals.
    pub throughput: f64,
    /// Percentage of the configured duration already spent.
    pub progress: f64,
}

impl StatusSnapshot {
    /// Snapshot reported while no crawl has been started.
    pub fn idle() -> Self {
        Self {
            running: false,
            elapsed: 0.0,
            remaining: 0.0,
            urls_found: 0,
            urls_extracted: 0,
            visited_count: 0,
            explored_queue_len: 0,
            exploit_queue_len: 0,
            throughput: 0.0,
            progress: 0.0,
        }
    }
}

/// Sample counters and queue depths from the broker.
pub async fn sample_status<B: Broker>(
    broker: &B,
    elapsed: Duration,
    duration: Duration,
    running: bool,
) -> Result<StatusSnapshot, AppError> {
    let urls_found = get_i64(broker, keys::URLS_FOUND).await?;
    let urls_extracted = get_i64(broker, keys::URLS_EXTRACTED).await?;
    let visited_count = broker.set_card(keys::VISITED_URLS).await?;
    let explored_queue_len = broker.queue_len(keys::EXPLORED_QUEUE).await?;
    let exploit_queue_len = broker.queue_len(keys::EXPLOIT_QUEUE).await?;

    let elapsed = elapsed.as_secs_f64();
    let remaining = (duration.as_secs_f64() - elapsed).max(0.0);

    Ok(StatusSnapshot {
        running: running && remaining > 0.0,
        elapsed: round_to(elapsed, 1),
        remaining: round_to(remaining, 1),
        urls_found,
        urls_extracted,
        visited_count,
        explored_queue_len,
        exploit_queue_len,
        throughput: round_to(throughput(urls_extracted, elapsed), 2),
        progress: progress(elapsed, duration.as_secs_f64()),
    })
}

/// Extracted pages per second.
pub fn throughput(urls_extracted: i64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        urls_extracted as f64 / elapsed_secs
    } else {
        0.0
    }
}

/// Share of found URLs that produced a result record.
pub fn extraction_rate(urls_extracted: i64, urls_found: i64) -> f64 {
    if urls_found > 0 {
        urls_extracted as f64 / urls_found as f64
    } else {
        0.0
    }
}

/// Percentage of the configured duration spent, capped at 100.
pub fn progress(elapsed_secs: f64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        (elapsed_secs / duration_secs * 100.0).min(100.0)
    } else {
        0.0
    }
}

/// Everything known about a finished crawl.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlReport {
    /// Wall-clock seconds between seeding and collection.
    pub duration: f64,
    pub urls_found: i64,
    pub urls_extracted: i64,
    pub unique_visited: u64,
    pub throughput: f64,
    pub extraction_rate: f64,
    /// Local time of collection, `%Y-%m-%d %H:%M:%S`.
    pub timestamp: String,
    pub stop_reason: StopReason,
    pub config: ConfigSummary,
    /// Every result record, in append order.
    pub records: Vec<ResultRecord>,
}

impl CrawlReport {
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            duration: self.duration,
            urls_found: self.urls_found,
            urls_extracted: self.urls_extracted,
            unique_visited: self.unique_visited,
            throughput: self.throughput,
            extraction_rate: self.extraction_rate,
            timestamp: self.timestamp.clone(),
            config: self.config.clone(),
            sample_data: self.records.iter().take(SAMPLE_LIMIT).cloned().collect(),
        }
    }
}

/// A report with its records capped at [`SAMPLE_LIMIT`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub duration: f64,
    pub urls_found: i64,
    pub urls_extracted: i64,
    pub unique_visited: u64,
    pub throughput: f64,
    pub extraction_rate: f64,
    pub timestamp: String,
    pub config: ConfigSummary,
    pub sample_data: Vec<ResultRecord>,
}

/// Read final counters and the whole result stream.
///
/// Stream entries that fail to decode are logged and skipped.
pub async fn collect_report<B: Broker>(
    broker: &B,
    config: ConfigSummary,
    elapsed: Duration,
    stop_reason: StopReason,
) -> Result<CrawlReport, AppError> {
    let urls_found = get_i64(broker, keys::URLS_FOUND).await?;
    let urls_extracted = get_i64(broker, keys::URLS_EXTRACTED).await?;
    let unique_visited = broker.set_card(keys::VISITED_URLS).await?;

    let entries = broker.stream_range(keys::RESULTS_STREAM).await?;
    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match decode::<ResultRecord>(&entry.payload) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(id = entry.id, error = %e, "Skipping malformed result record"),
        }
    }

    let elapsed = elapsed.as_secs_f64();
    Ok(CrawlReport {
        duration: elapsed,
        urls_found,
        urls_extracted,
        unique_visited,
        throughput: throughput(urls_extracted, elapsed),
        extraction_rate: extraction_rate(urls_extracted, urls_found),
        timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        stop_reason,
        config,
        records,
    })
}

/// Where a sink wrote the exported results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFiles {
    pub csv_filename: Option<String>,
    pub txt_filename: Option<String>,
    pub json_filename: Option<String>,
}

/// Payload of the completion event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    #[serde(flatten)]
    pub files: ExportedFiles,
    pub results: ReportSummary,
}

/// Notifications pushed to dashboards and terminal observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum CrawlEvent {
    #[serde(rename = "status_update")]
    Status(StatusSnapshot),
    #[serde(rename = "scraper_stopped")]
    Stopped { message: String },
    #[serde(rename = "scraper_completed")]
    Completed(Box<CompletionEvent>),
}
