use serde::{Deserialize, Serialize};

use arachne_core::job::ConfigSummary;
use arachne_core::{StartRequest, StartResponse, StatusSnapshot, StopResponse};

pub const DEFAULT_ROOT_URL: &str = "https://www.dlsu.edu.ph/";
pub const DEFAULT_DURATION_MINUTES: u64 = 60;
pub const DEFAULT_NUM_EXPLORERS: u32 = 4;
pub const DEFAULT_NUM_EXTRACTORS: u32 = 1;

// ---------------------------------------------------------------------------
// Start / stop
// ---------------------------------------------------------------------------

/// Every field is optional; missing ones take the documented defaults.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct StartCrawlRequest {
    /// Absolute http(s) URL to start from (default `https://www.dlsu.edu.ph/`)
    pub root_url: Option<String>,
    /// Crawl duration in minutes (default 60)
    pub duration: Option<u64>,
    /// Explorer workers per node (default 4)
    pub num_explorers: Option<u32>,
    /// Extractor workers per node (default 1)
    pub num_extractors: Option<u32>,
}

impl From<StartCrawlRequest> for StartRequest {
    fn from(body: StartCrawlRequest) -> Self {
        StartRequest {
            root_url: body.root_url.unwrap_or_else(|| DEFAULT_ROOT_URL.to_string()),
            duration_minutes: body.duration.unwrap_or(DEFAULT_DURATION_MINUTES),
            num_explorers: body.num_explorers.unwrap_or(DEFAULT_NUM_EXPLORERS),
            num_extractors: body.num_extractors.unwrap_or(DEFAULT_NUM_EXTRACTORS),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CrawlConfigResponse {
    pub root_url: String,
    /// Minutes
    pub duration: f64,
    pub num_explorers: u32,
    pub num_extractors: u32,
}

impl From<ConfigSummary> for CrawlConfigResponse {
    fn from(config: ConfigSummary) -> Self {
        Self {
            root_url: config.root_url,
            duration: config.duration,
            num_explorers: config.num_explorers,
            num_extractors: config.num_extractors,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StartCrawlResponse {
    pub success: bool,
    pub message: String,
    pub config: CrawlConfigResponse,
}

impl From<StartResponse> for StartCrawlResponse {
    fn from(response: StartResponse) -> Self {
        Self {
            success: response.success,
            message: response.message,
            config: response.config.into(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StopCrawlResponse {
    pub success: bool,
    pub message: String,
}

impl From<StopResponse> for StopCrawlResponse {
    fn from(response: StopResponse) -> Self {
        Self {
            success: response.success,
            message: response.message,
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub running: bool,
    pub phase: String,
    /// Seconds since the seed was pushed
    pub elapsed: f64,
    /// Seconds until the deadline
    pub remaining: f64,
    pub urls_found: i64,
    pub urls_extracted: i64,
    pub visited_count: u64,
    pub explored_queue_len: u64,
    pub exploit_queue_len: u64,
    /// Extracted pages per second
    pub throughput: f64,
    /// Percent of the duration elapsed
    pub progress: f64,
}

impl StatusResponse {
    pub fn new(phase: &str, snapshot: StatusSnapshot) -> Self {
        Self {
            running: snapshot.running,
            phase: phase.to_string(),
            elapsed: snapshot.elapsed,
            remaining: snapshot.remaining,
            urls_found: snapshot.urls_found,
            urls_extracted: snapshot.urls_extracted,
            visited_count: snapshot.visited_count,
            explored_queue_len: snapshot.explored_queue_len,
            exploit_queue_len: snapshot.exploit_queue_len,
            throughput: snapshot.throughput,
            progress: snapshot.progress,
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
