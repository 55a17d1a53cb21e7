use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;
use crate::util::short_id;

/// Lifecycle phase of the crawl job owned by an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Completed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "idle",
            JobPhase::Starting => "starting",
            JobPhase::Running => "running",
            JobPhase::Stopping => "stopping",
            JobPhase::Completed => "completed",
        }
    }

    /// Whether a job currently owns the broker state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobPhase::Starting | JobPhase::Running | JobPhase::Stopping
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which worker pool a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Explorer,
    Extractor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Explorer => "explorer",
            Role::Extractor => "extractor",
        }
    }

    /// Broker key holding the configured pool size for this role.
    pub fn count_key(&self) -> &'static str {
        match self {
            Role::Explorer => crate::broker::keys::NUM_EXPLORERS,
            Role::Extractor => crate::broker::keys::NUM_EXTRACTORS,
        }
    }

    /// Queue on which this role's nodes acknowledge a start.
    pub fn ack_queue(&self) -> &'static str {
        match self {
            Role::Explorer => crate::broker::keys::EXPLORER_ACK,
            Role::Extractor => crate::broker::keys::EXTRACTOR_ACK,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "explorer" => Ok(Role::Explorer),
            "extractor" => Ok(Role::Extractor),
            _ => Err(format!("Unknown worker role: {}", s)),
        }
    }
}

/// Why a running job left the `Running` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Deadline,
    Manual,
}

/// Crawl parameters accepted by `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlConfig {
    pub root_url: String,
    pub duration: Duration,
    pub num_explorers: u32,
    pub num_extractors: u32,
}

impl CrawlConfig {
    pub fn new(
        root_url: impl Into<String>,
        duration: Duration,
        num_explorers: u32,
        num_extractors: u32,
    ) -> Self {
        Self {
            root_url: root_url.into(),
            duration,
            num_explorers,
            num_extractors,
        }
    }

    /// Build from the boundary API's minute-granular duration.
    pub fn from_minutes(
        root_url: impl Into<String>,
        duration_minutes: u64,
        num_explorers: u32,
        num_extractors: u32,
    ) -> Self {
        Self::new(
            root_url,
            Duration::from_secs(duration_minutes * 60),
            num_explorers,
            num_extractors,
        )
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            root_url: self.root_url.clone(),
            duration: self.duration.as_secs_f64() / 60.0,
            num_explorers: self.num_explorers,
            num_extractors: self.num_extractors,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let url = Url::parse(&self.root_url).map_err(|e| {
            AppError::ConfigError(format!("Invalid root URL '{}': {e}", self.root_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(AppError::ConfigError(format!(
                "Root URL must be an absolute http(s) URL, got '{}'",
                self.root_url
            )));
        }
        if self.duration.is_zero() {
            return Err(AppError::ConfigError("Duration must be positive".into()));
        }
        if self.num_explorers == 0 || self.num_extractors == 0 {
            return Err(AppError::ConfigError(
                "At least one explorer and one extractor are required".into(),
            ));
        }
        Ok(())
    }
}

/// Serializable echo of a crawl configuration, duration in minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub root_url: String,
    pub duration: f64,
    pub num_explorers: u32,
    pub num_extractors: u32,
}

/// A started crawl: its parameters plus the moment workers were seeded.
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub root_url: String,
    pub duration: Duration,
    pub num_explorers: u32,
    pub num_extractors: u32,
    /// Seconds since the Unix epoch at which the seed was pushed.
    pub start_time: f64,
}

/// Configuration for a single explorer or extractor worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Bound on each blocking pop; also the stop-flag observation latency.
    pub pop_timeout: Duration,
    /// Pause after a broker error before the next iteration.
    pub broker_backoff: Duration,
    /// Log a progress line every this many processed items.
    pub progress_every: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: short_id("worker"),
            pop_timeout: Duration::from_secs(1),
            broker_backoff: Duration::from_secs(2),
            progress_every: 10,
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    pub fn with_broker_backoff(mut self, backoff: Duration) -> Self {
        self.broker_backoff = backoff;
        self
    }
}

/// Timing knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long `start` waits for each readiness acknowledgment.
    pub ack_timeout: Duration,
    /// Also require an extractor acknowledgment before seeding.
    pub await_extractor_ack: bool,
    /// Deadline monitor poll interval.
    pub monitor_interval: Duration,
    /// Status broadcast interval.
    pub status_interval: Duration,
    /// Upper bound on waiting for nodes to confirm their pools stopped
    /// before results are collected. Keep it above the fetch timeout.
    pub drain_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            await_extractor_ack: false,
            monitor_interval: Duration::from_secs(1),
            status_interval: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(15),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_extractor_ack(mut self, required: bool) -> Self {
        self.await_extractor_ack = required;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Configuration for a worker node daemon.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: Role,
    /// Pool size used when the broker carries no count for this role.
    pub default_workers: u32,
    /// How long a forced stop waits before aborting workers.
    pub terminate_grace: Duration,
    /// How often finished pools are reaped while idle.
    pub reap_interval: Duration,
    /// Pause before resubscribing after the control channel drops.
    pub resubscribe_backoff: Duration,
}

impl NodeConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            default_workers: 4,
            terminate_grace: Duration::from_secs(5),
            reap_interval: Duration::from_millis(500),
            resubscribe_backoff: Duration::from_secs(2),
        }
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn with_resubscribe_backoff(mut self, backoff: Duration) -> Self {
        self.resubscribe_backoff = backoff;
        self
    }
}
