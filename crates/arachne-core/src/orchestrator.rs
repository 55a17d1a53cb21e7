//! Control plane for one crawl at a time.
//!
//! The orchestrator owns the job lifecycle (`Idle → Starting → Running →
//! Stopping → Completed`): it resets and seeds the broker, performs the
//! acknowledgment handshake with worker nodes, enforces the deadline, and on
//! completion collects the result stream and hands it to a [`ResultSink`].
//! Background tasks (deadline monitor, status broadcaster) are tied to a
//! per-job [`CancellationToken`] cancelled when the job completes.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, keys, push_json};
use crate::error::AppError;
use crate::job::{
    ConfigSummary, CrawlConfig, CrawlJob, JobPhase, OrchestratorConfig, Role, StopReason,
};
use crate::models::{ControlMessage, FrontierItem, WorkerAck, decode};
use crate::status::{CompletionEvent, CrawlEvent, StatusSnapshot, collect_report, sample_status};
use crate::traits::ResultSink;
use crate::util::epoch_seconds;

const EVENT_CAPACITY: usize = 256;

/// Start parameters as accepted at the boundary (duration in minutes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub root_url: String,
    pub duration_minutes: u64,
    pub num_explorers: u32,
    pub num_extractors: u32,
}

impl From<StartRequest> for CrawlConfig {
    fn from(request: StartRequest) -> Self {
        CrawlConfig::from_minutes(
            request.root_url,
            request.duration_minutes,
            request.num_explorers,
            request.num_extractors,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
    pub config: ConfigSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub message: String,
}

impl StopResponse {
    fn new(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

/// Bookkeeping for the current (or last) job.
#[derive(Clone)]
struct JobRun {
    job: CrawlJob,
    config: CrawlConfig,
    started: Instant,
    /// Frozen elapsed time once the job completed.
    finished: Option<Duration>,
    cancel_token: CancellationToken,
}

impl JobRun {
    fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.started.elapsed())
    }
}

struct JobState {
    phase: JobPhase,
    run: Option<JobRun>,
    /// Set by `stop()` while the handshake is still in progress.
    abort_start: bool,
    last_completion: Option<CompletionEvent>,
}

struct Inner<B, S> {
    broker: B,
    sink: S,
    config: OrchestratorConfig,
    state: Mutex<JobState>,
    events: broadcast::Sender<CrawlEvent>,
}

pub struct Orchestrator<B, S>
where
    B: Broker,
    S: ResultSink,
{
    inner: Arc<Inner<B, S>>,
}

impl<B, S> Clone for Orchestrator<B, S>
where
    B: Broker,
    S: ResultSink,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B, S> Orchestrator<B, S>
where
    B: Broker,
    S: ResultSink,
{
    pub fn new(broker: B, sink: S, config: OrchestratorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                broker,
                sink,
                config,
                state: Mutex::new(JobState {
                    phase: JobPhase::Idle,
                    run: None,
                    abort_start: false,
                    last_completion: None,
                }),
                events,
            }),
        }
    }

    pub fn broker(&self) -> &B {
        &self.inner.broker
    }

    pub fn phase(&self) -> JobPhase {
        self.state().phase
    }

    /// Completion payload of the most recent finished job.
    pub fn last_completion(&self) -> Option<CompletionEvent> {
        self.state().last_completion.clone()
    }

    /// Receive status, stop and completion events.
    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.inner.events.subscribe()
    }

    /// Start a crawl.
    ///
    /// Resets all job state on the broker, publishes `start` and waits for
    /// worker nodes to acknowledge before seeding the root URL. Fails with
    /// [`AppError::AckTimeout`] when no explorer node answers in time; the
    /// orchestrator is then back in `Idle`.
    pub async fn start(&self, config: CrawlConfig) -> Result<StartResponse, AppError> {
        config.validate()?;

        {
            let mut state = self.state();
            if state.phase.is_active() {
                return Err(AppError::InvalidState(format!(
                    "A crawl is already {}",
                    state.phase
                )));
            }
            state.phase = JobPhase::Starting;
            state.abort_start = false;
        }

        let job = match self.launch(&config).await {
            Ok(job) => job,
            Err(e) => {
                self.state().phase = JobPhase::Idle;
                tracing::error!(error = %e, "Crawl failed to start");
                return Err(e);
            }
        };

        let cancel_token = CancellationToken::new();
        let run = JobRun {
            job,
            config: config.clone(),
            started: Instant::now(),
            finished: None,
            cancel_token: cancel_token.clone(),
        };
        {
            let mut state = self.state();
            state.phase = JobPhase::Running;
            state.run = Some(run.clone());
        }

        tokio::spawn(self.clone().monitor_deadline(run));
        tokio::spawn(self.clone().broadcast_status(cancel_token));

        tracing::info!(
            root_url = %config.root_url,
            duration_secs = config.duration.as_secs_f64(),
            explorers = config.num_explorers,
            extractors = config.num_extractors,
            "Crawl started"
        );
        Ok(StartResponse {
            success: true,
            message: "Scraper started successfully".to_string(),
            config: config.summary(),
        })
    }

    /// Stop the running crawl.
    ///
    /// Raises the stop flag and publishes a forced stop; collection and export
    /// continue in the background and are reported through a completion
    /// event. During a deadline drain this escalates to a forced stop without
    /// starting a second completion. Outside an active job it has no effect.
    pub async fn stop(&self) -> Result<StopResponse, AppError> {
        let (run, draining) = {
            let mut state = self.state();
            match state.phase {
                JobPhase::Running => {
                    state.phase = JobPhase::Stopping;
                    (state.run.clone(), false)
                }
                JobPhase::Starting => {
                    state.abort_start = true;
                    return Ok(StopResponse::new("Start cancelled"));
                }
                JobPhase::Stopping => (None, true),
                JobPhase::Idle | JobPhase::Completed => {
                    return Ok(StopResponse::new("No crawl running"));
                }
            }
        };
        if draining {
            tracing::info!("Stop requested while draining, terminating workers");
            self.raise_stop(false).await;
            return Ok(StopResponse::new("Crawl already stopping"));
        }
        let Some(run) = run else {
            return Err(AppError::InvalidState("Running crawl has no job record".into()));
        };

        tracing::info!("Stop requested");
        self.raise_stop(false).await;
        self.emit(CrawlEvent::Stopped {
            message: "Stop signal sent".to_string(),
        });
        tokio::spawn(self.clone().complete(run, StopReason::Manual));

        Ok(StopResponse::new("Stop signal sent"))
    }

    /// Sample the broker for the current job.
    pub async fn status(&self) -> Result<StatusSnapshot, AppError> {
        let (run, running) = {
            let state = self.state();
            (state.run.clone(), state.phase == JobPhase::Running)
        };
        match run {
            Some(run) => {
                sample_status(&self.inner.broker, run.elapsed(), run.config.duration, running).await
            }
            None => Ok(StatusSnapshot::idle()),
        }
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: CrawlEvent) {
        // No receivers is fine: nobody is watching.
        let _ = self.inner.events.send(event);
    }

    /// Reset, configure, handshake and seed. Any failure after `start` was
    /// published reconciles the nodes with a forced stop.
    async fn launch(&self, config: &CrawlConfig) -> Result<CrawlJob, AppError> {
        let broker = &self.inner.broker;

        for key in keys::JOB_STATE {
            broker.delete(key).await?;
        }
        broker
            .set(keys::NUM_EXPLORERS, &config.num_explorers.to_string())
            .await?;
        broker
            .set(keys::NUM_EXTRACTORS, &config.num_extractors.to_string())
            .await?;
        broker
            .set(keys::DURATION, &config.duration.as_secs_f64().to_string())
            .await?;
        broker.set(keys::ROOT_URL, &config.root_url).await?;
        broker.set(keys::STOP_SIGNAL, "0").await?;

        broker
            .publish(keys::CONTROL_CHANNEL, &ControlMessage::Start.encode()?)
            .await?;
        tracing::info!("Start command published, waiting for worker acknowledgment");

        match self.handshake_and_seed(config).await {
            Ok(job) => Ok(job),
            Err(e) => {
                self.raise_stop(false).await;
                Err(e)
            }
        }
    }

    async fn handshake_and_seed(&self, config: &CrawlConfig) -> Result<CrawlJob, AppError> {
        let broker = &self.inner.broker;

        let timeout = self.inner.config.ack_timeout;
        let explorers = self.await_ack(Role::Explorer, WorkerAck::READY, timeout).await?;
        tracing::info!(workers = explorers.num_workers, "Explorer node ready");
        if self.inner.config.await_extractor_ack {
            let extractors = self.await_ack(Role::Extractor, WorkerAck::READY, timeout).await?;
            tracing::info!(workers = extractors.num_workers, "Extractor node ready");
        }

        if self.state().abort_start {
            return Err(AppError::InvalidState(
                "Crawl start cancelled by stop request".into(),
            ));
        }

        let start_time = epoch_seconds();
        broker
            .set(keys::START_TIME, &start_time.to_string())
            .await?;
        push_json(broker, keys::EXPLORED_QUEUE, &FrontierItem::new(&config.root_url)).await?;

        Ok(CrawlJob {
            root_url: config.root_url.clone(),
            duration: config.duration,
            num_explorers: config.num_explorers,
            num_extractors: config.num_extractors,
            start_time,
        })
    }

    /// Wait for an acknowledgment with the given status on the role's ack
    /// queue.
    ///
    /// Malformed acks and acks with another status are logged and skipped;
    /// the overall wait is still bounded by `timeout`.
    async fn await_ack(
        &self,
        role: Role,
        status: &str,
        timeout: Duration,
    ) -> Result<WorkerAck, AppError> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(AppError::AckTimeout {
                    role: role.to_string(),
                    seconds: timeout.as_secs(),
                });
            }

            let Some(raw) = self
                .inner
                .broker
                .pop_blocking(role.ack_queue(), remaining)
                .await?
            else {
                continue;
            };
            match decode::<WorkerAck>(&raw) {
                Ok(ack) if ack.status == status => return Ok(ack),
                Ok(ack) => tracing::debug!(%role, status = %ack.status, expected = status, "Skipping acknowledgment"),
                Err(e) => tracing::warn!(%role, error = %e, "Ignoring malformed acknowledgment"),
            }
        }
    }

    /// Set the stop flag and tell nodes to stop. Failures are logged: workers
    /// still stop on their own once they observe either signal.
    async fn raise_stop(&self, drain: bool) {
        let broker = &self.inner.broker;
        if let Err(e) = broker.set(keys::STOP_SIGNAL, "1").await {
            tracing::warn!(error = %e, "Failed to set stop flag");
        }
        let command = ControlMessage::Stop { drain };
        let published = match command.encode() {
            Ok(message) => broker.publish(keys::CONTROL_CHANNEL, &message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            tracing::warn!(error = %e, "Failed to publish stop command");
        }
    }

    /// Poll the deadline until it passes or the job ends another way.
    async fn monitor_deadline(self, run: JobRun) {
        let deadline = run.started + run.config.duration;
        let interval = self.inner.config.monitor_interval;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                () = run.cancel_token.cancelled() => return,
                () = tokio::time::sleep(remaining.min(interval)) => {}
            }
        }

        {
            let mut state = self.state();
            if state.phase != JobPhase::Running {
                return;
            }
            state.phase = JobPhase::Stopping;
        }
        tracing::info!("Time limit reached, stopping crawl");
        self.raise_stop(true).await;
        self.complete(run, StopReason::Deadline).await;
    }

    /// Periodically emit status snapshots while anyone is listening.
    async fn broadcast_status(self, cancel_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.status_interval);
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.inner.events.receiver_count() == 0 {
                continue;
            }
            match self.status().await {
                Ok(snapshot) => self.emit(CrawlEvent::Status(snapshot)),
                Err(e) => tracing::debug!(error = %e, "Status sample failed"),
            }
        }
    }

    /// Wait until the nodes of this job report their pools gone, bounded by
    /// the drain timeout. No worker of this job may still write once the next
    /// `start` resets the broker.
    ///
    /// Extractors take part when their ack was required, or when their ready
    /// ack still sits unread on the queue.
    async fn await_pools_stopped(&self) {
        let deadline = Instant::now() + self.inner.config.drain_timeout;

        for role in [Role::Explorer, Role::Extractor] {
            if !self.took_part(role).await {
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.await_ack(role, WorkerAck::STOPPED, remaining).await {
                Ok(ack) => tracing::info!(%role, workers = ack.num_workers, "Worker pool stopped"),
                Err(e) => {
                    tracing::warn!(%role, error = %e, "Worker pool did not confirm stop, collecting anyway")
                }
            }
        }
    }

    async fn took_part(&self, role: Role) -> bool {
        if role == Role::Explorer || self.inner.config.await_extractor_ack {
            return true;
        }
        matches!(self.inner.broker.queue_len(role.ack_queue()).await, Ok(len) if len > 0)
    }

    /// `Stopping → Completed`: wait for pools to stop, collect, export, report.
    async fn complete(self, run: JobRun, reason: StopReason) {
        self.await_pools_stopped().await;
        let elapsed = run.started.elapsed();

        let collected = collect_report(
            &self.inner.broker,
            run.config.summary(),
            elapsed,
            reason,
        )
        .await;

        let completion = match collected {
            Ok(report) => {
                let files = match self.inner.sink.export(&report).await {
                    Ok(files) => files,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to export results");
                        Default::default()
                    }
                };
                tracing::info!(
                    root_url = %run.job.root_url,
                    started_at = run.job.start_time,
                    urls_found = report.urls_found,
                    urls_extracted = report.urls_extracted,
                    unique_visited = report.unique_visited,
                    duration_secs = report.duration,
                    ?reason,
                    "Crawl completed"
                );
                Some(CompletionEvent {
                    files,
                    results: report.summary(),
                })
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to collect results");
                None
            }
        };

        {
            let mut state = self.state();
            state.phase = JobPhase::Completed;
            if let Some(current) = state.run.as_mut() {
                current.finished = Some(elapsed);
            }
            state.last_completion.clone_from(&completion);
        }
        run.cancel_token.cancel();

        match completion {
            Some(event) => self.emit(CrawlEvent::Completed(Box::new(event))),
            None => self.emit(CrawlEvent::Stopped {
                message: "Crawl ended but results could not be collected".to_string(),
            }),
        }
    }
}
