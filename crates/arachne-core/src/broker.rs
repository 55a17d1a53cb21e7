//! The coordination broker contract.
//!
//! Every piece of shared crawl state lives behind this trait: counters, the
//! visited set used for deduplication, the frontier and exploit queues, the
//! control channel, the acknowledgment queues and the result stream. Workers,
//! nodes and the orchestrator never share memory with each other, only a
//! broker handle.
//!
//! Implementations must make [`Broker::set_add`] and [`Broker::pop_blocking`]
//! atomic across every client: the first is the dedup checkpoint, the second
//! guarantees a queue item reaches exactly one consumer. An unreachable
//! broker is reported as [`AppError::BrokerError`], never as an empty result.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::AppError;

/// Well-known keys shared by the orchestrator and the worker nodes.
pub mod keys {
    pub const NUM_EXPLORERS: &str = "num_explorers";
    pub const NUM_EXTRACTORS: &str = "num_extractors";
    pub const STOP_SIGNAL: &str = "stop_signal";
    pub const DURATION: &str = "duration";
    pub const URLS_FOUND: &str = "urls_found";
    pub const URLS_EXTRACTED: &str = "urls_extracted";
    pub const ROOT_URL: &str = "root_url";
    pub const START_TIME: &str = "start_time";
    pub const VISITED_URLS: &str = "visited_urls";
    pub const EXPLORED_QUEUE: &str = "explored_queue";
    pub const EXPLOIT_QUEUE: &str = "exploit_queue";
    pub const RESULTS_STREAM: &str = "results_stream";
    pub const EXPLORER_ACK: &str = "explorer_ack";
    pub const EXTRACTOR_ACK: &str = "extractor_ack";
    pub const CONTROL_CHANNEL: &str = "scraper_control";

    /// Every key holding per-job state, cleared before a new job starts.
    pub const JOB_STATE: &[&str] = &[
        NUM_EXPLORERS,
        NUM_EXTRACTORS,
        STOP_SIGNAL,
        DURATION,
        URLS_FOUND,
        URLS_EXTRACTED,
        ROOT_URL,
        START_TIME,
        VISITED_URLS,
        EXPLORED_QUEUE,
        EXPLOIT_QUEUE,
        RESULTS_STREAM,
        EXPLORER_ACK,
        EXTRACTOR_ACK,
    ];
}

/// One record of an append-only stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Monotonically increasing id assigned on append.
    pub id: u64,
    pub payload: String,
}

/// Shared coordination substrate for every crawl participant.
pub trait Broker: Send + Sync + Clone + 'static {
    /// Linearizable increment. A missing key counts as 0.
    fn incr(&self, key: &str) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Add `member` to `set`. Returns true iff it was not already present.
    fn set_add(
        &self,
        set: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn set_contains(
        &self,
        set: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn set_card(&self, set: &str) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Append `payload` at the tail of `queue`. Never blocks: queues are unbounded.
    fn push(&self, queue: &str, payload: &str)
    -> impl Future<Output = Result<(), AppError>> + Send;

    /// Remove and return the head of `queue`, waiting up to `timeout`.
    ///
    /// Returns `None` when nothing arrived in time.
    fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn queue_len(&self, queue: &str) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Deliver `message` to every current subscriber of `channel`.
    fn publish(
        &self,
        channel: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Subscribe to `channel`.
    ///
    /// The receiver yields `None` once the subscription's connection is lost;
    /// callers are expected to resubscribe.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<String>, AppError>> + Send;

    /// Append a record to `stream`, returning its id.
    fn stream_append(
        &self,
        stream: &str,
        payload: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Every record of `stream`, in append order.
    fn stream_range(
        &self,
        stream: &str,
    ) -> impl Future<Output = Result<Vec<StreamEntry>, AppError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, AppError>> + Send;

    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Remove `key` whatever kind of value it holds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Read an integer value, treating a missing key as 0.
pub async fn get_i64<B: Broker>(broker: &B, key: &str) -> Result<i64, AppError> {
    match broker.get(key).await? {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::ProtocolError(format!("key '{key}' holds non-integer '{raw}'"))),
        None => Ok(0),
    }
}

/// Whether the job-wide stop flag is raised.
pub async fn stop_requested<B: Broker>(broker: &B) -> Result<bool, AppError> {
    Ok(broker.get(keys::STOP_SIGNAL).await?.as_deref() == Some("1"))
}

/// Serialize `value` as JSON and push it onto `queue`.
pub async fn push_json<B: Broker, T: Serialize + Sync>(
    broker: &B,
    queue: &str,
    value: &T,
) -> Result<(), AppError> {
    let payload = serde_json::to_string(value)?;
    broker.push(queue, &payload).await
}
