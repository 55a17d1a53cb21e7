use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, stop_requested};
use crate::error::AppError;
use crate::job::{Role, WorkerConfig};

/// Events emitted by explorer and extractor workers for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
        role: Role,
    },
    Idle,
    Processing {
        worker_id: &'a str,
        url: &'a str,
    },
    Duplicate {
        url: &'a str,
    },
    FetchFailed {
        worker_id: &'a str,
        url: &'a str,
        error: &'a str,
    },
    Explored {
        url: &'a str,
        new_links: usize,
    },
    Extracted {
        url: &'a str,
        title: &'a str,
    },
    Progress {
        worker_id: &'a str,
        role: Role,
        processed: u64,
    },
    MalformedItem {
        worker_id: &'a str,
        error: &'a str,
    },
    BrokerUnavailable {
        worker_id: &'a str,
        error: &'a str,
    },
    ItemFailed {
        worker_id: &'a str,
        error: &'a str,
    },
    Stopped {
        worker_id: &'a str,
        role: Role,
        processed: u64,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id, role } => {
                tracing::info!(%worker_id, %role, "Worker started and waiting for jobs");
            }
            WorkerEvent::Idle => {
                tracing::trace!("Queue empty");
            }
            WorkerEvent::Processing { worker_id, url } => {
                tracing::debug!(%worker_id, %url, "Processing");
            }
            WorkerEvent::Duplicate { url } => {
                tracing::debug!(%url, "Already visited, skipping");
            }
            WorkerEvent::FetchFailed {
                worker_id,
                url,
                error,
            } => {
                tracing::warn!(%worker_id, %url, %error, "Fetch failed");
            }
            WorkerEvent::Explored { url, new_links } => {
                tracing::debug!(%url, %new_links, "Explored page");
            }
            WorkerEvent::Extracted { url, title } => {
                tracing::debug!(%url, %title, "Extracted title");
            }
            WorkerEvent::Progress {
                worker_id,
                role,
                processed,
            } => {
                tracing::info!(%worker_id, %role, %processed, "Worker progress");
            }
            WorkerEvent::MalformedItem { worker_id, error } => {
                tracing::warn!(%worker_id, %error, "Dropping malformed queue item");
            }
            WorkerEvent::BrokerUnavailable { worker_id, error } => {
                tracing::warn!(%worker_id, %error, "Broker unavailable, backing off");
            }
            WorkerEvent::ItemFailed { worker_id, error } => {
                tracing::warn!(%worker_id, %error, "Queue item failed");
            }
            WorkerEvent::Stopped {
                worker_id,
                role,
                processed,
            } => {
                tracing::info!(%worker_id, %role, %processed, "Worker stopped");
            }
        }
    }
}

/// One kind of queue-draining worker.
///
/// [`run_worker`] owns the loop (pop, stop checks, backoff); implementors
/// only decide what a single popped payload means.
pub trait QueueWorker: Send + Sync {
    type Broker: Broker;

    const ROLE: Role;
    const QUEUE: &'static str;

    fn broker(&self) -> &Self::Broker;

    fn config(&self) -> &WorkerConfig;

    /// Handle one popped payload.
    ///
    /// Returns `Ok(true)` when the item counted as processed, `Ok(false)` when
    /// it was dropped (duplicate or malformed). An error loses the item;
    /// retryable ones also make the loop back off.
    fn handle<WR: WorkerReporter>(
        &self,
        payload: &str,
        reporter: &WR,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Drain `W::QUEUE` until the token is cancelled or the broker stop flag is
/// raised. Returns the number of processed items.
///
/// The stop condition is checked after every pop, whether it timed out or
/// returned an item, so the current item always finishes and no new one is
/// started once stop is observed.
pub async fn run_worker<W: QueueWorker, WR: WorkerReporter>(
    worker: &W,
    cancel: CancellationToken,
    reporter: &WR,
) -> Result<u64, AppError> {
    let config = worker.config();
    let worker_id = config.worker_id.as_str();
    reporter.report(WorkerEvent::Started {
        worker_id,
        role: W::ROLE,
    });

    let mut processed: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let popped = worker
            .broker()
            .pop_blocking(W::QUEUE, config.pop_timeout)
            .await;

        match popped {
            Ok(None) => reporter.report(WorkerEvent::Idle),
            Ok(Some(payload)) => match worker.handle(&payload, reporter).await {
                Ok(true) => {
                    processed += 1;
                    if config.progress_every > 0 && processed % config.progress_every == 0 {
                        reporter.report(WorkerEvent::Progress {
                            worker_id,
                            role: W::ROLE,
                            processed,
                        });
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    let error = e.to_string();
                    if e.is_broker_loss() {
                        reporter.report(WorkerEvent::BrokerUnavailable {
                            worker_id,
                            error: &error,
                        });
                    } else {
                        reporter.report(WorkerEvent::ItemFailed {
                            worker_id,
                            error: &error,
                        });
                    }
                    if e.is_retryable() {
                        if !backoff(&cancel, config.broker_backoff).await {
                            break;
                        }
                        continue;
                    }
                }
            },
            Err(e) => {
                let error = e.to_string();
                reporter.report(WorkerEvent::BrokerUnavailable {
                    worker_id,
                    error: &error,
                });
                if !backoff(&cancel, config.broker_backoff).await {
                    break;
                }
                continue;
            }
        }

        if should_stop(worker.broker(), &cancel).await {
            break;
        }
    }

    reporter.report(WorkerEvent::Stopped {
        worker_id,
        role: W::ROLE,
        processed,
    });
    Ok(processed)
}

/// Local cancellation or the job-wide broker flag.
///
/// An unreachable broker does not stop the worker; the next pop will surface
/// the failure and trigger the backoff path.
pub async fn should_stop<B: Broker>(broker: &B, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return true;
    }
    match stop_requested(broker).await {
        Ok(stop) => stop,
        Err(e) => {
            tracing::debug!(error = %e, "Could not read stop flag");
            false
        }
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
pub async fn backoff(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}
