//! Worker node daemon: waits on the control channel, spawns a pool of
//! explorers or extractors on `start` and tears it down on `stop`.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, keys, push_json};
use crate::error::AppError;
use crate::job::{NodeConfig, Role};
use crate::models::{ControlMessage, WorkerAck};
use crate::pool::WorkerPool;
use crate::worker::backoff;

/// Creates the workers a node runs.
pub trait WorkerFactory: Send + Sync + 'static {
    fn role(&self) -> Role;

    /// Build one worker and return its run future.
    ///
    /// The future must stop after its current item once `cancel_token` fires.
    fn launch(
        &self,
        worker_id: String,
        cancel_token: CancellationToken,
    ) -> impl Future<Output = Result<u64, AppError>> + Send + 'static;
}

pub struct WorkerNode<B, WF>
where
    B: Broker,
    WF: WorkerFactory,
{
    broker: B,
    factory: WF,
    config: NodeConfig,
}

impl<B, WF> WorkerNode<B, WF>
where
    B: Broker,
    WF: WorkerFactory,
{
    pub fn new(broker: B, factory: WF, config: NodeConfig) -> Self {
        Self {
            broker,
            factory,
            config,
        }
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Serve control commands until `shutdown` is cancelled.
    ///
    /// A lost subscription is re-established after a backoff. On shutdown any
    /// running pool is terminated with the configured grace period.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), AppError> {
        let role = self.config.role;
        tracing::info!(%role, "Worker node waiting for start command");

        let mut pool: Option<WorkerPool> = None;

        while !shutdown.is_cancelled() {
            let control = match self.broker.subscribe(keys::CONTROL_CHANNEL).await {
                Ok(control) => control,
                Err(e) => {
                    tracing::warn!(%role, error = %e, "Control subscription failed");
                    if !backoff(&shutdown, self.config.resubscribe_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if self.serve(control, &mut pool, &shutdown).await {
                break;
            }
            tracing::warn!(%role, "Control channel lost, resubscribing");
            if !backoff(&shutdown, self.config.resubscribe_backoff).await {
                break;
            }
        }

        if let Some(pool) = pool.take() {
            let size = pool.size();
            let exit = pool.terminate(self.config.terminate_grace).await;
            tracing::info!(%role, ?exit, "Worker pool shut down");
            self.ack_stopped(size).await;
        }
        tracing::info!(%role, "Worker node stopped");
        Ok(())
    }

    /// Handle messages from one subscription. Returns true on shutdown, false
    /// when the subscription closed.
    async fn serve(
        &self,
        mut control: mpsc::UnboundedReceiver<String>,
        pool: &mut Option<WorkerPool>,
        shutdown: &CancellationToken,
    ) -> bool {
        let mut reap = tokio::time::interval(self.config.reap_interval);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return true,
                message = control.recv() => match message {
                    Some(raw) => {
                        let current = pool.take();
                        *pool = self.handle_message(&raw, current, shutdown).await;
                    }
                    None => return false,
                },
                _ = reap.tick() => {
                    if let Some(done) = pool.take_if(|running| running.reap() == 0) {
                        tracing::info!(role = %self.config.role, "All workers finished, waiting for next start");
                        self.ack_stopped(done.size()).await;
                    }
                }
            }
        }
    }

    async fn handle_message(
        &self,
        raw: &str,
        pool: Option<WorkerPool>,
        shutdown: &CancellationToken,
    ) -> Option<WorkerPool> {
        let role = self.config.role;
        let command = match ControlMessage::decode(raw) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(%role, error = %e, "Ignoring unknown control message");
                return pool;
            }
        };

        match command {
            ControlMessage::Start => {
                if let Some(previous) = pool {
                    tracing::warn!(%role, "Start received while a pool is running, replacing it");
                    previous.terminate(self.config.terminate_grace).await;
                }
                Some(self.start_pool(shutdown).await)
            }
            ControlMessage::Stop { drain: true } => {
                if let Some(running) = &pool {
                    tracing::info!(%role, "Stop received, letting workers drain");
                    running.cancel();
                }
                pool
            }
            ControlMessage::Stop { drain: false } => {
                if let Some(running) = pool {
                    tracing::info!(%role, "Stop received, terminating workers");
                    let size = running.size();
                    let exit = running.terminate(self.config.terminate_grace).await;
                    tracing::info!(%role, ?exit, "Worker pool terminated");
                    self.ack_stopped(size).await;
                }
                None
            }
        }
    }

    /// Spawn the pool sized from the broker and acknowledge readiness.
    async fn start_pool(&self, shutdown: &CancellationToken) -> WorkerPool {
        let role = self.config.role;
        let size = self.pool_size().await;
        let pool = WorkerPool::spawn(&self.factory, size, shutdown);

        match push_json(&self.broker, role.ack_queue(), &WorkerAck::ready(size)).await {
            Ok(()) => tracing::info!(%role, workers = size, "Acknowledged start"),
            Err(e) => tracing::error!(%role, error = %e, "Failed to acknowledge start"),
        }
        pool
    }

    /// Report that this node's pool is gone, so the orchestrator can collect
    /// results knowing no worker of the job still writes to the broker.
    async fn ack_stopped(&self, size: u32) {
        let role = self.config.role;
        match push_json(&self.broker, role.ack_queue(), &WorkerAck::stopped(size)).await {
            Ok(()) => tracing::info!(%role, "Acknowledged stop"),
            Err(e) => tracing::error!(%role, error = %e, "Failed to acknowledge stop"),
        }
    }

    async fn pool_size(&self) -> u32 {
        let role = self.config.role;
        match self.broker.get(role.count_key()).await {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(%role, value = %raw, "Invalid worker count, using default");
                self.config.default_workers
            }),
            Ok(None) => self.config.default_workers,
            Err(e) => {
                tracing::warn!(%role, error = %e, "Could not read worker count, using default");
                self.config.default_workers
            }
        }
    }
}
