//! A node's set of concurrently running workers.

use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::job::Role;
use crate::node::WorkerFactory;
use crate::util::short_id;

type WorkerExit = (String, Result<u64, AppError>);

/// How a pool's workers ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolExit {
    pub completed: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Items processed by workers that exited on their own.
    pub processed: u64,
}

pub struct WorkerPool {
    role: Role,
    size: u32,
    cancel_token: CancellationToken,
    tasks: JoinSet<WorkerExit>,
    exit: PoolExit,
}

impl WorkerPool {
    /// Spawn `size` workers from `factory`.
    ///
    /// The pool's token is a child of `parent`, so cancelling the parent
    /// (node shutdown) also stops the pool.
    pub fn spawn<WF: WorkerFactory>(factory: &WF, size: u32, parent: &CancellationToken) -> Self {
        let role = factory.role();
        let cancel_token = parent.child_token();
        let mut tasks = JoinSet::new();

        for _ in 0..size {
            let worker_id = short_id(role.as_str());
            let worker = factory.launch(worker_id.clone(), cancel_token.clone());
            tasks.spawn(async move { (worker_id, worker.await) });
        }
        tracing::info!(%role, workers = size, "Worker pool spawned");

        Self {
            role,
            size,
            cancel_token,
            tasks,
            exit: PoolExit::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Workers still running (or finished but not yet reaped).
    pub fn live(&self) -> usize {
        self.tasks.len()
    }

    /// Collect workers that have already exited. Returns the number still live.
    pub fn reap(&mut self) -> usize {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
        self.tasks.len()
    }

    /// Ask every worker to stop after its current item.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Wait for every worker to exit on its own.
    pub async fn join_all(mut self) -> PoolExit {
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        self.exit
    }

    /// Cancel, wait up to `grace` for workers to finish, then abort the rest.
    pub async fn terminate(mut self, grace: Duration) -> PoolExit {
        self.cancel();
        let deadline = Instant::now() + grace;

        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(result)) => self.record(result),
                Ok(None) => break,
                Err(_) => {
                    let remaining = self.tasks.len();
                    tracing::warn!(role = %self.role, remaining, "Grace period expired, aborting workers");
                    self.tasks.abort_all();
                    while let Some(result) = self.tasks.join_next().await {
                        self.record(result);
                    }
                    break;
                }
            }
        }
        self.exit
    }

    fn record(&mut self, result: Result<WorkerExit, JoinError>) {
        match result {
            Ok((worker_id, Ok(processed))) => {
                tracing::debug!(%worker_id, processed, "Worker exited");
                self.exit.completed += 1;
                self.exit.processed += processed;
            }
            Ok((worker_id, Err(e))) => {
                tracing::error!(%worker_id, error = %e, "Worker failed");
                self.exit.failed += 1;
            }
            Err(e) if e.is_cancelled() => {
                self.exit.aborted += 1;
            }
            Err(e) => {
                tracing::error!(role = %self.role, error = %e, "Worker panicked");
                self.exit.failed += 1;
            }
        }
    }
}
