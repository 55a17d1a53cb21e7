//! Explorer workers: drain the frontier, fetch each page once, enqueue new
//! same-origin links and hand the fetched HTML to extractors.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::broker::{Broker, keys, push_json};
use crate::error::AppError;
use crate::filter::crawlable_links;
use crate::job::{Role, WorkerConfig};
use crate::models::{ExploitItem, FrontierItem, decode};
use crate::node::WorkerFactory;
use crate::traits::{Fetcher, LinkExtractor};
use crate::worker::{QueueWorker, TracingWorkerReporter, WorkerEvent, WorkerReporter, run_worker};

pub struct ExplorerWorker<B, F, L>
where
    B: Broker,
    F: Fetcher,
    L: LinkExtractor,
{
    broker: B,
    fetcher: F,
    links: L,
    config: WorkerConfig,
}

impl<B, F, L> ExplorerWorker<B, F, L>
where
    B: Broker,
    F: Fetcher,
    L: LinkExtractor,
{
    pub fn new(broker: B, fetcher: F, links: L, config: WorkerConfig) -> Self {
        Self {
            broker,
            fetcher,
            links,
            config,
        }
    }

    /// Run until cancelled or the job-wide stop flag is raised.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<u64, AppError> {
        run_worker(self, cancel_token, reporter).await
    }

    /// Fetch `url` and return its HTML with the crawlable links found in it.
    ///
    /// A failed fetch yields no HTML and no links.
    async fn explore<WR: WorkerReporter>(
        &self,
        url: &str,
        reporter: &WR,
    ) -> (Option<String>, Vec<String>) {
        let html = match self.fetcher.fetch(url).await {
            Ok(html) => html,
            Err(e) => {
                let error = e.to_string();
                reporter.report(WorkerEvent::FetchFailed {
                    worker_id: &self.config.worker_id,
                    url,
                    error: &error,
                });
                return (None, Vec::new());
            }
        };

        let links = match Url::parse(url) {
            Ok(page) => {
                let hrefs = self.links.extract_links(&html);
                crawlable_links(&page, hrefs.iter().map(String::as_str))
            }
            Err(e) => {
                tracing::debug!(%url, error = %e, "Cannot resolve links against unparsable URL");
                Vec::new()
            }
        };
        (Some(html), links)
    }
}

impl<B, F, L> QueueWorker for ExplorerWorker<B, F, L>
where
    B: Broker,
    F: Fetcher,
    L: LinkExtractor,
{
    type Broker = B;

    const ROLE: Role = Role::Explorer;
    const QUEUE: &'static str = keys::EXPLORED_QUEUE;

    fn broker(&self) -> &B {
        &self.broker
    }

    fn config(&self) -> &WorkerConfig {
        &self.config
    }

    async fn handle<WR: WorkerReporter>(
        &self,
        payload: &str,
        reporter: &WR,
    ) -> Result<bool, AppError> {
        let item: FrontierItem = match decode(payload) {
            Ok(item) => item,
            Err(e) => {
                let error = e.to_string();
                reporter.report(WorkerEvent::MalformedItem {
                    worker_id: &self.config.worker_id,
                    error: &error,
                });
                return Ok(false);
            }
        };

        // The visited-set insert is the only dedup point: whichever explorer
        // adds the URL first owns it.
        if !self.broker.set_add(keys::VISITED_URLS, &item.url).await? {
            reporter.report(WorkerEvent::Duplicate { url: &item.url });
            return Ok(false);
        }

        reporter.report(WorkerEvent::Processing {
            worker_id: &self.config.worker_id,
            url: &item.url,
        });

        let (html, links) = self.explore(&item.url, reporter).await;

        let mut new_links = 0;
        for link in links {
            if self.broker.set_contains(keys::VISITED_URLS, &link).await? {
                continue;
            }
            push_json(&self.broker, keys::EXPLORED_QUEUE, &FrontierItem::new(link)).await?;
            new_links += 1;
        }

        push_json(
            &self.broker,
            keys::EXPLOIT_QUEUE,
            &ExploitItem {
                url: item.url.clone(),
                html,
            },
        )
        .await?;
        self.broker.incr(keys::URLS_FOUND).await?;

        reporter.report(WorkerEvent::Explored {
            url: &item.url,
            new_links,
        });
        Ok(true)
    }
}

/// Builds explorer workers for a node's pool.
#[derive(Clone)]
pub struct ExplorerFactory<B, F, L> {
    broker: B,
    fetcher: F,
    links: L,
    config: WorkerConfig,
}

impl<B, F, L> ExplorerFactory<B, F, L>
where
    B: Broker,
    F: Fetcher,
    L: LinkExtractor,
{
    pub fn new(broker: B, fetcher: F, links: L, config: WorkerConfig) -> Self {
        Self {
            broker,
            fetcher,
            links,
            config,
        }
    }
}

impl<B, F, L> WorkerFactory for ExplorerFactory<B, F, L>
where
    B: Broker,
    F: Fetcher,
    L: LinkExtractor,
{
    fn role(&self) -> Role {
        Role::Explorer
    }

    fn launch(
        &self,
        worker_id: String,
        cancel_token: CancellationToken,
    ) -> impl Future<Output = Result<u64, AppError>> + Send + 'static {
        let worker = ExplorerWorker::new(
            self.broker.clone(),
            self.fetcher.clone(),
            self.links.clone(),
            self.config.clone().with_worker_id(worker_id),
        );
        async move { worker.run(cancel_token, &TracingWorkerReporter).await }
    }
}
