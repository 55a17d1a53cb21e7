//! Extractor workers: turn fetched pages into result records.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, keys};
use crate::error::AppError;
use crate::job::{Role, WorkerConfig};
use crate::models::{ExploitItem, ResultRecord, decode};
use crate::node::WorkerFactory;
use crate::traits::TitleExtractor;
use crate::worker::{QueueWorker, TracingWorkerReporter, WorkerEvent, WorkerReporter, run_worker};

/// Title recorded when a page has neither a `<title>` nor an `<h1>`.
pub const NO_TITLE: &str = "No title found";

/// Title recorded when the explorer could not fetch the page.
pub const TITLE_UNAVAILABLE: &str = "Error extracting title";

pub struct ExtractorWorker<B, T>
where
    B: Broker,
    T: TitleExtractor,
{
    broker: B,
    titles: T,
    config: WorkerConfig,
}

impl<B, T> ExtractorWorker<B, T>
where
    B: Broker,
    T: TitleExtractor,
{
    pub fn new(broker: B, titles: T, config: WorkerConfig) -> Self {
        Self {
            broker,
            titles,
            config,
        }
    }

    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<u64, AppError> {
        run_worker(self, cancel_token, reporter).await
    }

    fn title_for(&self, html: Option<&str>) -> String {
        match html {
            Some(html) => self
                .titles
                .extract_title(html)
                .unwrap_or_else(|| NO_TITLE.to_string()),
            None => TITLE_UNAVAILABLE.to_string(),
        }
    }
}

impl<B, T> QueueWorker for ExtractorWorker<B, T>
where
    B: Broker,
    T: TitleExtractor,
{
    type Broker = B;

    const ROLE: Role = Role::Extractor;
    const QUEUE: &'static str = keys::EXPLOIT_QUEUE;

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
        let item: ExploitItem = match decode(payload) {
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

        let title = self.title_for(item.html.as_deref());
        let record = ResultRecord::now(item.url, title, &self.config.worker_id);
        let payload = serde_json::to_string(&record)?;

        // Append before counting: urls_extracted never exceeds the stream length.
        self.broker
            .stream_append(keys::RESULTS_STREAM, &payload)
            .await?;
        self.broker.incr(keys::URLS_EXTRACTED).await?;

        reporter.report(WorkerEvent::Extracted {
            url: &record.url,
            title: &record.title,
        });
        Ok(true)
    }
}

/// Builds extractor workers for a node's pool.
#[derive(Clone)]
pub struct ExtractorFactory<B, T> {
    broker: B,
    titles: T,
    config: WorkerConfig,
}

impl<B, T> ExtractorFactory<B, T>
where
    B: Broker,
    T: TitleExtractor,
{
    pub fn new(broker: B, titles: T, config: WorkerConfig) -> Self {
        Self {
            broker,
            titles,
            config,
        }
    }
}

impl<B, T> WorkerFactory for ExtractorFactory<B, T>
where
    B: Broker,
    T: TitleExtractor,
{
    fn role(&self) -> Role {
        Role::Extractor
    }

    fn launch(
        &self,
        worker_id: String,
        cancel_token: CancellationToken,
    ) -> impl Future<Output = Result<u64, AppError>> + Send + 'static {
        let worker = ExtractorWorker::new(
            self.broker.clone(),
            self.titles.clone(),
            self.config.clone().with_worker_id(worker_id),
        );
        async move { worker.run(cancel_token, &TracingWorkerReporter).await }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::broker::{get_i64, push_json};
    use crate::memory_broker::MemoryBroker;
    use crate::testutil::*;

    fn worker(broker: &MemoryBroker) -> ExtractorWorker<MemoryBroker, MockTitleExtractor> {
        ExtractorWorker::new(
            broker.clone(),
            MockTitleExtractor,
            WorkerConfig::default()
                .with_worker_id("extractor-test")
                .with_pop_timeout(Duration::from_millis(20)),
        )
    }

    async fn enqueue(broker: &MemoryBroker, url: &str, html: Option<&str>) {
        let item = ExploitItem {
            url: url.to_string(),
            html: html.map(str::to_string),
        };
        push_json(broker, keys::EXPLOIT_QUEUE, &item).await.unwrap();
    }

    /// Process everything queued so far, then stop via the broker flag.
    async fn drain(broker: &MemoryBroker) -> (u64, RecordingReporter) {
        let reporter = RecordingReporter::default();
        let cancel = CancellationToken::new();
        let stopper = {
            let broker = broker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while broker.queue_len(keys::EXPLOIT_QUEUE).await.unwrap() > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                cancel.cancel();
            })
        };
        let processed = worker(broker).run(cancel, &reporter).await.unwrap();
        stopper.await.unwrap();
        (processed, reporter)
    }

    async fn records(broker: &MemoryBroker) -> Vec<ResultRecord> {
        broker
            .stream_range(keys::RESULTS_STREAM)
            .await
            .unwrap()
            .iter()
            .map(|entry| decode(&entry.payload).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_titles_recorded_with_fallbacks() {
        let broker = MemoryBroker::new();
        enqueue(&broker, "https://a.com/", Some("<title>Home</title>")).await;
        enqueue(&broker, "https://a.com/h", Some("<h1>Heading</h1>")).await;
        enqueue(&broker, "https://a.com/bare", Some("<p>text</p>")).await;
        enqueue(&broker, "https://a.com/down", None).await;

        let (processed, _) = drain(&broker).await;

        assert_eq!(processed, 4);
        let titles: Vec<_> = records(&broker)
            .await
            .into_iter()
            .map(|r| (r.url, r.title))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("https://a.com/".to_string(), "Home".to_string()),
                ("https://a.com/h".to_string(), "Heading".to_string()),
                ("https://a.com/bare".to_string(), NO_TITLE.to_string()),
                ("https://a.com/down".to_string(), TITLE_UNAVAILABLE.to_string()),
            ]
        );
        assert_eq!(get_i64(&broker, keys::URLS_EXTRACTED).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_record_carries_worker_id_and_timestamp() {
        let broker = MemoryBroker::new();
        enqueue(&broker, "https://a.com/", Some("<title>Home</title>")).await;

        drain(&broker).await;

        let record = &records(&broker).await[0];
        assert_eq!(record.worker_id, "extractor-test");
        assert!(record.timestamp.parse::<f64>().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_malformed_item_not_counted() {
        let broker = MemoryBroker::new();
        broker.push(keys::EXPLOIT_QUEUE, "[1,2]").await.unwrap();
        enqueue(&broker, "https://a.com/", Some("<title>Home</title>")).await;

        let (processed, reporter) = drain(&broker).await;

        assert_eq!(processed, 1);
        assert_eq!(reporter.count("malformed"), 1);
        assert_eq!(records(&broker).await.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_reported_every_ten_items() {
        let broker = MemoryBroker::new();
        for i in 0..25 {
            enqueue(&broker, &format!("https://a.com/{i}"), Some("<title>t</title>")).await;
        }

        let (processed, reporter) = drain(&broker).await;

        assert_eq!(processed, 25);
        assert_eq!(reporter.count("progress"), 2);
    }

    #[tokio::test]
    async fn test_exits_within_pop_timeout_of_stop_flag() {
        let broker = MemoryBroker::new();
        broker.set(keys::STOP_SIGNAL, "1").await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            worker(&broker).run(CancellationToken::new(), &RecordingReporter::default()),
        )
        .await;

        assert_eq!(result.unwrap().unwrap(), 0);
    }
}
