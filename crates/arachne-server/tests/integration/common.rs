use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use arachne_core::testutil::{MockFetcher, MockLinkExtractor, MockTitleExtractor};
use arachne_core::{
    ExplorerFactory, ExtractorFactory, FileExporter, MemoryBroker, NodeConfig, Orchestrator,
    OrchestratorConfig, Role, WorkerConfig, WorkerNode,
};
use arachne_server::routes;
use arachne_server::state::AppState;

pub struct TestApp {
    pub router: Router,
    pub broker: MemoryBroker,
    pub orchestrator: Orchestrator<MemoryBroker, FileExporter>,
    pub out_dir: TempDir,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn site() -> MockFetcher {
    MockFetcher::new()
        .with_page(
            "https://example.test/",
            r#"<title>Home</title><a href="/a">a</a><a href="/b">b</a>"#,
        )
        .with_page("https://example.test/a", "<title>A</title>")
        .with_page("https://example.test/b", "<h1>B</h1>")
}

fn worker_config() -> WorkerConfig {
    WorkerConfig::default()
        .with_pop_timeout(Duration::from_millis(50))
        .with_broker_backoff(Duration::from_millis(50))
}

fn spawn_nodes(broker: &MemoryBroker, shutdown: &CancellationToken) {
    let explorer = WorkerNode::new(
        broker.clone(),
        ExplorerFactory::new(broker.clone(), site(), MockLinkExtractor, worker_config()),
        NodeConfig::new(Role::Explorer).with_terminate_grace(Duration::from_millis(500)),
    );
    let extractor = WorkerNode::new(
        broker.clone(),
        ExtractorFactory::new(broker.clone(), MockTitleExtractor, worker_config()),
        NodeConfig::new(Role::Extractor).with_terminate_grace(Duration::from_millis(500)),
    );
    let token = shutdown.clone();
    tokio::spawn(async move { explorer.run(token).await });
    let token = shutdown.clone();
    tokio::spawn(async move { extractor.run(token).await });
}

async fn build(with_nodes: bool) -> TestApp {
    let broker = MemoryBroker::new();
    let shutdown = CancellationToken::new();
    if with_nodes {
        spawn_nodes(&broker, &shutdown);
        // Let the nodes subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let out_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let orchestrator = Orchestrator::new(
        broker.clone(),
        FileExporter::new(out_dir.path()),
        OrchestratorConfig::default()
            .with_ack_timeout(Duration::from_millis(500))
            .with_monitor_interval(Duration::from_millis(100))
            .with_status_interval(Duration::from_millis(50))
            .with_drain_timeout(Duration::from_secs(5)),
    );
    let router = routes::router(Arc::new(AppState::new(orchestrator.clone())));

    TestApp {
        router,
        broker,
        orchestrator,
        out_dir,
        shutdown,
    }
}

/// Router backed by an in-memory broker with an explorer and an extractor node
/// crawling a three-page mock site.
pub async fn setup_test_app() -> TestApp {
    build(true).await
}

/// Router backed by an in-memory broker with no worker nodes listening.
pub async fn setup_test_app_without_nodes() -> TestApp {
    build(false).await
}
