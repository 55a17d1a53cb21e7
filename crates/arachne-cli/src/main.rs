use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use arachne_client::{ReqwestFetcher, ScraperLinkExtractor, ScraperTitleExtractor};
use arachne_core::{
    Broker, CompletionEvent, CrawlConfig, CrawlEvent, ExplorerFactory, ExtractorFactory,
    FileExporter, MemoryBroker, NodeConfig, Orchestrator, OrchestratorConfig, Role,
    StatusSnapshot, WorkerConfig, WorkerNode,
};
use arachne_db::{Database, DatabaseConfig};

#[derive(Parser)]
#[command(name = "arachne", version, about = "Distributed same-origin web crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one time-boxed crawl and export its results
    Crawl {
        /// Absolute http(s) URL the crawl starts from
        root_url: String,

        /// Crawl duration in minutes
        duration_minutes: u64,

        /// Explorer workers per node
        num_explorers: u32,

        /// Extractor workers per node
        num_extractors: u32,

        /// Run both worker nodes in-process over an in-memory broker
        #[arg(long, default_value_t = false)]
        local: bool,

        /// Directory receiving the CSV, summary and JSON exports
        #[arg(long, env = "ARACHNE_OUT_DIR", default_value = "out")]
        out_dir: PathBuf,

        /// Seconds to wait for a worker node to acknowledge the start
        #[arg(long, default_value_t = 10)]
        ack_timeout: u64,
    },

    /// Run an explorer node daemon against the shared broker
    ExplorerNode {
        /// Per-request fetch timeout in seconds
        #[arg(long, env = "ARACHNE_FETCH_TIMEOUT", default_value_t = 10)]
        fetch_timeout: u64,
    },

    /// Run an extractor node daemon against the shared broker
    ExtractorNode,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("arachne=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            root_url,
            duration_minutes,
            num_explorers,
            num_extractors,
            local,
            out_dir,
            ack_timeout,
        } => {
            let config =
                CrawlConfig::from_minutes(root_url, duration_minutes, num_explorers, num_extractors);
            config.validate()?;
            let orchestrator_config = crawl_orchestrator_config(ack_timeout);
            let exporter = FileExporter::new(out_dir);

            if local {
                let broker = MemoryBroker::new();
                let shutdown = CancellationToken::new();
                let nodes = spawn_local_nodes(&broker, &shutdown)?;
                let result = cmd_crawl(broker, exporter, orchestrator_config, config).await;
                shutdown_nodes(nodes, shutdown).await;
                result?;
            } else {
                let db = connect_db().await?;
                cmd_crawl(db.broker(), exporter, orchestrator_config, config).await?;
            }
        }
        Commands::ExplorerNode { fetch_timeout } => {
            let db = connect_db().await?;
            let fetcher = ReqwestFetcher::with_timeout(Duration::from_secs(fetch_timeout))?;
            let factory = ExplorerFactory::new(
                db.broker(),
                fetcher,
                ScraperLinkExtractor,
                WorkerConfig::default(),
            );
            run_node(WorkerNode::new(db.broker(), factory, node_config(Role::Explorer))).await?;
        }
        Commands::ExtractorNode => {
            let db = connect_db().await?;
            let factory =
                ExtractorFactory::new(db.broker(), ScraperTitleExtractor, WorkerConfig::default());
            run_node(WorkerNode::new(db.broker(), factory, node_config(Role::Extractor))).await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to the shared broker")?;
    db.migrate().await?;
    Ok(db)
}

/// The dashboard waits for both roles before seeding.
fn crawl_orchestrator_config(ack_timeout: u64) -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_ack_timeout(Duration::from_secs(ack_timeout))
        .with_extractor_ack(true)
        .with_status_interval(Duration::from_millis(500))
}

fn node_config(role: Role) -> NodeConfig {
    NodeConfig::new(role).with_terminate_grace(Duration::from_secs(2))
}

/// Run a node daemon until Ctrl-C.
async fn run_node<B, WF>(node: WorkerNode<B, WF>) -> Result<()>
where
    B: Broker,
    WF: arachne_core::WorkerFactory,
{
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
        }
        signal.cancel();
    });

    tracing::info!(role = %node.role(), "Node listening for control commands");
    node.run(shutdown).await?;
    Ok(())
}

fn spawn_local_nodes(
    broker: &MemoryBroker,
    shutdown: &CancellationToken,
) -> Result<JoinSet<()>> {
    let mut nodes = JoinSet::new();

    let explorers = ExplorerFactory::new(
        broker.clone(),
        ReqwestFetcher::new()?,
        ScraperLinkExtractor,
        WorkerConfig::default(),
    );
    let explorer_node = WorkerNode::new(broker.clone(), explorers, node_config(Role::Explorer));
    let token = shutdown.clone();
    nodes.spawn(async move {
        if let Err(e) = explorer_node.run(token).await {
            tracing::error!(error = %e, "Explorer node failed");
        }
    });

    let extractors =
        ExtractorFactory::new(broker.clone(), ScraperTitleExtractor, WorkerConfig::default());
    let extractor_node = WorkerNode::new(broker.clone(), extractors, node_config(Role::Extractor));
    let token = shutdown.clone();
    nodes.spawn(async move {
        if let Err(e) = extractor_node.run(token).await {
            tracing::error!(error = %e, "Extractor node failed");
        }
    });

    Ok(nodes)
}

async fn shutdown_nodes(mut nodes: JoinSet<()>, shutdown: CancellationToken) {
    shutdown.cancel();
    while nodes.join_next().await.is_some() {}
}

/// Start a crawl, render the dashboard until it completes, then print the results.
///
/// Ctrl-C during the crawl requests an early stop; results collected so far
/// are still exported.
async fn cmd_crawl<B: Broker>(
    broker: B,
    exporter: FileExporter,
    orchestrator_config: OrchestratorConfig,
    config: CrawlConfig,
) -> Result<()> {
    let orchestrator = Orchestrator::new(broker, exporter, orchestrator_config);
    let mut events = orchestrator.subscribe();

    println!("Crawling {} for {:.1} minutes", config.root_url, config.summary().duration);
    println!(
        "Explorers: {}, extractors: {}\n",
        config.num_explorers, config.num_extractors
    );

    println!("Waiting for worker nodes to acknowledge...");
    let response = orchestrator.start(config).await?;
    println!("{}\n", response.message);

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            result = &mut interrupt, if !interrupted => {
                interrupted = true;
                if result.is_ok() {
                    println!();
                    let stop = orchestrator.stop().await?;
                    tracing::info!("{}", stop.message);
                }
            }
            event = events.recv() => match event {
                Ok(CrawlEvent::Status(snapshot)) => render_status(&snapshot),
                Ok(CrawlEvent::Stopped { message }) => {
                    println!();
                    tracing::info!("{message}");
                }
                Ok(CrawlEvent::Completed(completion)) => {
                    println!();
                    print_results(&completion);
                    return Ok(());
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Dashboard fell behind");
                }
                Err(RecvError::Closed) => {
                    anyhow::bail!("Orchestrator event stream closed before completion");
                }
            }
        }
    }
}

fn render_status(snapshot: &StatusSnapshot) {
    let mut stdout = std::io::stdout().lock();
    let _ = write!(
        stdout,
        "\r[{:>5.1}%] {:>6.0}s left | found {:>6} | extracted {:>6} | queued {:>5}/{:<5} | {:.2} pages/s",
        snapshot.progress,
        snapshot.remaining,
        snapshot.urls_found,
        snapshot.urls_extracted,
        snapshot.explored_queue_len,
        snapshot.exploit_queue_len,
        snapshot.throughput,
    );
    let _ = stdout.flush();
}

fn print_results(completion: &CompletionEvent) {
    let results = &completion.results;
    println!("Crawl finished at {}", results.timestamp);
    println!("  Duration:           {:.1}s", results.duration);
    println!("  URLs found:         {}", results.urls_found);
    println!("  Pages extracted:    {}", results.urls_extracted);
    println!("  Unique URLs:        {}", results.unique_visited);
    println!("  Throughput:         {:.2} pages/s", results.throughput);
    println!("  Extraction rate:    {:.2}%", results.extraction_rate * 100.0);

    let files = &completion.files;
    for (label, path) in [
        ("CSV", &files.csv_filename),
        ("Summary", &files.txt_filename),
        ("JSON", &files.json_filename),
    ] {
        match path {
            Some(path) => println!("  {label:<8}            {path}"),
            None => println!("  {label:<8}            (not written)"),
        }
    }
}
