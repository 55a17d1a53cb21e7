use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use arachne_core::{FileExporter, Orchestrator, OrchestratorConfig};
use arachne_db::{Database, DatabaseConfig};
use arachne_server::routes;
use arachne_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("arachne=info".parse()?))
        .with_target(false)
        .init();

    let port = std::env::var("ARACHNE_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let out_dir = std::env::var("ARACHNE_OUT_DIR").unwrap_or_else(|_| "out".to_string());
    let ack_timeout = match std::env::var("ARACHNE_ACK_TIMEOUT") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid ARACHNE_ACK_TIMEOUT '{raw}'"))?,
        Err(_) => 10,
    };

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let orchestrator = Orchestrator::new(
        db.broker(),
        FileExporter::new(out_dir),
        OrchestratorConfig::default().with_ack_timeout(Duration::from_secs(ack_timeout)),
    );
    let state = Arc::new(AppState::new(orchestrator.clone()));

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Leave worker nodes stopped rather than crawling an orphaned job.
    if orchestrator.phase().is_active() {
        orchestrator.stop().await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
