use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use arachne_core::keys;
use arachne_core::{Broker, CrawlConfig, CrawlEvent, StartRequest};

use crate::dto::{
    HealthResponse, StartCrawlRequest, StartCrawlResponse, StatusResponse, StopCrawlResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router.
pub fn router<B: Broker>(state: Arc<AppState<B>>) -> Router {
    let api = Router::new()
        .route("/start", post(start::<B>))
        .route("/stop", post(stop::<B>))
        .route("/status", get(status::<B>))
        .route("/events", get(events::<B>));

    let public = Router::new()
        .route("/health", get(health::<B>))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Crawl lifecycle
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/start",
    request_body = StartCrawlRequest,
    responses(
        (status = 200, description = "Crawl started", body = StartCrawlResponse),
        (status = 400, description = "Invalid crawl parameters", body = crate::dto::ErrorResponse),
        (status = 409, description = "A crawl is already active", body = crate::dto::ErrorResponse),
        (status = 504, description = "No worker node acknowledged", body = crate::dto::ErrorResponse),
    ),
    tag = "crawl"
)]
pub async fn start<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
    body: Option<axum::Json<StartCrawlRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request: StartRequest = body.map(|axum::Json(b)| b).unwrap_or_default().into();
    tracing::info!(root_url = %request.root_url, "Start requested");

    let response = state.orchestrator.start(CrawlConfig::from(request)).await?;

    Ok(axum::Json(StartCrawlResponse::from(response)))
}

#[utoipa::path(
    post,
    path = "/stop",
    responses(
        (status = 200, description = "Stop requested, or nothing to stop", body = StopCrawlResponse),
    ),
    tag = "crawl"
)]
pub async fn stop<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.orchestrator.stop().await?;
    Ok(axum::Json(StopCrawlResponse::from(response)))
}

#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Current crawl status", body = StatusResponse),
        (status = 503, description = "Broker unavailable", body = crate::dto::ErrorResponse),
    ),
    tag = "crawl"
)]
pub async fn status<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
) -> Result<impl IntoResponse, ApiError> {
    let phase = state.orchestrator.phase();
    let snapshot = state.orchestrator.status().await?;
    Ok(axum::Json(StatusResponse::new(phase.as_str(), snapshot)))
}

/// Server-sent stream of `status_update`, `scraper_stopped` and
/// `scraper_completed` events.
#[utoipa::path(
    get,
    path = "/events",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream"),
    ),
    tag = "crawl"
)]
pub async fn events<B: Broker>(
    State(state): State<Arc<AppState<B>>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.orchestrator.subscribe();
    let stream = futures::stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => return Some((Ok(to_sse(&event)), receiver)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event subscriber lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &CrawlEvent) -> Event {
    let (name, data) = match event {
        CrawlEvent::Status(snapshot) => ("status_update", serde_json::to_string(snapshot)),
        CrawlEvent::Stopped { message } => (
            "scraper_stopped",
            serde_json::to_string(&serde_json::json!({ "message": message })),
        ),
        CrawlEvent::Completed(completion) => {
            ("scraper_completed", serde_json::to_string(completion))
        }
    };
    let data = data.unwrap_or_else(|e| {
        tracing::warn!(event = name, error = %e, "Failed to encode event");
        "{}".to_string()
    });
    Event::default().event(name).data(data)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Broker unreachable", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health<B: Broker>(State(state): State<Arc<AppState<B>>>) -> impl IntoResponse {
    let broker_ok = state
        .orchestrator
        .broker()
        .get(keys::STOP_SIGNAL)
        .await
        .is_ok();

    let (status, response) = if broker_ok {
        (
            StatusCode::OK,
            HealthResponse {
                status: "healthy",
                broker: "ok",
            },
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            HealthResponse {
                status: "unhealthy",
                broker: "error",
            },
        )
    };

    (status, axum::Json(response))
}
