use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use tower::ServiceExt;

use arachne_core::{CrawlConfig, JobPhase};

use crate::integration::common::{TestApp, setup_test_app, setup_test_app_without_nodes};

async fn send(app: &TestApp, request: Request<Body>) -> Response {
    app.router.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn start_body() -> serde_json::Value {
    serde_json::json!({
        "root_url": "https://example.test/",
        "duration": 1,
        "num_explorers": 1,
        "num_extractors": 1,
    })
}

async fn wait_for_phase(app: &TestApp, phase: JobPhase) {
    for _ in 0..100 {
        if app.orchestrator.phase() == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("orchestrator never reached {phase}");
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app_without_nodes().await;

    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["broker"], "ok");
}

#[tokio::test]
async fn health_reports_unreachable_broker() {
    let app = setup_test_app_without_nodes().await;
    app.broker.set_offline(true);

    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = json_body(response).await;
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn status_when_idle() {
    let app = setup_test_app_without_nodes().await;

    let response = send(&app, Request::get("/status").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["running"], false);
    assert_eq!(json["phase"], "idle");
    assert_eq!(json["urls_found"], 0);
}

#[tokio::test]
async fn stop_when_idle_is_a_no_op() {
    let app = setup_test_app_without_nodes().await;

    let response = send(&app, Request::post("/stop").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "No crawl running");
}

#[tokio::test]
async fn start_with_invalid_url_returns_400() {
    let app = setup_test_app().await;

    let response = send(
        &app,
        post_json("/start", serde_json::json!({ "root_url": "ftp://example.test/" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "validation_error");
    assert_eq!(app.orchestrator.phase(), JobPhase::Idle);
}

#[tokio::test]
async fn start_without_nodes_returns_504() {
    let app = setup_test_app_without_nodes().await;

    let response = send(&app, post_json("/start", start_body())).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let json = json_body(response).await;
    assert_eq!(json["error"], "ack_timeout");
    assert_eq!(app.orchestrator.phase(), JobPhase::Idle);
}

#[tokio::test]
async fn crawl_lifecycle_over_http() {
    let app = setup_test_app().await;

    let response = send(&app, post_json("/start", start_body())).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Scraper started successfully");
    assert_eq!(json["config"]["root_url"], "https://example.test/");
    assert_eq!(json["config"]["duration"], 1.0);

    let response = send(&app, post_json("/start", start_body())).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"], "invalid_state");

    let response = send(&app, Request::get("/status").body(Body::empty()).unwrap()).await;
    let json = json_body(response).await;
    assert_eq!(json["running"], true);
    assert_eq!(json["phase"], "running");

    let response = send(&app, Request::post("/stop").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["message"], "Stop signal sent");

    wait_for_phase(&app, JobPhase::Completed).await;
    let completion = app.orchestrator.last_completion().unwrap();
    let csv = completion.files.csv_filename.unwrap();
    assert!(csv.starts_with(&app.out_dir.path().display().to_string()));
    assert!(std::path::Path::new(&csv).exists());

    let response = send(&app, Request::get("/status").body(Body::empty()).unwrap()).await;
    let json = json_body(response).await;
    assert_eq!(json["running"], false);
    assert_eq!(json["phase"], "completed");
}

#[tokio::test]
async fn start_defaults_apply_to_empty_body() {
    let app = setup_test_app().await;

    let response = send(&app, Request::post("/start").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["config"]["root_url"], "https://www.dlsu.edu.ph/");
    assert_eq!(json["config"]["duration"], 60.0);
    assert_eq!(json["config"]["num_explorers"], 4);
    assert_eq!(json["config"]["num_extractors"], 1);

    app.orchestrator.stop().await.unwrap();
    wait_for_phase(&app, JobPhase::Completed).await;
}

#[tokio::test]
async fn events_stream_status_updates() {
    let app = setup_test_app().await;
    app.orchestrator
        .start(CrawlConfig::new(
            "https://example.test/",
            Duration::from_secs(60),
            1,
            1,
        ))
        .await
        .unwrap();

    let response = send(&app, Request::get("/events").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    let mut body = response.into_body();
    let mut seen = String::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = body.frame().await {
            if let Ok(data) = frame.unwrap().into_data() {
                seen.push_str(&String::from_utf8_lossy(&data));
                if seen.contains("event: status_update") {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "no status_update frame in: {seen}");
    assert!(seen.contains("\"urls_found\""));

    app.orchestrator.stop().await.unwrap();
    wait_for_phase(&app, JobPhase::Completed).await;
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = setup_test_app_without_nodes().await;

    let response = send(
        &app,
        Request::get("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    for path in ["/start", "/stop", "/status", "/events", "/health"] {
        assert!(json["paths"].get(path).is_some(), "missing {path}");
    }
}
