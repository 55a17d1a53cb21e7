use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Arachne API",
        version = "0.1.0",
        description = "Control surface for a distributed, time-boxed same-origin crawl."
    ),
    paths(
        crate::routes::start,
        crate::routes::stop,
        crate::routes::status,
        crate::routes::events,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::StartCrawlRequest,
        crate::dto::StartCrawlResponse,
        crate::dto::CrawlConfigResponse,
        crate::dto::StopCrawlResponse,
        crate::dto::StatusResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "crawl", description = "Crawl lifecycle and live status"),
        (name = "system", description = "Health and system status"),
    )
)]
pub struct ApiDoc;
