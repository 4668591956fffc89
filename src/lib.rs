pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::upload_service::UploadService;
use crate::utils::urls::FILES_ROUTE;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::from_fn,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::status_handler,
        api::handlers::upload::upload_chunk_handler,
        api::handlers::upload::upload_single_handler,
        api::handlers::upload::merge_handler,
        api::handlers::upload::abort_upload_handler,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::upload::StatusResponse,
            api::handlers::upload::MergeRequest,
            api::handlers::health::HealthResponse,
            models::ReceivedChunk,
            models::MergedArtifact,
        )
    ),
    tags(
        (name = "uploads", description = "Resumable chunked upload endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadService>,
    pub config: UploadConfig,
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let artifacts = ServeDir::new(&state.config.upload_dir);

    // Sits inside the request-id middleware so the span always carries an id
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/upload/status", get(api::handlers::upload::status_handler))
        .route(
            "/upload/:fingerprint/chunks/:index",
            put(api::handlers::upload::upload_chunk_handler),
        )
        .route(
            "/upload/single",
            // Chunk size is enforced while streaming into the store
            post(api::handlers::upload::upload_single_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/merge", post(api::handlers::upload::merge_handler))
        .route(
            "/upload/:fingerprint",
            delete(api::handlers::upload::abort_upload_handler),
        )
        .nest_service(FILES_ROUTE, artifacts)
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(trace_layer)
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}
