//! HTTP gateway for warmprompt.
//!
//! Serves the tool endpoint that the remote invocation variant talks to,
//! the cache metrics surface, and a health check. Every invocation is
//! independent: the only state shared across requests is the pipeline's
//! cache accountant.
//!
//! Built on Axum.

pub mod api_v1;
pub mod error;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;
use warmprompt_config::AppConfig;
use warmprompt_pipeline::ToolPipeline;

pub use api_v1::{ApiV1State, SharedApiState};
pub use error::GatewayError;

/// Build the full router: `/health` plus the v1 API under `/v1`.
pub fn build_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state.clone())
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Build the pipeline from config and serve until the process stops.
pub async fn start(config: AppConfig) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let pipeline = ToolPipeline::from_config(&config, None)?;
    let state = Arc::new(ApiV1State {
        pipeline: Arc::new(pipeline),
        allow_stats_reset: config.gateway.allow_stats_reset,
    });

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;
    serve(listener, state).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, state: SharedApiState) -> Result<(), GatewayError> {
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_default();
    info!(
        addr = %addr,
        adapter = state.pipeline.adapter().name(),
        model = state.pipeline.adapter().model(),
        "Gateway listening"
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(GatewayError::Serve)
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub adapter: String,
    pub model: String,
}

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    let adapter = state.pipeline.adapter();
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        adapter: adapter.name().into(),
        model: adapter.model().into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> SharedApiState {
        Arc::new(ApiV1State {
            pipeline: Arc::new(ToolPipeline::from_config(&AppConfig::default(), None).unwrap()),
            allow_stats_reset: true,
        })
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state());

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.adapter, "local");
        assert_eq!(health.model, "anthropic/claude-sonnet-4");
    }

    #[tokio::test]
    async fn v1_routes_are_nested() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/metrics/cache")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(test_state());
        let req = Request::builder()
            .uri("/v1/chat")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
