//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/invoke`             : Run one tool invocation (JSON or SSE)
//! - `GET  /v1/metrics/cache`      : Cache effectiveness snapshot
//! - `POST /v1/metrics/cache/reset`: Administrative reset (when enabled)

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;
use warmprompt_core::adapter::{StreamItem, Usage};
use warmprompt_core::error::ErrorKind;
use warmprompt_core::request::ToolInvocationRequest;
use warmprompt_pipeline::{RecordingStream, ToolPipeline};
use warmprompt_telemetry::CacheStatsSnapshot;

use crate::error::GatewayError;

// ── State ─────────────────────────────────────────────────────────────────

/// Shared state for the v1 API.
pub struct ApiV1State {
    pub pipeline: Arc<ToolPipeline>,
    pub allow_stats_reset: bool,
}

pub type SharedApiState = Arc<ApiV1State>;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    let mut router = Router::new()
        .route("/invoke", post(invoke_handler))
        .route("/metrics/cache", get(cache_metrics_handler));
    if state.allow_stats_reset {
        router = router.route("/metrics/cache/reset", post(reset_metrics_handler));
    }
    router.with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

/// Request body for `POST /v1/invoke`.
#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    #[serde(flatten)]
    pub request: ToolInvocationRequest,
    #[serde(default)]
    pub stream: bool,
}

/// Terminal `done` event of a streamed invocation.
#[derive(Debug, Serialize, Deserialize)]
pub struct DoneEventDto {
    pub usage: Usage,
    pub model: String,
    pub invocation_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkEventDto {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEventDto {
    pub error: String,
    pub kind: ErrorKind,
    pub partial: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub reset: bool,
    pub previous: CacheStatsSnapshot,
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `POST /v1/invoke`
async fn invoke_handler(
    State(state): State<SharedApiState>,
    payload: Result<Json<InvokeRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(payload) = payload.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    info!(
        message_len = payload.request.message.len(),
        history_turns = payload.request.conversation_history.len(),
        stream = payload.stream,
        "v1/invoke request"
    );

    if payload.stream {
        let stream = state.pipeline.invoke_stream(payload.request).await?;
        Ok(Sse::new(sse_events(stream)).into_response())
    } else {
        let response = state.pipeline.invoke(payload.request).await?;
        Ok(Json(response).into_response())
    }
}

/// Map pipeline stream items onto `chunk` / `done` / `error` events.
fn sse_events(stream: RecordingStream) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let model = stream.model().to_string();
    let invocation_id = stream.invocation_id().to_string();

    stream.map(move |item| {
        let (name, data) = match item {
            Ok(StreamItem::Chunk(content)) => {
                ("chunk", serde_json::to_string(&ChunkEventDto { content }))
            }
            Ok(StreamItem::Done(usage)) => (
                "done",
                serde_json::to_string(&DoneEventDto {
                    usage,
                    model: model.clone(),
                    invocation_id: invocation_id.clone(),
                }),
            ),
            Err(e) => (
                "error",
                serde_json::to_string(&ErrorEventDto {
                    error: e.to_string(),
                    kind: e.kind(),
                    partial: e.is_partial(),
                }),
            ),
        };
        Ok(SseEvent::default().event(name).data(data.unwrap_or_default()))
    })
}

/// `GET /v1/metrics/cache`
async fn cache_metrics_handler(State(state): State<SharedApiState>) -> Json<CacheStatsSnapshot> {
    Json(state.pipeline.accountant().snapshot())
}

/// `POST /v1/metrics/cache/reset`
async fn reset_metrics_handler(State(state): State<SharedApiState>) -> Json<ResetResponse> {
    let previous = state.pipeline.accountant().reset();
    Json(ResetResponse {
        reset: true,
        previous,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────
