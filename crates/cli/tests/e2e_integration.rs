//! End-to-end integration tests for warmprompt.
//!
//! These tests run the real axum gateway on an ephemeral port and drive it
//! through the remote adapter over TCP, alongside in-process pipelines
//! built from the same crates the binary uses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use futures::StreamExt;
use tokio::net::TcpListener;
use warmprompt_compose::PromptComposer;
use warmprompt_config::AppConfig;
use warmprompt_context::{ContextAggregator, KeywordPassageIndex, RequestHistory, RequestMetadata};
use warmprompt_core::adapter::{StreamItem, Usage};
use warmprompt_core::context::{ContextSource, Passage, PassageRetriever};
use warmprompt_core::error::{ContextError, ErrorKind, InvocationError};
use warmprompt_core::message::{HistoryTurn, MessageBlock, Role};
use warmprompt_core::request::ToolInvocationRequest;
use warmprompt_gateway::{ApiV1State, SharedApiState};
use warmprompt_pipeline::ToolPipeline;
use warmprompt_providers::{Generation, LocalAdapter, LocalModel, RemoteAdapter, RetryPolicy};
use warmprompt_telemetry::CacheAccountant;

const TEMPLATE: &str = "You are a customer support assistant for an online store.\n\
    Answer using only the context provided.\n";

// ── Helpers ──────────────────────────────────────────────────────────────

/// Start the gateway with `pipeline` behind it. Returns its base URL.
async fn spawn_gateway(pipeline: ToolPipeline) -> (String, SharedApiState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(ApiV1State {
        pipeline: Arc::new(pipeline),
        allow_stats_reset: true,
    });
    tokio::spawn(warmprompt_gateway::serve(listener, state.clone()));
    (format!("http://{addr}"), state)
}

fn local_gateway_pipeline() -> ToolPipeline {
    ToolPipeline::from_config(&AppConfig::default(), None).unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50))
}

/// A client-side pipeline that invokes the tool over the network.
fn remote_pipeline(base_url: &str) -> ToolPipeline {
    let adapter = RemoteAdapter::new(
        format!("{base_url}/v1/invoke"),
        "anthropic/claude-sonnet-4",
        Duration::from_secs(5),
    )
    .unwrap()
    .with_retry(fast_retry());

    ToolPipeline::new(
        ContextAggregator::default(),
        PromptComposer::from_template("support-v1", TEMPLATE).unwrap(),
        Arc::new(adapter),
        Arc::new(CacheAccountant::new()),
    )
}

fn order_request() -> ToolInvocationRequest {
    let serde_json::Value::Object(order) =
        serde_json::json!({"orders": [{"id": 123, "status": "shipped"}]})
    else {
        unreachable!()
    };
    ToolInvocationRequest::new("Where is my order?").with_order_context(order)
}

/// Local model that records the messages it was given.
struct CapturingModel {
    seen: Mutex<Vec<Vec<MessageBlock>>>,
}

impl CapturingModel {
    fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    fn last(&self) -> Vec<MessageBlock> {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LocalModel for CapturingModel {
    fn model_id(&self) -> &str {
        "capture/model"
    }

    async fn generate(
        &self,
        messages: &[MessageBlock],
        _max_tokens: Option<u32>,
    ) -> Result<Generation, InvocationError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(Generation {
            text: "captured".into(),
            usage: Usage::new(50, 2, 0),
        })
    }
}

/// Retriever that never answers within any reasonable budget.
struct StalledRetriever;

#[async_trait]
impl PassageRetriever for StalledRetriever {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn retrieve(
        &self,
        _request: &ToolInvocationRequest,
    ) -> Result<Vec<Passage>, ContextError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![Passage::new("too late", 1.0)])
    }
}

// ── Composition ──────────────────────────────────────────────────────────

#[tokio::test]
async fn order_request_composes_three_blocks_in_fixed_order() {
    let model = Arc::new(CapturingModel::new());
    let index = KeywordPassageIndex::from_passages([
        "Orders ship within two business days.",
        "Refunds are issued to the original payment method.",
    ]);
    let pipeline = ToolPipeline::new(
        ContextAggregator::new(
            Arc::new(RequestHistory),
            Arc::new(RequestMetadata),
            Arc::new(index),
        ),
        PromptComposer::from_template("support-v1", TEMPLATE).unwrap(),
        Arc::new(LocalAdapter::new(model.clone())),
        Arc::new(CacheAccountant::new()),
    );

    let request = order_request().with_history(vec![
        HistoryTurn::user("Hi, I placed an order yesterday"),
        HistoryTurn::assistant("Happy to help. What do you need?"),
    ]);
    let response = pipeline.invoke(request).await.unwrap();
    assert_eq!(response.content, "captured");

    let blocks = model.last();
    assert_eq!(blocks.len(), 3);

    assert_eq!(blocks[0].role, Role::System);
    assert!(blocks[0].cache_eligible);
    assert_eq!(blocks[0].content, TEMPLATE);

    assert_eq!(blocks[1].role, Role::System);
    assert!(!blocks[1].cache_eligible);
    assert!(blocks[1].content.contains("\"status\": \"shipped\""));
    assert!(blocks[1].content.contains("Orders ship within two business days."));
    assert!(blocks[1].content.contains("Hi, I placed an order yesterday"));

    assert_eq!(blocks[2].role, Role::User);
    assert!(!blocks[2].cache_eligible);
    assert_eq!(blocks[2].content, "Where is my order?");
}

// ── Remote adapter against the real gateway ──────────────────────────────

#[tokio::test]
async fn remote_cold_then_warm_cache_hit() {
    let (base_url, server) = spawn_gateway(local_gateway_pipeline()).await;
    let client = remote_pipeline(&base_url);

    let cold = client.invoke(order_request()).await.unwrap();
    assert_eq!(cold.usage.cached_tokens, 0);
    assert!(cold.content.contains("Where is my order?"));

    let warm = client.invoke(order_request()).await.unwrap();
    assert!(warm.usage.cached_tokens > 0);
    assert_eq!(
        warm.usage.cached_tokens as usize,
        server.pipeline.composer().template().token_count()
    );
    assert!(warm.usage.cost_estimate < cold.usage.cost_estimate);

    let client_stats = client.accountant().snapshot();
    assert_eq!(client_stats.requests_total, 2);
    assert_eq!(client_stats.cache_hits, 1);
    assert_eq!(client_stats.hit_rate, 0.5);

    let server_stats = server.pipeline.accountant().snapshot();
    assert_eq!(server_stats.requests_total, 2);
    assert_eq!(server_stats.cache_hits, 1);
}

#[tokio::test]
async fn remote_streaming_over_sse() {
    let (base_url, server) = spawn_gateway(local_gateway_pipeline()).await;
    let client = remote_pipeline(&base_url);

    let mut stream = client.invoke_stream(order_request()).await.unwrap();
    let mut text = String::new();
    let mut chunks = 0;
    let mut usage = None;
    while let Some(item) = stream.next().await {
        match item.unwrap() {
            StreamItem::Chunk(c) => {
                chunks += 1;
                text.push_str(&c);
            }
            StreamItem::Done(u) => usage = Some(u),
        }
    }

    assert!(chunks > 1);
    assert!(text.contains("Where is my order?"));
    let usage = usage.unwrap();
    assert!(usage.prompt_tokens > 0);
    assert!(stream.is_recorded());
    assert_eq!(client.accountant().snapshot().requests_total, 1);
    assert_eq!(server.pipeline.accountant().snapshot().requests_total, 1);
}

#[tokio::test]
async fn remote_health_check_reaches_gateway() {
    let (base_url, _server) = spawn_gateway(local_gateway_pipeline()).await;
    let client = remote_pipeline(&base_url);
    assert!(client.adapter().health_check().await.unwrap());
}

#[tokio::test]
async fn gateway_rejects_invalid_request_without_retry() {
    let (base_url, server) = spawn_gateway(local_gateway_pipeline()).await;

    let (status, body) = raw_post(&format!("{base_url}/v1/invoke"), r#"{"message": "   "}"#).await;
    assert_eq!(status, 400);
    assert!(body.contains("invalid_request"));
    assert_eq!(server.pipeline.accountant().snapshot().requests_total, 0);
}

/// Minimal raw HTTP POST so this test does not depend on the adapter.
async fn raw_post(url: &str, body: &str) -> (u16, String) {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let without_scheme = url.trim_start_matches("http://");
    let (host, path) = without_scheme.split_once('/').unwrap();
    let mut socket = tokio::net::TcpStream::connect(host).await.unwrap();
    let request = format!(
        "POST /{path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    socket.write_all(request.as_bytes()).await.unwrap();

    let mut raw = String::new();
    socket.read_to_string(&mut raw).await.unwrap();
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    (status, raw)
}

// ── Failure policy ───────────────────────────────────────────────────────

#[tokio::test]
async fn transport_failure_after_three_attempts_records_nothing() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/v1/invoke",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = remote_pipeline(&format!("http://{addr}"));
    let err = client.invoke(order_request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvocationTransportFailure);
    assert!(err.to_string().contains("after 3 attempt"), "{err}");
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let stats = client.accountant().snapshot();
    assert_eq!(stats.requests_total, 0);
    assert_eq!(stats.tokens_total, 0);
}

#[tokio::test]
async fn gateway_transport_failure_propagates_as_502() {
    let mut config = AppConfig::default();
    config.adapter.kind = "remote".into();
    config.adapter.endpoint = Some("http://127.0.0.1:9/v1/invoke".into());
    config.adapter.max_attempts = 1;
    let pipeline = ToolPipeline::from_config(&config, None).unwrap();
    let (base_url, _server) = spawn_gateway(pipeline).await;

    let (status, body) = raw_post(&format!("{base_url}/v1/invoke"), r#"{"message": "hi"}"#).await;
    assert_eq!(status, 502);
    assert!(body.contains("invocation_transport_failure"));
}

#[tokio::test]
async fn retrieval_timeout_degrades_to_empty_passages() {
    let model = Arc::new(CapturingModel::new());
    let pipeline = ToolPipeline::new(
        ContextAggregator::from_request(Arc::new(StalledRetriever))
            .with_timeout(Duration::from_millis(50)),
        PromptComposer::from_template("support-v1", TEMPLATE).unwrap(),
        Arc::new(LocalAdapter::new(model.clone())),
        Arc::new(CacheAccountant::new()),
    );

    let started = std::time::Instant::now();
    let response = pipeline.invoke(order_request()).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(response.degraded.len(), 1);
    assert_eq!(response.degraded[0].source, ContextSource::Retrieval);

    let dynamic = &model.last()[1].content;
    assert!(dynamic.contains("\"status\": \"shipped\""));
    assert!(!dynamic.contains("too late"));
    assert_eq!(pipeline.accountant().snapshot().requests_total, 1);
}

#[tokio::test]
async fn concurrent_invocations_are_counted_exactly() {
    let (base_url, server) = spawn_gateway(local_gateway_pipeline()).await;
    let client = Arc::new(remote_pipeline(&base_url));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .invoke(ToolInvocationRequest::new(format!("question {i}")))
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let client_stats = client.accountant().snapshot();
    let server_stats = server.pipeline.accountant().snapshot();
    assert_eq!(client_stats.requests_total, 16);
    assert_eq!(server_stats.requests_total, 16);
    assert_eq!(client_stats.cache_hits, server_stats.cache_hits);
    assert!(server_stats.cache_hits >= 15);
}
