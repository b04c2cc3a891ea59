//! Network invocation variant.
//!
//! Sends the request fields as JSON to an equivalent remote tool service
//! and reads back `{"response": text, "usage"?: {...}}`. Streaming requests
//! ask for `text/event-stream`, where the service emits `chunk` events
//! followed by one `done` event carrying usage.
//!
//! Establishing the exchange (connect, status, non-streamed body) is retried
//! per [`RetryPolicy`]. Once a stream has started it is never restarted.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use warmprompt_compose::token;
use warmprompt_core::adapter::{
    AdapterKind, ChunkStream, Completion, InvocationAdapter, InvocationCall, InvokeOptions,
    StreamItem, Usage,
};
use warmprompt_core::error::{ErrorKind, InvocationError};
use warmprompt_core::message::{HistoryTurn, MessageBlock};

use crate::retry::RetryPolicy;

/// Adapter for a remote tool endpoint.
pub struct RemoteAdapter {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl RemoteAdapter {
    /// Create an adapter for `endpoint` with a per-attempt HTTP timeout.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, InvocationError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| InvocationError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// POST the call, retrying transient failures, and return a 2xx response.
    async fn send(
        &self,
        call: &InvocationCall,
        options: &InvokeOptions,
    ) -> Result<reqwest::Response, InvocationError> {
        let body = RemoteRequest {
            message: &call.request.message,
            conversation_history: &call.request.conversation_history,
            order_context: &call.request.order_context,
            user_metadata: &call.request.user_metadata,
            stream: options.stream,
            max_tokens: options.max_tokens,
        };

        self.retry
            .run(&self.endpoint, |attempt| {
                let body = &body;
                async move {
                    debug!(
                        invocation_id = %call.invocation_id,
                        endpoint = %self.endpoint,
                        attempt,
                        stream = options.stream,
                        "Sending remote invocation"
                    );
                    let started = Instant::now();

                    let mut request = self.client.post(&self.endpoint).json(body);
                    if options.stream {
                        request = request.header("Accept", "text/event-stream");
                    }
                    if let Some(key) = &self.api_key {
                        request = request.header("Authorization", format!("Bearer {key}"));
                    }

                    let response = request
                        .send()
                        .await
                        .map_err(|e| transport_error(e, started))?;

                    let status = response.status();
                    if !status.is_success() {
                        let message = response.text().await.unwrap_or_default();
                        warn!(
                            status = status.as_u16(),
                            body = %message,
                            "Remote tool returned error"
                        );
                        if status == reqwest::StatusCode::GATEWAY_TIMEOUT {
                            return Err(InvocationError::UpstreamTimeout(message));
                        }
                        return Err(InvocationError::Status {
                            status_code: status.as_u16(),
                            message,
                        });
                    }

                    Ok(response)
                }
            })
            .await
    }

    fn estimated_usage(messages: &[MessageBlock], content: &str) -> Usage {
        Usage::new(
            token::estimate_blocks_tokens(messages) as u32,
            token::estimate_tokens(content) as u32,
            0,
        )
    }
}

fn transport_error(e: reqwest::Error, started: Instant) -> InvocationError {
    if e.is_timeout() {
        InvocationError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    } else {
        InvocationError::Network(e.to_string())
    }
}

fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

#[async_trait]
impl InvocationAdapter for RemoteAdapter {
    fn name(&self) -> &str {
        "remote"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Remote
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> Result<Completion, InvocationError> {
        let mut options = options.clone();
        options.stream = false;

        let response = self.send(&call, &options).await?;
        let body: RemoteResponse = response
            .json()
            .await
            .map_err(|e| InvocationError::Protocol(format!("Failed to parse response: {e}")))?;

        let usage = body
            .usage
            .unwrap_or_else(|| Self::estimated_usage(&call.messages, &body.response));

        Ok(Completion {
            content: body.response,
            usage: normalize(usage),
            model: body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    async fn stream(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> Result<ChunkStream, InvocationError> {
        let mut options = options.clone();
        options.stream = true;

        let response = self.send(&call, &options).await?;

        if !is_event_stream(&response) {
            // Service ignored the stream flag: adapt the JSON reply.
            let body: RemoteResponse = response
                .json()
                .await
                .map_err(|e| InvocationError::Protocol(format!("Failed to parse response: {e}")))?;
            let usage = body
                .usage
                .unwrap_or_else(|| Self::estimated_usage(&call.messages, &body.response));
            let model = body.model.unwrap_or_else(|| self.model.clone());
            let (tx, stream) = ChunkStream::channel(model, 2);
            let _ = tx.send(Ok(StreamItem::Chunk(body.response))).await;
            let _ = tx.send(Ok(StreamItem::Done(normalize(usage)))).await;
            return Ok(stream);
        }

        let (tx, stream) = ChunkStream::channel(self.model.clone(), 64);
        let messages = call.messages;
        let invocation_id = call.invocation_id;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();
            let mut content = String::new();
            let mut chunks_sent = 0usize;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(InvocationError::StreamInterrupted {
                                chunks_received: chunks_sent,
                                reason: e.to_string(),
                            }))
                            .await;
                        return;
                    }
                };

                for event in parser.push(&bytes) {
                    match event.event.as_str() {
                        "chunk" => {
                            let Ok(chunk) = serde_json::from_str::<ChunkEvent>(&event.data) else {
                                warn!(
                                    invocation_id = %invocation_id,
                                    data = %event.data,
                                    "Malformed chunk event"
                                );
                                let _ = tx
                                    .send(Err(InvocationError::StreamInterrupted {
                                        chunks_received: chunks_sent,
                                        reason: "malformed chunk event".into(),
                                    }))
                                    .await;
                                return;
                            };
                            content.push_str(&chunk.content);
                            chunks_sent += 1;
                            if tx.send(Ok(StreamItem::Chunk(chunk.content))).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        "done" => {
                            let usage = serde_json::from_str::<DoneEvent>(&event.data)
                                .ok()
                                .and_then(|d| d.usage)
                                .unwrap_or_else(|| {
                                    RemoteAdapter::estimated_usage(&messages, &content)
                                });
                            debug!(
                                invocation_id = %invocation_id,
                                chunks = chunks_sent,
                                "Remote stream complete"
                            );
                            let _ = tx.send(Ok(StreamItem::Done(normalize(usage)))).await;
                            return;
                        }
                        "error" => {
                            let error = error_event(&event.data, chunks_sent, started);
                            warn!(
                                invocation_id = %invocation_id,
                                error = %error,
                                "Remote stream failed"
                            );
                            let _ = tx.send(Err(error)).await;
                            return;
                        }
                        other => trace!(event = other, "Ignoring unknown SSE event"),
                    }
                }
            }
            // Ended without `done`: dropping `tx` surfaces StreamInterrupted.
            warn!(
                invocation_id = %invocation_id,
                chunks = chunks_sent,
                "Remote stream ended without completion"
            );
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<bool, InvocationError> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .map_err(|e| InvocationError::Protocol(format!("Invalid endpoint: {e}")))?;
        url.set_path("/health");
        url.set_query(None);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InvocationError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Map a remote `error` event onto the stream failure of the same kind.
fn error_event(data: &str, chunks_received: usize, started: Instant) -> InvocationError {
    match serde_json::from_str::<ErrorEvent>(data) {
        Ok(ErrorEvent {
            kind: Some(ErrorKind::InvocationTimeout),
            ..
        }) => InvocationError::StreamTimeout {
            chunks_received,
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
        Ok(event) => InvocationError::StreamInterrupted {
            chunks_received,
            reason: format!("remote error: {}", event.error),
        },
        Err(_) => InvocationError::StreamInterrupted {
            chunks_received,
            reason: format!("remote error: {data}"),
        },
    }
}

/// Keep totals consistent when a service reports partial usage.
fn normalize(mut usage: Usage) -> Usage {
    if usage.total_tokens == 0 {
        usage.total_tokens = usage.prompt_tokens.saturating_add(usage.completion_tokens);
    }
    usage.cached_tokens = usage.cached_tokens.min(usage.total_tokens);
    usage
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct RemoteRequest<'a> {
    message: &'a str,
    conversation_history: &'a [HistoryTurn],
    order_context: &'a serde_json::Map<String, serde_json::Value>,
    user_metadata: &'a serde_json::Map<String, serde_json::Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RemoteResponse {
    response: String,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    content: String,
}

#[derive(Debug, Deserialize)]
struct DoneEvent {
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: String,
    #[serde(default)]
    kind: Option<ErrorKind>,
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` line parser.
///
/// Bytes are buffered until a full line arrives, so a UTF-8 sequence split
/// across network reads is decoded whole.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed raw bytes and return every event completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".into()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                } else {
                    self.event = None;
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }
}
