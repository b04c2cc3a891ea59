//! InvocationAdapter trait: the abstraction over model/tool backends.
//!
//! An adapter knows how to send a composed message sequence to a model or
//! tool and get a response back, either as a complete text or as a lazy
//! stream of chunks. The two variants (in-process and network) share this
//! one interface and are chosen when the pipeline is constructed.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};

use crate::error::InvocationError;
use crate::message::MessageBlock;
use crate::request::ToolInvocationRequest;

/// Which invocation variant an adapter implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    /// In-process call
    Local,
    /// Network call to an equivalent remote service
    Remote,
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeOptions {
    /// Produce a lazy chunk stream instead of a complete response
    #[serde(default)]
    pub stream: bool,

    /// Upper bound for the whole exchange, including a stream's body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl InvokeOptions {
    pub fn streaming() -> Self {
        Self {
            stream: true,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Everything one invocation sends downstream. Owned by that invocation.
#[derive(Debug, Clone)]
pub struct InvocationCall {
    /// Correlation id for logs
    pub invocation_id: String,

    /// The original request fields
    pub request: ToolInvocationRequest,

    /// The composed block sequence, cache-eligible prefix first
    pub messages: Vec<MessageBlock>,
}

/// Token usage envelope of a completed exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
    /// Prompt tokens billed at the cached rate
    #[serde(default)]
    pub cached_tokens: u32,
    /// Estimated cost in USD
    #[serde(default)]
    pub cost_estimate: f64,
}

impl Usage {
    /// Usage with totals derived from prompt and completion tokens.
    pub fn new(prompt_tokens: u32, completion_tokens: u32, cached_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            cached_tokens: cached_tokens.min(prompt_tokens),
            cost_estimate: 0.0,
        }
    }

    /// A request is a cache hit when any prompt token was served from cache.
    pub fn is_cache_hit(&self) -> bool {
        self.cached_tokens > 0
    }
}

/// A complete (non-streaming) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
    /// Which model actually responded
    pub model: String,
}

/// One item of a response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// Partial content
    Chunk(String),
    /// Terminal item carrying the usage envelope
    Done(Usage),
}

type StreamSender = mpsc::Sender<std::result::Result<StreamItem, InvocationError>>;

/// A lazy, finite, non-restartable sequence of response chunks.
///
/// The sequence ends cleanly only with [`StreamItem::Done`]. If the producer
/// goes away first, or the deadline passes, the stream yields one
/// partial-failure error and then ends.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::Receiver<std::result::Result<StreamItem, InvocationError>>,
    model: String,
    started: Instant,
    deadline: Option<Pin<Box<Sleep>>>,
    chunks_received: usize,
    finished: bool,
}

impl ChunkStream {
    /// Create a stream and the sender a producer task writes into.
    pub fn channel(model: impl Into<String>, buffer: usize) -> (StreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let stream = Self {
            rx,
            model: model.into(),
            started: Instant::now(),
            deadline: None,
            chunks_received: 0,
            finished: false,
        };
        (tx, stream)
    }

    /// Bound the remaining stream by `timeout` from now.
    pub fn with_deadline(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Box::pin(tokio::time::sleep(timeout)));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn chunks_received(&self) -> usize {
        self.chunks_received
    }

    /// Drain the stream into a single completion.
    pub async fn collect_completion(mut self) -> std::result::Result<Completion, InvocationError> {
        let mut content = String::new();
        while let Some(item) = self.next().await {
            match item? {
                StreamItem::Chunk(text) => content.push_str(&text),
                StreamItem::Done(usage) => {
                    return Ok(Completion {
                        content,
                        usage,
                        model: self.model.clone(),
                    });
                }
            }
        }
        Err(InvocationError::StreamInterrupted {
            chunks_received: self.chunks_received,
            reason: "stream already consumed".into(),
        })
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Stream for ChunkStream {
    type Item = std::result::Result<StreamItem, InvocationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(deadline) = this.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            this.finished = true;
            return Poll::Ready(Some(Err(InvocationError::StreamTimeout {
                chunks_received: this.chunks_received,
                elapsed_ms: this.elapsed_ms(),
            })));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(StreamItem::Chunk(text)))) => {
                this.chunks_received += 1;
                Poll::Ready(Some(Ok(StreamItem::Chunk(text))))
            }
            Poll::Ready(Some(Ok(StreamItem::Done(usage)))) => {
                this.finished = true;
                Poll::Ready(Some(Ok(StreamItem::Done(usage))))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(Some(Err(InvocationError::StreamInterrupted {
                    chunks_received: this.chunks_received,
                    reason: "upstream closed before completion".into(),
                })))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// What an invocation produced.
#[derive(Debug)]
pub enum InvocationResult {
    Complete(Completion),
    Streaming(ChunkStream),
}

impl InvocationResult {
    /// Resolve to a complete response, draining a stream if necessary.
    pub async fn into_completion(self) -> std::result::Result<Completion, InvocationError> {
        match self {
            Self::Complete(completion) => Ok(completion),
            Self::Streaming(stream) => stream.collect_completion().await,
        }
    }
}

/// The core InvocationAdapter trait.
///
/// Every backend (in-process model, remote tool service) implements this
/// trait. The pipeline calls `invoke()` without knowing which variant it
/// holds.
#[async_trait]
pub trait InvocationAdapter: Send + Sync {
    /// A human-readable name for this adapter (e.g., "local", "remote").
    fn name(&self) -> &str;

    /// Which variant this adapter is.
    fn kind(&self) -> AdapterKind;

    /// The model identifier used for pricing.
    fn model(&self) -> &str;

    /// Send a call and get a complete response.
    async fn complete(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> std::result::Result<Completion, InvocationError>;

    /// Send a call and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a
    /// single chunk followed by the usage envelope.
    async fn stream(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> std::result::Result<ChunkStream, InvocationError> {
        let completion = self.complete(call, options).await?;
        let (tx, stream) = ChunkStream::channel(completion.model.clone(), 2);
        let _ = tx.send(Ok(StreamItem::Chunk(completion.content))).await;
        let _ = tx.send(Ok(StreamItem::Done(completion.usage))).await;
        Ok(stream)
    }

    /// Dispatch to `complete()` or `stream()` and enforce `options.timeout`.
    async fn invoke(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> std::result::Result<InvocationResult, InvocationError> {
        let started = Instant::now();
        let timeout_error = || InvocationError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        if options.stream {
            let stream = match options.timeout {
                Some(limit) => {
                    let stream = tokio::time::timeout(limit, self.stream(call, options))
                        .await
                        .map_err(|_| timeout_error())??;
                    stream.with_deadline(limit.saturating_sub(started.elapsed()))
                }
                None => self.stream(call, options).await?,
            };
            Ok(InvocationResult::Streaming(stream))
        } else {
            let completion = match options.timeout {
                Some(limit) => tokio::time::timeout(limit, self.complete(call, options))
                    .await
                    .map_err(|_| timeout_error())??,
                None => self.complete(call, options).await?,
            };
            Ok(InvocationResult::Complete(completion))
        }
    }

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, InvocationError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAdapter {
        delay: Duration,
    }

    #[async_trait]
    impl InvocationAdapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }

        fn kind(&self) -> AdapterKind {
            AdapterKind::Local
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn complete(
            &self,
            call: InvocationCall,
            _options: &InvokeOptions,
        ) -> std::result::Result<Completion, InvocationError> {
            tokio::time::sleep(self.delay).await;
            Ok(Completion {
                content: call.request.message,
                usage: Usage::new(10, 2, 0),
                model: "echo-1".into(),
            })
        }
    }

    fn call(message: &str) -> InvocationCall {
        InvocationCall {
            invocation_id: "inv-1".into(),
            request: ToolInvocationRequest::new(message),
            messages: vec![MessageBlock::user_query(message)],
        }
    }

    #[test]
    fn usage_totals_and_hit() {
        let usage = Usage::new(100, 20, 60);
        assert_eq!(usage.total_tokens, 120);
        assert!(usage.is_cache_hit());
        assert!(!Usage::new(100, 20, 0).is_cache_hit());
        // cached can never exceed prompt
        assert_eq!(Usage::new(10, 0, 50).cached_tokens, 10);
    }

    #[test]
    fn usage_total_saturates() {
        assert_eq!(Usage::new(u32::MAX, 7, 0).total_tokens, u32::MAX);
    }

    #[tokio::test]
    async fn default_stream_wraps_completion() {
        let adapter = EchoAdapter {
            delay: Duration::ZERO,
        };
        let result = adapter
            .invoke(call("hello"), &InvokeOptions::streaming())
            .await
            .unwrap();
        let InvocationResult::Streaming(mut stream) = result else {
            panic!("expected a stream");
        };
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Chunk("hello".into())
        );
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Done(_)
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn complete_times_out() {
        let adapter = EchoAdapter {
            delay: Duration::from_secs(60),
        };
        let options = InvokeOptions::default().with_timeout(Duration::from_secs(1));
        let err = adapter.invoke(call("slow"), &options).await.unwrap_err();
        assert!(matches!(err, InvocationError::Timeout { .. }));
    }

    #[tokio::test]
    async fn closed_stream_is_partial_failure() {
        let (tx, mut stream) = ChunkStream::channel("m", 4);
        tx.send(Ok(StreamItem::Chunk("part".into()))).await.unwrap();
        drop(tx);

        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Chunk(_)
        ));
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            InvocationError::StreamInterrupted {
                chunks_received: 1,
                ..
            }
        ));
        assert!(err.is_partial());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_deadline_terminates_early() {
        let (tx, stream) = ChunkStream::channel("m", 4);
        let mut stream = stream.with_deadline(Duration::from_millis(100));
        tx.send(Ok(StreamItem::Chunk("first".into()))).await.unwrap();

        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamItem::Chunk(_)
        ));
        // producer stays alive but silent
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            InvocationError::StreamTimeout {
                chunks_received: 1,
                ..
            }
        ));
        assert!(stream.next().await.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn collect_completion_joins_chunks() {
        let (tx, stream) = ChunkStream::channel("m", 4);
        tx.send(Ok(StreamItem::Chunk("Your order ".into())))
            .await
            .unwrap();
        tx.send(Ok(StreamItem::Chunk("has shipped.".into())))
            .await
            .unwrap();
        tx.send(Ok(StreamItem::Done(Usage::new(40, 5, 30))))
            .await
            .unwrap();

        let completion = stream.collect_completion().await.unwrap();
        assert_eq!(completion.content, "Your order has shipped.");
        assert_eq!(completion.usage.cached_tokens, 30);
    }
}
