//! Chunk stream that records usage only on clean completion.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tracing::{info, warn};
use warmprompt_core::adapter::{ChunkStream, StreamItem};
use warmprompt_core::context::DegradedSource;
use warmprompt_core::error::InvocationError;
use warmprompt_telemetry::CacheAccountant;

/// Wraps an adapter's [`ChunkStream`] for one invocation.
///
/// Chunks pass through unchanged. The terminal [`StreamItem::Done`] is
/// recorded in the accountant and re-emitted with `cost_estimate` filled.
/// Dropping the stream early, or a stream that ends in an error, records
/// nothing.
pub struct RecordingStream {
    inner: ChunkStream,
    accountant: Arc<CacheAccountant>,
    model: String,
    invocation_id: String,
    degraded: Vec<DegradedSource>,
    recorded: bool,
}

impl RecordingStream {
    pub(crate) fn new(
        inner: ChunkStream,
        accountant: Arc<CacheAccountant>,
        model: String,
        invocation_id: String,
        degraded: Vec<DegradedSource>,
    ) -> Self {
        Self {
            inner,
            accountant,
            model,
            invocation_id,
            degraded,
            recorded: false,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Context sources that fell back to their empty default.
    pub fn degraded(&self) -> &[DegradedSource] {
        &self.degraded
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded
    }
}

impl Stream for RecordingStream {
    type Item = Result<StreamItem, InvocationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(StreamItem::Done(usage)))) => {
                let priced = this.accountant.record(&this.model, usage);
                this.recorded = true;
                info!(
                    invocation_id = %this.invocation_id,
                    chunks = this.inner.chunks_received(),
                    cached_tokens = priced.cached_tokens,
                    total_tokens = priced.total_tokens,
                    "Streamed invocation complete"
                );
                Poll::Ready(Some(Ok(StreamItem::Done(priced))))
            }
            Poll::Ready(Some(Err(e))) => {
                warn!(
                    invocation_id = %this.invocation_id,
                    partial = e.is_partial(),
                    error = %e,
                    "Streamed invocation failed, usage not recorded"
                );
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }
}
