//! Fan-out/fan-in context fetch.
//!
//! The three fetches run concurrently inside one task via `tokio::join!`,
//! each bounded by the same deadline. Dropping the `aggregate` future drops
//! all three fetches, so a caller-level timeout cancels them together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use warmprompt_core::context::{
    ContextBundle, ContextSource, DegradedSource, HistorySource, MetadataSource, Passage,
    PassageRetriever,
};
use warmprompt_core::error::ContextError;
use warmprompt_core::request::ToolInvocationRequest;

use crate::sources::{NoRetrieval, RequestHistory, RequestMetadata};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(800);
const DEFAULT_MAX_PASSAGES: usize = 5;

/// Builds a [`ContextBundle`] from three independent sources.
#[derive(Clone)]
pub struct ContextAggregator {
    history: Arc<dyn HistorySource>,
    metadata: Arc<dyn MetadataSource>,
    retriever: Arc<dyn PassageRetriever>,
    timeout: Duration,
    max_passages: usize,
    min_relevance: f32,
    max_history_turns: usize,
}

impl ContextAggregator {
    pub fn new(
        history: Arc<dyn HistorySource>,
        metadata: Arc<dyn MetadataSource>,
        retriever: Arc<dyn PassageRetriever>,
    ) -> Self {
        Self {
            history,
            metadata,
            retriever,
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_passages: DEFAULT_MAX_PASSAGES,
            min_relevance: 0.0,
            max_history_turns: 0,
        }
    }

    /// History and metadata straight from the request, with the given retriever.
    pub fn from_request(retriever: Arc<dyn PassageRetriever>) -> Self {
        Self::new(Arc::new(RequestHistory), Arc::new(RequestMetadata), retriever)
    }

    /// Shared deadline for all three fetches.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_passage_limits(mut self, max_passages: usize, min_relevance: f32) -> Self {
        self.max_passages = max_passages;
        self.min_relevance = min_relevance;
        self
    }

    /// Keep only the most recent `turns` history turns (0 keeps everything).
    pub fn with_history_limit(mut self, turns: usize) -> Self {
        self.max_history_turns = turns;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch all three sources concurrently under the configured timeout.
    ///
    /// Never fails: any source that errors or misses the deadline
    /// contributes its empty default and is listed in
    /// [`ContextBundle::degraded`].
    pub async fn aggregate(&self, request: &ToolInvocationRequest) -> ContextBundle {
        let deadline = Instant::now() + self.timeout;
        let timeout_ms = self.timeout.as_millis() as u64;

        let (history, metadata, passages) = tokio::join!(
            bounded(
                ContextSource::History,
                self.history.name(),
                deadline,
                timeout_ms,
                self.history.fetch_history(request),
            ),
            bounded(
                ContextSource::Metadata,
                self.metadata.name(),
                deadline,
                timeout_ms,
                self.metadata.fetch_metadata(request),
            ),
            bounded(
                ContextSource::Retrieval,
                self.retriever.name(),
                deadline,
                timeout_ms,
                self.retriever.retrieve(request),
            ),
        );

        let degraded: Vec<DegradedSource> = [history.1, metadata.1, passages.1]
            .into_iter()
            .flatten()
            .collect();

        let bundle = ContextBundle::new(
            self.trim_history(history.0),
            metadata.0,
            self.rank_passages(passages.0),
            degraded,
        );

        debug!(
            history_turns = bundle.history().len(),
            metadata_keys = bundle.metadata().len(),
            passages = bundle.retrieved_passages().len(),
            degraded = bundle.degraded().len(),
            "Context aggregated"
        );

        bundle
    }

    fn trim_history(
        &self,
        mut history: Vec<warmprompt_core::message::HistoryTurn>,
    ) -> Vec<warmprompt_core::message::HistoryTurn> {
        if self.max_history_turns > 0 && history.len() > self.max_history_turns {
            history.drain(..history.len() - self.max_history_turns);
        }
        history
    }

    /// Descending relevance, ties kept in source order.
    fn rank_passages(&self, mut passages: Vec<Passage>) -> Vec<Passage> {
        passages.retain(|p| p.relevance_score >= self.min_relevance);
        passages.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        passages.truncate(self.max_passages);
        passages
    }
}

impl Default for ContextAggregator {
    fn default() -> Self {
        Self::from_request(Arc::new(NoRetrieval))
    }
}

async fn bounded<T, F>(
    source: ContextSource,
    backend: &str,
    deadline: Instant,
    timeout_ms: u64,
    fetch: F,
) -> (T, Option<DegradedSource>)
where
    T: Default,
    F: Future<Output = Result<T, ContextError>>,
{
    let error = match tokio::time::timeout_at(deadline, fetch).await {
        Ok(Ok(value)) => return (value, None),
        Ok(Err(e)) => e,
        Err(_) => ContextError::Timeout { timeout_ms },
    };

    warn!(
        source = %source,
        backend = backend,
        error = %error,
        "Context fetch degraded to empty default"
    );

    (
        T::default(),
        Some(DegradedSource {
            source,
            reason: error.to_string(),
        }),
    )
}
