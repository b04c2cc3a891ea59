//! Context sources and the per-invocation context bundle.
//!
//! Three independent sources feed a request: conversation history,
//! user/order metadata, and retrieved policy passages. Each is a trait so
//! the real backends (order service, vector index) stay outside this layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::message::HistoryTurn;
use crate::request::ToolInvocationRequest;

/// Which of the three context sources a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    History,
    Metadata,
    Retrieval,
}

impl std::fmt::Display for ContextSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::History => write!(f, "history"),
            Self::Metadata => write!(f, "metadata"),
            Self::Retrieval => write!(f, "retrieval"),
        }
    }
}

/// A retrieved passage with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Relevance in [0.0, 1.0], higher is more relevant.
    pub relevance_score: f32,
}

impl Passage {
    pub fn new(text: impl Into<String>, relevance_score: f32) -> Self {
        Self {
            text: text.into(),
            relevance_score,
        }
    }
}

/// A source that failed or timed out and was replaced by its empty default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedSource {
    pub source: ContextSource,
    pub reason: String,
}

/// Immutable aggregate of everything fetched for one invocation.
///
/// Fields are private: a bundle is built once by the aggregator and only
/// read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    history: Vec<HistoryTurn>,
    metadata: serde_json::Map<String, serde_json::Value>,
    retrieved_passages: Vec<Passage>,
    degraded: Vec<DegradedSource>,
}

impl ContextBundle {
    pub fn new(
        history: Vec<HistoryTurn>,
        metadata: serde_json::Map<String, serde_json::Value>,
        retrieved_passages: Vec<Passage>,
        degraded: Vec<DegradedSource>,
    ) -> Self {
        Self {
            history,
            metadata,
            retrieved_passages,
            degraded,
        }
    }

    /// Prior turns, oldest first.
    pub fn history(&self) -> &[HistoryTurn] {
        &self.history
    }

    /// User and order metadata.
    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    /// Passages ordered by descending relevance.
    pub fn retrieved_passages(&self) -> &[Passage] {
        &self.retrieved_passages
    }

    /// Sources that contributed their degraded default.
    pub fn degraded(&self) -> &[DegradedSource] {
        &self.degraded
    }

    pub fn is_degraded(&self, source: ContextSource) -> bool {
        self.degraded.iter().any(|d| d.source == source)
    }
}

/// Conversation history lookup.
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_history(
        &self,
        request: &ToolInvocationRequest,
    ) -> std::result::Result<Vec<HistoryTurn>, ContextError>;
}

/// User/order metadata lookup.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_metadata(
        &self,
        request: &ToolInvocationRequest,
    ) -> std::result::Result<serde_json::Map<String, serde_json::Value>, ContextError>;
}

/// Semantic retrieval of relevant passages for the query text.
#[async_trait]
pub trait PassageRetriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(
        &self,
        request: &ToolInvocationRequest,
    ) -> std::result::Result<Vec<Passage>, ContextError>;
}
