//! Reference context sources.
//!
//! History and metadata come from the request payload itself; the layer keeps
//! no session state of its own. Retrieval is either disabled or served from a
//! small in-memory keyword index. Real vector backends implement
//! [`PassageRetriever`] outside this crate.

use async_trait::async_trait;
use tokio::sync::RwLock;
use warmprompt_core::context::{HistorySource, MetadataSource, Passage, PassageRetriever};
use warmprompt_core::error::ContextError;
use warmprompt_core::message::HistoryTurn;
use warmprompt_core::request::ToolInvocationRequest;

/// Conversation history as supplied by the caller.
pub struct RequestHistory;

#[async_trait]
impl HistorySource for RequestHistory {
    fn name(&self) -> &str {
        "request_history"
    }

    async fn fetch_history(
        &self,
        request: &ToolInvocationRequest,
    ) -> Result<Vec<HistoryTurn>, ContextError> {
        Ok(request.conversation_history.clone())
    }
}

/// `user_metadata` entries, plus `order_context` nested under its own key.
pub struct RequestMetadata;

#[async_trait]
impl MetadataSource for RequestMetadata {
    fn name(&self) -> &str {
        "request_metadata"
    }

    async fn fetch_metadata(
        &self,
        request: &ToolInvocationRequest,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ContextError> {
        let mut metadata = request.user_metadata.clone();
        if !request.order_context.is_empty() {
            metadata.insert(
                "order_context".into(),
                serde_json::Value::Object(request.order_context.clone()),
            );
        }
        Ok(metadata)
    }
}

/// Retrieval disabled.
pub struct NoRetrieval;

#[async_trait]
impl PassageRetriever for NoRetrieval {
    fn name(&self) -> &str {
        "none"
    }

    async fn retrieve(
        &self,
        _request: &ToolInvocationRequest,
    ) -> Result<Vec<Passage>, ContextError> {
        Ok(Vec::new())
    }
}

/// In-memory keyword index over policy passages.
///
/// A passage's score is the fraction of distinct query terms (three or more
/// characters) it contains, so scores stay in [0.0, 1.0].
pub struct KeywordPassageIndex {
    passages: RwLock<Vec<String>>,
    top_k: usize,
    min_score: f32,
}

impl KeywordPassageIndex {
    pub fn new() -> Self {
        Self {
            passages: RwLock::new(Vec::new()),
            top_k: 5,
            min_score: 0.0,
        }
    }

    pub fn from_passages<I, S>(passages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passages: RwLock::new(passages.into_iter().map(Into::into).collect()),
            ..Self::new()
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub async fn insert(&self, passage: impl Into<String>) {
        self.passages.write().await.push(passage.into());
    }

    pub async fn len(&self) -> usize {
        self.passages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.passages.read().await.is_empty()
    }

    /// Score and rank passages for `query`.
    pub async fn search(&self, query: &str) -> Vec<Passage> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let passages = self.passages.read().await;
        let mut results: Vec<Passage> = passages
            .iter()
            .filter_map(|text| {
                let lower = text.to_lowercase();
                let matched = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                let score = matched as f32 / terms.len() as f32;
                (matched > 0 && score >= self.min_score).then(|| Passage::new(text.clone(), score))
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(self.top_k);
        results
    }
}

impl Default for KeywordPassageIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PassageRetriever for KeywordPassageIndex {
    fn name(&self) -> &str {
        "keyword_index"
    }

    async fn retrieve(
        &self,
        request: &ToolInvocationRequest,
    ) -> Result<Vec<Passage>, ContextError> {
        Ok(self.search(&request.message).await)
    }
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
    {
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metadata_nests_order_context() {
        let mut user = serde_json::Map::new();
        user.insert("user_id".into(), serde_json::json!("u-42"));
        let mut order = serde_json::Map::new();
        order.insert("orders".into(), serde_json::json!([{"id": 123}]));

        let request = ToolInvocationRequest::new("hi")
            .with_user_metadata(user)
            .with_order_context(order);

        let metadata = RequestMetadata.fetch_metadata(&request).await.unwrap();
        assert_eq!(metadata["user_id"], "u-42");
        assert_eq!(metadata["order_context"]["orders"][0]["id"], 123);
    }

    #[tokio::test]
    async fn empty_order_context_is_omitted() {
        let metadata = RequestMetadata
            .fetch_metadata(&ToolInvocationRequest::new("hi"))
            .await
            .unwrap();
        assert!(metadata.is_empty());
    }

    #[tokio::test]
    async fn keyword_search_scores_and_ranks() {
        let index = KeywordPassageIndex::from_passages([
            "Refunds take five days.",
            "Track shipped orders from the order page.",
            "Orders ship in two days.",
        ]);

        let results = index.search("track my order").await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].text, "Track shipped orders from the order page.");
        assert!((results[0].relevance_score - 1.0).abs() < f32::EPSILON);
        assert!((results[1].relevance_score - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let index = KeywordPassageIndex::new();
        index.insert("Second policy about returns.").await;
        index.insert("First policy about returns.").await;

        let results = index.search("returns").await;
        assert_eq!(results[0].text, "Second policy about returns.");
        assert_eq!(results[1].text, "First policy about returns.");
    }

    #[tokio::test]
    async fn top_k_and_min_score_apply() {
        let index = KeywordPassageIndex::from_passages([
            "refund window",
            "refund policy for damaged items",
            "shipping",
        ])
        .with_top_k(1)
        .with_min_score(0.6);

        let results = index.search("refund policy").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "refund policy for damaged items");
    }

    #[tokio::test]
    async fn short_words_are_ignored() {
        let index = KeywordPassageIndex::from_passages(["is it on"]);
        assert!(index.search("is it").await.is_empty());
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn no_retrieval_is_empty() {
        let passages = NoRetrieval
            .retrieve(&ToolInvocationRequest::new("anything"))
            .await
            .unwrap();
        assert!(passages.is_empty());
    }
}
