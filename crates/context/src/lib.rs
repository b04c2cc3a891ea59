//! Context aggregation for warmprompt.
//!
//! The [`ContextAggregator`] fans out to the history, metadata and retrieval
//! sources under one shared deadline and folds every failure into that
//! source's empty default. The `sources` module holds reference
//! implementations backed by the request itself or an in-memory index.

pub mod aggregator;
pub mod sources;

pub use aggregator::ContextAggregator;
pub use sources::{KeywordPassageIndex, NoRetrieval, RequestHistory, RequestMetadata};
