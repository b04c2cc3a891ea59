//! # warmprompt Core
//!
//! Domain types, traits, and error definitions for the warmprompt
//! cache-aware prompt composition layer. This crate has **no transport
//! dependencies**: it defines the domain model that the other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator seam is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Choosing the local or remote invocation variant at construction time
//! - Testing with mock context sources and adapters
//! - A clean dependency graph (all crates depend inward on core)
//!
//! Nothing in this crate holds per-caller state. Every value that flows
//! through an invocation is owned by that invocation.

pub mod adapter;
pub mod context;
pub mod error;
pub mod message;
pub mod request;

// Re-export key types at crate root for ergonomics
pub use adapter::{
    AdapterKind, ChunkStream, Completion, InvocationAdapter, InvocationCall, InvocationResult,
    InvokeOptions, StreamItem, Usage,
};
pub use context::{
    ContextBundle, ContextSource, DegradedSource, HistorySource, MetadataSource, Passage,
    PassageRetriever,
};
pub use error::{CompositionError, ContextError, Error, ErrorKind, InvocationError, Result};
pub use message::{HistoryTurn, MessageBlock, Role};
pub use request::ToolInvocationRequest;
