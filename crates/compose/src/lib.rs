//! Prompt composition for warmprompt.
//!
//! Turns a query and a [`warmprompt_core::ContextBundle`] into exactly three
//! ordered blocks: the byte-stable static template (cache-eligible), one
//! dynamic block with all per-request data, and the raw user query.

pub mod composer;
pub mod template;
pub mod token;

pub use composer::{ComposedPrompt, PromptComposer, validate_block_order};
pub use template::{StaticTemplate, TemplateRegistry, sha256_hex};
