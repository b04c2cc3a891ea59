//! In-process invocation variant.
//!
//! [`LocalAdapter`] calls a [`LocalModel`] directly and chunks its output
//! when streaming is requested. [`PrefixCachingModel`] is a deterministic
//! responder that keeps a provider-style prefix cache, so cold and warm
//! calls report usage the way a hosted backend would.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;
use warmprompt_compose::token;
use warmprompt_compose::sha256_hex;
use warmprompt_core::adapter::{
    AdapterKind, ChunkStream, Completion, InvocationAdapter, InvocationCall, InvokeOptions,
    StreamItem, Usage,
};
use warmprompt_core::error::InvocationError;
use warmprompt_core::message::{MessageBlock, Role};

/// Text plus usage produced by a local model.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

/// A model or tool that runs inside this process.
#[async_trait]
pub trait LocalModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate(
        &self,
        messages: &[MessageBlock],
        max_tokens: Option<u32>,
    ) -> Result<Generation, InvocationError>;
}

/// Adapter for the in-process variant.
pub struct LocalAdapter {
    model: Arc<dyn LocalModel>,
    chunk_words: usize,
}

impl LocalAdapter {
    pub fn new(model: Arc<dyn LocalModel>) -> Self {
        Self {
            model,
            chunk_words: 4,
        }
    }

    /// Words per streamed chunk.
    pub fn with_chunk_words(mut self, words: usize) -> Self {
        self.chunk_words = words.max(1);
        self
    }
}

#[async_trait]
impl InvocationAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Local
    }

    fn model(&self) -> &str {
        self.model.model_id()
    }

    async fn complete(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> Result<Completion, InvocationError> {
        let generation = self.model.generate(&call.messages, options.max_tokens).await?;
        debug!(
            invocation_id = %call.invocation_id,
            model = self.model.model_id(),
            prompt_tokens = generation.usage.prompt_tokens,
            cached_tokens = generation.usage.cached_tokens,
            "Local generation complete"
        );
        Ok(Completion {
            content: generation.text,
            usage: generation.usage,
            model: self.model.model_id().to_string(),
        })
    }

    async fn stream(
        &self,
        call: InvocationCall,
        options: &InvokeOptions,
    ) -> Result<ChunkStream, InvocationError> {
        let generation = self.model.generate(&call.messages, options.max_tokens).await?;
        let chunks = split_chunks(&generation.text, self.chunk_words);
        let (tx, stream) = ChunkStream::channel(self.model.model_id(), chunks.len() + 1);

        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(StreamItem::Chunk(chunk))).await.is_err() {
                    return; // receiver dropped
                }
            }
            let _ = tx.send(Ok(StreamItem::Done(generation.usage))).await;
        });

        Ok(stream)
    }
}

fn split_chunks(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_inclusive(' ').collect();
    words
        .chunks(words_per_chunk.max(1))
        .map(|group| group.concat())
        .collect()
}

/// Deterministic local responder with a prefix cache.
///
/// The cache key is the SHA-256 of the whole cache-eligible prefix (role
/// and content of every eligible block). A key seen within `ttl` is warm:
/// the call reports the prefix's tokens as `cached_tokens`. Any byte change
/// to the prefix is a different key and therefore a cold call.
pub struct PrefixCachingModel {
    model_id: String,
    ttl: Duration,
    latency: Duration,
    warm: Mutex<HashMap<String, Instant>>,
}

impl PrefixCachingModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ttl: Duration::from_secs(300),
            latency: Duration::ZERO,
            warm: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Simulated processing time per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of prefixes currently warm.
    pub fn warm_prefixes(&self) -> usize {
        let now = Instant::now();
        let warm = self.warm.lock().unwrap_or_else(|e| e.into_inner());
        warm.values()
            .filter(|seen| now.duration_since(**seen) < self.ttl)
            .count()
    }

    /// Returns cached tokens for this prefix and marks it warm.
    fn touch(&self, key: String, prefix_tokens: u32) -> u32 {
        let now = Instant::now();
        let mut warm = self.warm.lock().unwrap_or_else(|e| e.into_inner());
        warm.retain(|_, seen| now.duration_since(*seen) < self.ttl);
        let hit = warm.insert(key, now).is_some();
        if hit { prefix_tokens } else { 0 }
    }
}

#[async_trait]
impl LocalModel for PrefixCachingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        messages: &[MessageBlock],
        max_tokens: Option<u32>,
    ) -> Result<Generation, InvocationError> {
        let query = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| InvocationError::Upstream("no user query in messages".into()))?;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let prefix: Vec<&MessageBlock> = messages.iter().take_while(|m| m.cache_eligible).collect();
        let prefix_tokens: usize = prefix.iter().map(|m| token::estimate_block_tokens(m)).sum();
        let key_material: String = prefix
            .iter()
            .map(|m| format!("{}\u{0}{}\u{0}", m.role, m.content))
            .collect();

        let cached = if prefix.is_empty() {
            0
        } else {
            self.touch(sha256_hex(key_material.as_bytes()), prefix_tokens as u32)
        };

        let context_lines = messages
            .iter()
            .filter(|m| m.role == Role::System && !m.cache_eligible)
            .map(|m| m.content.lines().filter(|l| !l.trim().is_empty()).count())
            .sum::<usize>();

        let mut text = format!(
            "Thanks for your question: \"{query}\". I reviewed {context_lines} line(s) of request context to answer it."
        );
        if let Some(limit) = max_tokens {
            let max_chars = limit as usize * 4;
            if text.len() > max_chars {
                let mut cut = max_chars;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                text.truncate(cut);
            }
        }

        let prompt_tokens = token::estimate_blocks_tokens(messages) as u32;
        let completion_tokens = token::estimate_tokens(&text) as u32;

        Ok(Generation {
            text,
            usage: Usage::new(prompt_tokens, completion_tokens, cached),
        })
    }
}
