//! Cache-aware prompt composition.
//!
//! # Determinism
//!
//! The cache-eligible block is the template content, copied verbatim. No
//! request data, timestamp or formatting step ever touches it, and every
//! compose re-hashes it against the registry before returning. All
//! per-request data goes into the single dynamic block that follows.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use warmprompt_core::context::ContextBundle;
use warmprompt_core::error::CompositionError;
use warmprompt_core::message::{MessageBlock, Role};

use crate::template::{StaticTemplate, TemplateRegistry};
use crate::token;

/// The ordered blocks for one invocation plus their cache metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedPrompt {
    blocks: Vec<MessageBlock>,
    template_version: String,
    prefix_sha256: String,
    cacheable_tokens: usize,
}

impl ComposedPrompt {
    pub fn blocks(&self) -> &[MessageBlock] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<MessageBlock> {
        self.blocks
    }

    pub fn template_version(&self) -> &str {
        &self.template_version
    }

    /// SHA-256 of the cache-eligible prefix.
    pub fn prefix_sha256(&self) -> &str {
        &self.prefix_sha256
    }

    /// Estimated tokens a warm provider cache can serve for this prompt.
    pub fn cacheable_tokens(&self) -> usize {
        self.cacheable_tokens
    }

    pub fn estimated_tokens(&self) -> usize {
        token::estimate_blocks_tokens(&self.blocks)
    }

    pub fn validate(&self) -> Result<(), CompositionError> {
        validate_block_order(&self.blocks)
    }
}

/// Check the prefix invariant on any block sequence.
///
/// Cache-eligible blocks form one contiguous run starting at index 0, and the
/// sequence ends with a non-eligible user block.
pub fn validate_block_order(blocks: &[MessageBlock]) -> Result<(), CompositionError> {
    let Some(last) = blocks.last() else {
        return Err(CompositionError::OrderingViolated {
            index: 0,
            reason: "no blocks".into(),
        });
    };

    let mut in_prefix = true;
    for (index, block) in blocks.iter().enumerate() {
        match (in_prefix, block.cache_eligible) {
            (true, false) => in_prefix = false,
            (false, true) => {
                return Err(CompositionError::OrderingViolated {
                    index,
                    reason: "cache-eligible block after the cache breakpoint".into(),
                });
            }
            _ => {}
        }
    }

    if last.role != Role::User || last.cache_eligible {
        return Err(CompositionError::OrderingViolated {
            index: blocks.len() - 1,
            reason: "final block must be the non-cacheable user query".into(),
        });
    }

    Ok(())
}

/// Composes the three-block prompt for a fixed template.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    template: StaticTemplate,
    registry: Arc<TemplateRegistry>,
}

impl PromptComposer {
    /// Use a template already registered in `registry`.
    pub fn new(registry: Arc<TemplateRegistry>, template: StaticTemplate) -> Self {
        Self { template, registry }
    }

    /// Register `content` under `version` in a fresh registry.
    pub fn from_template(
        version: impl Into<String>,
        content: impl Into<Arc<str>>,
    ) -> Result<Self, CompositionError> {
        let registry = Arc::new(TemplateRegistry::new());
        let template = registry.register(version, content)?;
        Ok(Self::new(registry, template))
    }

    pub fn template(&self) -> &StaticTemplate {
        &self.template
    }

    pub fn compose(
        &self,
        query: &str,
        bundle: &ContextBundle,
    ) -> Result<ComposedPrompt, CompositionError> {
        self.compose_at(query, bundle, Utc::now())
    }

    /// Compose with an explicit timestamp for the dynamic block.
    pub fn compose_at(
        &self,
        query: &str,
        bundle: &ContextBundle,
        now: DateTime<Utc>,
    ) -> Result<ComposedPrompt, CompositionError> {
        let static_block = MessageBlock::cached_system(self.template.content());
        self.registry
            .verify(self.template.version(), &static_block.content)?;

        let blocks = vec![
            static_block,
            MessageBlock::dynamic_system(render_dynamic(bundle, now)),
            MessageBlock::user_query(query),
        ];
        validate_block_order(&blocks)?;

        Ok(ComposedPrompt {
            blocks,
            template_version: self.template.version().to_string(),
            prefix_sha256: self.template.sha256().to_string(),
            cacheable_tokens: self.template.token_count(),
        })
    }
}

fn render_dynamic(bundle: &ContextBundle, now: DateTime<Utc>) -> String {
    let mut sections = vec![format!(
        "[Request Context]\nCurrent time: {}",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    )];

    if !bundle.metadata().is_empty() {
        let metadata = serde_json::to_string_pretty(bundle.metadata()).unwrap_or_default();
        sections.push(format!("[Customer & Order Data]\n{metadata}"));
    }

    if !bundle.retrieved_passages().is_empty() {
        let lines: Vec<String> = bundle
            .retrieved_passages()
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. ({:.2}) {}", i + 1, p.relevance_score, p.text))
            .collect();
        sections.push(format!("[Relevant Policies]\n{}", lines.join("\n")));
    }

    if !bundle.history().is_empty() {
        let lines: Vec<String> = bundle
            .history()
            .iter()
            .map(|turn| format!("{}: {}", turn.role, turn.content))
            .collect();
        sections.push(format!("[Conversation History]\n{}", lines.join("\n")));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use warmprompt_core::context::Passage;
    use warmprompt_core::message::HistoryTurn;

    const TEMPLATE: &str = "You are a support assistant.\nAnswer from the context only.\n";

    fn composer() -> PromptComposer {
        PromptComposer::from_template("support-v1", TEMPLATE).unwrap()
    }

    fn order_bundle() -> ContextBundle {
        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "order_context".into(),
            serde_json::json!({"orders": [{"id": 123, "status": "shipped"}]}),
        );
        ContextBundle::new(
            vec![HistoryTurn::user("Hi"), HistoryTurn::assistant("Hello!")],
            metadata,
            vec![Passage::new("Shipped orders arrive in 3-5 days.", 0.75)],
            vec![],
        )
    }

    #[test]
    fn emits_three_blocks_in_order() {
        let prompt = composer().compose("Where is my order?", &order_bundle()).unwrap();
        let blocks = prompt.blocks();

        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].cache_eligible);
        assert_eq!(blocks[0].role, Role::System);
        assert!(!blocks[1].cache_eligible);
        assert_eq!(blocks[1].role, Role::System);
        assert!(!blocks[2].cache_eligible);
        assert_eq!(blocks[2].role, Role::User);
        assert_eq!(blocks[2].content, "Where is my order?");
        assert!(prompt.validate().is_ok());
    }

    #[test]
    fn static_block_is_byte_identical_across_requests() {
        let composer = composer();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 6, 30, 23, 59, 59).unwrap();

        let a = composer.compose_at("Where is my order?", &order_bundle(), t1).unwrap();
        let b = composer
            .compose_at("Can I get a refund?", &ContextBundle::default(), t2)
            .unwrap();

        assert_eq!(a.blocks()[0].content.as_bytes(), TEMPLATE.as_bytes());
        assert_eq!(a.blocks()[0], b.blocks()[0]);
        assert_eq!(a.prefix_sha256(), b.prefix_sha256());
        assert_ne!(a.blocks()[1], b.blocks()[1]);
    }

    #[test]
    fn dynamic_block_carries_request_data() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let prompt = composer()
            .compose_at("Where is my order?", &order_bundle(), now)
            .unwrap();
        let dynamic = &prompt.blocks()[1].content;

        assert!(dynamic.contains("Current time: 2026-03-14T12:00:00Z"));
        assert!(dynamic.contains("\"status\": \"shipped\""));
        assert!(dynamic.contains("1. (0.75) Shipped orders arrive in 3-5 days."));
        assert!(dynamic.contains("user: Hi\nassistant: Hello!"));
        assert!(!prompt.blocks()[0].content.contains("shipped"));
    }

    #[test]
    fn empty_bundle_still_yields_three_blocks() {
        let prompt = composer().compose("hello", &ContextBundle::default()).unwrap();
        assert_eq!(prompt.blocks().len(), 3);
        assert!(prompt.blocks()[1].content.starts_with("[Request Context]"));
        assert!(!prompt.blocks()[1].content.contains("[Relevant Policies]"));
    }

    #[test]
    fn cacheable_tokens_match_static_block() {
        let prompt = composer().compose("hello", &ContextBundle::default()).unwrap();
        assert_eq!(
            prompt.cacheable_tokens(),
            token::estimate_block_tokens(&prompt.blocks()[0])
        );
        assert!(prompt.estimated_tokens() > prompt.cacheable_tokens());
    }

    #[test]
    fn template_drift_surfaces_as_composition_error() {
        let registry = Arc::new(TemplateRegistry::new());
        registry.register("support-v1", "Original rules.").unwrap();

        // Same version label, different bytes, smuggled past the registry.
        let drifted = StaticTemplate::new("support-v1", "Original rules!").unwrap();
        let composer = PromptComposer::new(registry, drifted);

        let err = composer.compose("hi", &ContextBundle::default()).unwrap_err();
        assert!(matches!(err, CompositionError::PrefixHashMismatch { .. }));
    }

    #[test]
    fn ordering_validation() {
        let ok = vec![
            MessageBlock::cached_system("a"),
            MessageBlock::cached_system("b"),
            MessageBlock::dynamic_system("c"),
            MessageBlock::user_query("d"),
        ];
        assert!(validate_block_order(&ok).is_ok());

        let split_prefix = vec![
            MessageBlock::cached_system("a"),
            MessageBlock::dynamic_system("b"),
            MessageBlock::cached_system("c"),
            MessageBlock::user_query("d"),
        ];
        let err = validate_block_order(&split_prefix).unwrap_err();
        assert!(matches!(err, CompositionError::OrderingViolated { index: 2, .. }));

        let no_query = vec![MessageBlock::cached_system("a")];
        assert!(validate_block_order(&no_query).is_err());
        assert!(validate_block_order(&[]).is_err());
    }
}
