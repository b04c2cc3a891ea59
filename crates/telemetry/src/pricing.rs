//! Built-in pricing table with cached-input rates.
//!
//! Prices are in USD per 1 million tokens. Each model has an uncached input
//! price, a cached input price (prefix-cache reads) and an output price.
//! Custom pricing can be added at runtime from TOML config.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M uncached input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M input tokens served from the prefix cache in USD.
    pub cached_input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, cached_input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            cached_input_per_m,
            output_per_m,
        }
    }

    /// Cost with `cached` of the `prompt` tokens billed at the cached rate.
    pub fn cost(&self, prompt: u32, cached: u32, completion: u32) -> f64 {
        let cached = cached.min(prompt);
        let uncached = prompt - cached;
        (uncached as f64 * self.input_per_m
            + cached as f64 * self.cached_input_per_m
            + completion as f64 * self.output_per_m)
            / 1_000_000.0
    }

    /// Cost if no prompt token had been served from cache.
    pub fn uncached_cost(&self, prompt: u32, completion: u32) -> f64 {
        self.cost(prompt, 0, completion)
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // Anthropic: cache reads at 10% of input
        prices.insert(
            "anthropic/claude-sonnet-4".into(),
            ModelPricing::new(3.0, 0.3, 15.0),
        );
        prices.insert(
            "anthropic/claude-opus-4".into(),
            ModelPricing::new(15.0, 1.5, 75.0),
        );
        prices.insert(
            "anthropic/claude-3.5-haiku".into(),
            ModelPricing::new(0.8, 0.08, 4.0),
        );

        // OpenAI: cached input at 50%
        prices.insert("openai/gpt-4o".into(), ModelPricing::new(2.5, 1.25, 10.0));
        prices.insert(
            "openai/gpt-4o-mini".into(),
            ModelPricing::new(0.15, 0.075, 0.6),
        );
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 0.55, 4.4));

        // Google: cached input at 25%
        prices.insert(
            "google/gemini-2.0-flash".into(),
            ModelPricing::new(0.1, 0.025, 0.4),
        );
        prices.insert(
            "google/gemini-1.5-pro".into(),
            ModelPricing::new(1.25, 0.3125, 5.0),
        );

        // DeepSeek
        prices.insert(
            "deepseek/deepseek-v3".into(),
            ModelPricing::new(0.27, 0.07, 1.1),
        );

        Self {
            prices: RwLock::new(prices),
        }
    }

    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up pricing for a model, with provider-prefix and version-suffix matching.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        // Longest key whose bare name prefixes the bare model, so
        // "gpt-4o-mini-2024-07-18" matches "openai/gpt-4o-mini".
        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), *pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, pricing)| pricing)
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(model.into(), pricing);
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_tokens_billed_at_cached_rate() {
        let p = ModelPricing::new(3.0, 0.3, 15.0);
        // 1000 prompt (800 cached), 100 output
        // (200*3 + 800*0.3 + 100*15) / 1M = (600 + 240 + 1500) / 1M
        assert!((p.cost(1000, 800, 100) - 0.00234).abs() < 1e-12);
        assert!((p.uncached_cost(1000, 100) - 0.0045).abs() < 1e-12);
    }

    #[test]
    fn cached_never_exceeds_prompt() {
        let p = ModelPricing::new(1.0, 0.0, 0.0);
        assert_eq!(p.cost(10, 50, 0), 0.0);
    }

    #[test]
    fn exact_and_fuzzy_lookup() {
        let table = PricingTable::with_defaults();
        assert!(table.get("anthropic/claude-sonnet-4").is_some());
        let dated = table.get("gpt-4o-mini-2024-07-18").unwrap();
        assert!((dated.input_per_m - 0.15).abs() < 1e-12);
        assert!(table.get("unknown/model-xyz").is_none());
    }

    #[test]
    fn custom_pricing_overrides() {
        let table = PricingTable::empty();
        assert!(table.is_empty());
        table.set("acme/support-small", ModelPricing::new(1.0, 0.1, 2.0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.models(), vec!["acme/support-small".to_string()]);
        assert_eq!(
            table.get("acme/support-small"),
            Some(ModelPricing::new(1.0, 0.1, 2.0))
        );
    }
}
