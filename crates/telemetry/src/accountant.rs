//! Process-wide cache effectiveness and cost accounting.
//!
//! [`CacheAccountant`] is the only mutable state shared across invocations.
//! Every counter for one invocation is updated under a single write lock,
//! so a snapshot never observes a half-recorded usage.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warmprompt_core::adapter::Usage;

use crate::pricing::PricingTable;

#[derive(Debug, Clone)]
struct CacheStats {
    requests_total: u64,
    cache_hits: u64,
    tokens_cached: u64,
    tokens_total: u64,
    estimated_cost: f64,
    estimated_cost_saved: f64,
    since: DateTime<Utc>,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            requests_total: 0,
            cache_hits: 0,
            tokens_cached: 0,
            tokens_total: 0,
            estimated_cost: 0.0,
            estimated_cost_saved: 0.0,
            since: Utc::now(),
        }
    }
}

/// Point-in-time copy of the cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub requests_total: u64,
    pub cache_hits: u64,
    /// `cache_hits / requests_total`, 0.0 before the first request.
    pub hit_rate: f64,
    pub tokens_cached: u64,
    pub tokens_total: u64,
    /// USD actually spent, cached rates applied.
    pub estimated_cost: f64,
    /// USD saved versus billing every prompt token at the full rate.
    pub estimated_cost_saved: f64,
    /// When counting started (process start or last reset).
    pub since: DateTime<Utc>,
}

/// Records completed invocations and serves cache statistics.
pub struct CacheAccountant {
    pricing: PricingTable,
    stats: RwLock<CacheStats>,
}

impl CacheAccountant {
    pub fn new() -> Self {
        Self::with_pricing(PricingTable::with_defaults())
    }

    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            pricing,
            stats: RwLock::new(CacheStats::new()),
        }
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    /// Fill `cost_estimate` from the pricing table. Unknown models cost 0.
    pub fn price(&self, model: &str, mut usage: Usage) -> Usage {
        usage.cost_estimate = self
            .pricing
            .get(model)
            .map(|p| p.cost(usage.prompt_tokens, usage.cached_tokens, usage.completion_tokens))
            .unwrap_or(0.0);
        usage
    }

    /// Record one completed invocation and return its priced usage.
    ///
    /// Purely additive: never fails and never rejects input.
    pub fn record(&self, model: &str, usage: Usage) -> Usage {
        let pricing = self.pricing.get(model);
        let priced = self.price(model, usage);
        let saved = pricing
            .map(|p| {
                p.uncached_cost(usage.prompt_tokens, usage.completion_tokens)
                    - priced.cost_estimate
            })
            .unwrap_or(0.0)
            .max(0.0);

        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        stats.requests_total += 1;
        if priced.is_cache_hit() {
            stats.cache_hits += 1;
        }
        stats.tokens_cached += u64::from(priced.cached_tokens);
        stats.tokens_total += u64::from(priced.total_tokens);
        stats.estimated_cost += priced.cost_estimate;
        stats.estimated_cost_saved += saved;

        debug!(
            model = model,
            cached_tokens = priced.cached_tokens,
            total_tokens = priced.total_tokens,
            cost = priced.cost_estimate,
            requests_total = stats.requests_total,
            "Usage recorded"
        );

        priced
    }

    /// A consistent copy of every counter.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        let hit_rate = if stats.requests_total == 0 {
            0.0
        } else {
            stats.cache_hits as f64 / stats.requests_total as f64
        };
        CacheStatsSnapshot {
            requests_total: stats.requests_total,
            cache_hits: stats.cache_hits,
            hit_rate,
            tokens_cached: stats.tokens_cached,
            tokens_total: stats.tokens_total,
            estimated_cost: stats.estimated_cost,
            estimated_cost_saved: stats.estimated_cost_saved,
            since: stats.since,
        }
    }

    /// Administrative reset. Returns the final snapshot before clearing.
    pub fn reset(&self) -> CacheStatsSnapshot {
        let before = self.snapshot();
        *self.stats.write().unwrap_or_else(|e| e.into_inner()) = CacheStats::new();
        tracing::info!(requests_total = before.requests_total, "Cache statistics reset");
        before
    }
}

impl Default for CacheAccountant {
    fn default() -> Self {
        Self::new()
    }
}
