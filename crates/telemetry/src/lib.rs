//! Cache effectiveness and cost accounting for warmprompt.
//!
//! The [`CacheAccountant`] observes each completed invocation's usage
//! envelope and keeps process-wide running totals. Costs come from one
//! [`PricingTable`], so local and remote invocations are priced identically.

pub mod accountant;
pub mod pricing;

pub use accountant::{CacheAccountant, CacheStatsSnapshot};
pub use pricing::{ModelPricing, PricingTable};
