//! Adapter factory: selects the invocation variant from configuration.
//!
//! The variant is fixed when the pipeline is built; nothing switches it
//! per call.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use warmprompt_config::AppConfig;
use warmprompt_core::adapter::InvocationAdapter;
use warmprompt_core::error::Error;

use crate::local::{LocalAdapter, PrefixCachingModel};
use crate::remote::RemoteAdapter;
use crate::retry::RetryPolicy;

/// Build the adapter named by `config.adapter.kind`.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn InvocationAdapter>, Error> {
    let adapter = &config.adapter;

    match adapter.kind.as_str() {
        "local" => {
            let model = PrefixCachingModel::new(&adapter.model)
                .with_ttl(Duration::from_secs(adapter.local_cache_ttl_secs));
            info!(model = %adapter.model, "Using local invocation adapter");
            Ok(Arc::new(LocalAdapter::new(Arc::new(model))))
        }
        "remote" => {
            let endpoint = adapter
                .endpoint
                .as_deref()
                .filter(|e| !e.is_empty())
                .ok_or_else(|| Error::Config {
                    message: "adapter.endpoint is required for the remote adapter".into(),
                })?;

            let retry = RetryPolicy::new(
                adapter.max_attempts,
                Duration::from_millis(adapter.base_delay_ms),
                Duration::from_millis(adapter.max_delay_ms),
            );

            let mut remote = RemoteAdapter::new(
                endpoint,
                &adapter.model,
                Duration::from_secs(adapter.request_timeout_secs),
            )?
            .with_retry(retry);
            if let Some(key) = &adapter.api_key {
                remote = remote.with_api_key(key);
            }

            info!(endpoint = %endpoint, model = %adapter.model, "Using remote invocation adapter");
            Ok(Arc::new(remote))
        }
        other => Err(Error::Config {
            message: format!("unknown adapter kind '{other}'"),
        }),
    }
}
