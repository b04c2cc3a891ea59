//! `warmprompt serve`: Start the HTTP gateway.

use anyhow::Context;
use warmprompt_config::AppConfig;

pub async fn run(port: Option<u16>, host: Option<String>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;

    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }

    println!("warmprompt gateway");
    println!("   Listening:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Adapter:     {} ({})", config.adapter.kind, config.adapter.model);
    println!("   Template:    {}", config.prompt.template_version);
    println!("   Stats reset: {}", config.gateway.allow_stats_reset);

    warmprompt_gateway::start(config).await?;
    Ok(())
}
