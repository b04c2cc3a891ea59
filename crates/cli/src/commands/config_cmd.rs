//! `warmprompt config`: Configuration helpers.

use clap::Subcommand;
use warmprompt_config::AppConfig;

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Print the default configuration as TOML
    Default,
    /// Print the config file path
    Path,
    /// Load and validate the current configuration
    Validate,
}

pub fn run(action: Option<ConfigAction>) -> anyhow::Result<()> {
    match action.unwrap_or(ConfigAction::Default) {
        ConfigAction::Default => print!("{}", AppConfig::default_toml()),
        ConfigAction::Path => println!("{}", config_path().display()),
        ConfigAction::Validate => {
            let config = AppConfig::load()?;
            println!("Config OK ({})", config_path().display());
            println!("   Adapter:  {} ({})", config.adapter.kind, config.adapter.model);
            if let Some(endpoint) = &config.adapter.endpoint {
                println!("   Endpoint: {endpoint}");
            }
            println!(
                "   Context:  {}ms fetch budget, {} passages",
                config.context.fetch_timeout_ms, config.context.max_passages
            );
            println!("   Gateway:  {}:{}", config.gateway.host, config.gateway.port);
        }
    }
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}
