//! warmprompt CLI, the main entry point.
//!
//! Commands:
//! - `serve`         : Start the HTTP gateway
//! - `ask`           : Run a single invocation through the pipeline
//! - `template-hash` : Print the static template's SHA-256 for pinning
//! - `config`        : Print default config, config path, or validate

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "warmprompt",
    about = "warmprompt: cache-aware prompt composition and tool invocation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind host
        #[arg(long)]
        host: Option<String>,
    },

    /// Send one message through the pipeline
    Ask {
        /// The user's query
        #[arg(short, long)]
        message: String,

        /// Print chunks as they arrive
        #[arg(short, long)]
        stream: bool,

        /// Order context as a JSON object
        #[arg(long)]
        order: Option<String>,
    },

    /// Print the SHA-256 of the configured static template
    TemplateHash,

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: Option<commands::config_cmd::ConfigAction>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Ask {
            message,
            stream,
            order,
        } => commands::ask::run(message, stream, order).await?,
        Commands::TemplateHash => commands::template_hash::run()?,
        Commands::Config { action } => commands::config_cmd::run(action)?,
    }

    Ok(())
}
