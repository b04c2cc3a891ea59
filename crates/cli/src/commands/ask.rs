//! `warmprompt ask`: One invocation through the full pipeline.

use std::io::Write;

use anyhow::{Context, bail};
use futures::StreamExt;
use tracing::warn;
use warmprompt_config::AppConfig;
use warmprompt_core::adapter::{StreamItem, Usage};
use warmprompt_core::request::ToolInvocationRequest;
use warmprompt_pipeline::ToolPipeline;

pub async fn run(message: String, stream: bool, order: Option<String>) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;
    let pipeline = ToolPipeline::from_config(&config, None)?;

    let mut request = ToolInvocationRequest::new(message);
    if let Some(order) = order {
        request = request.with_order_context(parse_order(&order)?);
    }

    let usage = if stream {
        let mut chunks = pipeline.invoke_stream(request).await?;
        for degraded in chunks.degraded() {
            warn!(source = %degraded.source, reason = %degraded.reason, "Context degraded");
        }

        let mut stdout = std::io::stdout();
        let mut usage = None;
        while let Some(item) = chunks.next().await {
            match item? {
                StreamItem::Chunk(text) => {
                    print!("{text}");
                    stdout.flush()?;
                }
                StreamItem::Done(u) => usage = Some(u),
            }
        }
        println!();
        usage.context("Stream ended without usage")?
    } else {
        let response = pipeline.invoke(request).await?;
        for degraded in &response.degraded {
            warn!(source = %degraded.source, reason = %degraded.reason, "Context degraded");
        }
        println!("{}", response.content);
        response.usage
    };

    println!();
    println!("{}", stats_line(&usage));
    Ok(())
}

fn parse_order(raw: &str) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str(raw).context("--order must be valid JSON")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("--order must be a JSON object"),
    }
}

fn stats_line(usage: &Usage) -> String {
    format!(
        "[tokens: {} prompt ({} cached), {} completion | cost: ${:.6}]",
        usage.prompt_tokens, usage.cached_tokens, usage.completion_tokens, usage.cost_estimate
    )
}
