//! The tool pipeline: aggregate, compose, invoke, record.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warmprompt_compose::{PromptComposer, TemplateRegistry};
use warmprompt_config::AppConfig;
use warmprompt_context::{ContextAggregator, KeywordPassageIndex, NoRetrieval};
use warmprompt_core::adapter::{
    ChunkStream, InvocationAdapter, InvocationCall, InvocationResult, InvokeOptions, StreamItem,
    Usage,
};
use warmprompt_core::context::{DegradedSource, PassageRetriever};
use warmprompt_core::error::{Error, InvocationError};
use warmprompt_core::request::ToolInvocationRequest;
use warmprompt_telemetry::{CacheAccountant, ModelPricing, PricingTable};

use crate::stream::RecordingStream;

/// Result of a non-streaming invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// The model/tool's answer
    #[serde(rename = "response")]
    pub content: String,

    /// Usage with `cost_estimate` filled by the accountant
    pub usage: Usage,

    /// Which model answered
    pub model: String,

    /// Correlation id (logs only, never stored)
    pub invocation_id: String,

    /// Context sources that fell back to their empty default
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<DegradedSource>,
}

/// A composed request ready for the adapter.
struct Prepared {
    call: InvocationCall,
    degraded: Vec<DegradedSource>,
}

/// Stateless end-to-end pipeline. Share it behind an `Arc`.
pub struct ToolPipeline {
    aggregator: ContextAggregator,
    composer: PromptComposer,
    adapter: Arc<dyn InvocationAdapter>,
    accountant: Arc<CacheAccountant>,
    caller_timeout: Duration,
    max_tokens: Option<u32>,
}

impl ToolPipeline {
    pub fn new(
        aggregator: ContextAggregator,
        composer: PromptComposer,
        adapter: Arc<dyn InvocationAdapter>,
        accountant: Arc<CacheAccountant>,
    ) -> Self {
        Self {
            aggregator,
            composer,
            adapter,
            accountant,
            caller_timeout: Duration::from_secs(30),
            max_tokens: None,
        }
    }

    /// Upper bound for fetches plus invocation (including a stream's body).
    pub fn with_caller_timeout(mut self, timeout: Duration) -> Self {
        self.caller_timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Build everything from configuration.
    ///
    /// The template is hashed and pinned at startup; a pinned
    /// `expected_sha256` that does not match fails here rather than on the
    /// first request. Pass `None` for `retriever` to use an empty keyword index.
    pub fn from_config(
        config: &AppConfig,
        retriever: Option<Arc<dyn PassageRetriever>>,
    ) -> Result<Self, Error> {
        let template_text = config.prompt.load_template().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let registry = Arc::new(TemplateRegistry::new());
        let template = registry.register(config.prompt.template_version.clone(), template_text)?;
        if let Some(expected) = &config.prompt.expected_sha256 {
            template.verify_pinned(expected)?;
        }
        info!(
            version = template.version(),
            sha256 = template.sha256(),
            cacheable_tokens = template.token_count(),
            "Static template loaded"
        );

        let retriever: Arc<dyn PassageRetriever> = match retriever {
            Some(r) => r,
            None if config.context.max_passages == 0 => Arc::new(NoRetrieval),
            None => Arc::new(KeywordPassageIndex::new()),
        };
        let aggregator = ContextAggregator::from_request(retriever)
            .with_timeout(config.context.fetch_timeout())
            .with_passage_limits(config.context.max_passages, config.context.min_relevance)
            .with_history_limit(config.context.max_history_turns);

        let pricing = PricingTable::with_defaults();
        for (model, p) in &config.telemetry.custom_pricing {
            pricing.set(
                model.clone(),
                ModelPricing::new(p.input_per_m, p.cached_input_per_m, p.output_per_m),
            );
        }

        let adapter = warmprompt_providers::build_from_config(config)?;

        Ok(Self::new(
            aggregator,
            PromptComposer::new(registry, template),
            adapter,
            Arc::new(CacheAccountant::with_pricing(pricing)),
        )
        .with_caller_timeout(config.pipeline.caller_timeout())
        .with_max_tokens(config.pipeline.max_tokens))
    }

    pub fn accountant(&self) -> &Arc<CacheAccountant> {
        &self.accountant
    }

    pub fn adapter(&self) -> &Arc<dyn InvocationAdapter> {
        &self.adapter
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    /// Run one invocation to completion.
    pub async fn invoke(&self, request: ToolInvocationRequest) -> Result<PipelineResponse, Error> {
        request.validate()?;
        let started = Instant::now();
        let invocation_id = uuid::Uuid::new_v4().to_string();

        let exchange = async {
            let prepared = self.prepare(invocation_id.clone(), request).await?;
            let options = InvokeOptions {
                stream: false,
                timeout: None,
                max_tokens: self.max_tokens,
            };
            let completion = match self.adapter.invoke(prepared.call, &options).await? {
                InvocationResult::Complete(completion) => completion,
                InvocationResult::Streaming(stream) => stream.collect_completion().await?,
            };
            Ok::<_, Error>((completion, prepared.degraded))
        };

        let (completion, degraded) = tokio::time::timeout(self.caller_timeout, exchange)
            .await
            .map_err(|_| self.caller_timed_out(&invocation_id, started))??;

        let usage = self.accountant.record(&completion.model, completion.usage);
        info!(
            invocation_id = %invocation_id,
            adapter = self.adapter.name(),
            model = %completion.model,
            cached_tokens = usage.cached_tokens,
            total_tokens = usage.total_tokens,
            latency_ms = started.elapsed().as_millis() as u64,
            "Invocation complete"
        );

        Ok(PipelineResponse {
            content: completion.content,
            usage,
            model: completion.model,
            invocation_id,
            degraded,
        })
    }

    /// Start a streaming invocation.
    ///
    /// Returns once the adapter has started the stream. The rest of the
    /// caller timeout bounds the stream body.
    pub async fn invoke_stream(
        &self,
        request: ToolInvocationRequest,
    ) -> Result<RecordingStream, Error> {
        request.validate()?;
        let started = Instant::now();
        let deadline = started + self.caller_timeout;
        let invocation_id = uuid::Uuid::new_v4().to_string();

        let exchange = async {
            let prepared = self.prepare(invocation_id.clone(), request).await?;
            let options = InvokeOptions {
                stream: true,
                timeout: Some(deadline.saturating_duration_since(Instant::now())),
                max_tokens: self.max_tokens,
            };
            let stream = match self.adapter.invoke(prepared.call, &options).await? {
                InvocationResult::Streaming(stream) => stream,
                InvocationResult::Complete(completion) => {
                    let (tx, stream) = ChunkStream::channel(completion.model.clone(), 2);
                    let _ = tx.send(Ok(StreamItem::Chunk(completion.content))).await;
                    let _ = tx.send(Ok(StreamItem::Done(completion.usage))).await;
                    stream
                }
            };
            Ok::<_, Error>((stream, prepared.degraded))
        };

        let (stream, degraded) = tokio::time::timeout_at(deadline, exchange)
            .await
            .map_err(|_| self.caller_timed_out(&invocation_id, started))??;

        debug!(invocation_id = %invocation_id, "Stream started");
        let model = stream.model().to_string();
        Ok(RecordingStream::new(
            stream,
            self.accountant.clone(),
            model,
            invocation_id,
            degraded,
        ))
    }

    async fn prepare(
        &self,
        invocation_id: String,
        request: ToolInvocationRequest,
    ) -> Result<Prepared, Error> {
        let bundle = self.aggregator.aggregate(&request).await;
        let prompt = self.composer.compose(&request.message, &bundle)?;
        debug!(
            invocation_id = %invocation_id,
            template = prompt.template_version(),
            prefix_sha256 = prompt.prefix_sha256(),
            cacheable_tokens = prompt.cacheable_tokens(),
            estimated_tokens = prompt.estimated_tokens(),
            "Prompt composed"
        );

        Ok(Prepared {
            degraded: bundle.degraded().to_vec(),
            call: InvocationCall {
                invocation_id,
                request,
                messages: prompt.into_blocks(),
            },
        })
    }

    fn caller_timed_out(&self, invocation_id: &str, started: Instant) -> Error {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        warn!(
            invocation_id = %invocation_id,
            timeout_ms = self.caller_timeout.as_millis() as u64,
            "Invocation cancelled by caller timeout, nothing recorded"
        );
        Error::Invocation(InvocationError::Timeout { elapsed_ms })
    }
}
