use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Throttling signals a provider reports to the pipeline.
///
/// `ClientWait` is a deliberate delay our own rate limiter inserted before
/// dispatching a request; `ServerThrottle` is a rate-limit response or an
/// abnormally slow answer from the provider itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleEvent {
    ClientWait(Duration),
    ServerThrottle,
}

/// Callback through which a provider reports throttle events.
pub type ThrottleCallback = Box<dyn Fn(ThrottleEvent) + Send + Sync>;

/// Core trait for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a batch of texts.
    ///
    /// Returns exactly one vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model the provider is currently configured for
    fn current_model(&self) -> String;

    /// Maximum total tokens the provider accepts in a single request
    fn model_token_limit(&self) -> usize;

    /// Dimension of the vectors produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Provider name for logging and metadata
    fn provider_name(&self) -> &'static str;

    /// Provider capabilities for feature detection
    fn capabilities(&self) -> ProviderCapabilities;

    /// Hugging Face tokenizer repo for exact token counting, if one exists
    fn tokenizer_id(&self) -> Option<String> {
        None
    }

    /// Install the throttling callback. Providers without rate limiting
    /// ignore it.
    fn set_throttling_callback(&self, _callback: ThrottleCallback) {}

    /// Check if the provider is healthy and ready
    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }
}

/// Provider capabilities for feature detection
#[derive(Debug, Clone)]
pub struct ProviderCapabilities {
    pub supports_batching: bool,
    pub requires_api_key: bool,
    pub is_local: bool,
}

/// Health status for provider monitoring
#[derive(Debug, Clone)]
pub enum HealthStatus {
    Healthy,
    Degraded { reason: String },
    Unhealthy { error: String },
}

/// Default embedding concurrency for a provider.
///
/// Remote HTTP providers handle parallel requests well; local in-process
/// models contend for the same cores and run best single-file.
pub fn default_vector_thread_count(provider: &dyn EmbeddingProvider) -> usize {
    if provider.capabilities().is_local {
        1
    } else {
        8
    }
}
