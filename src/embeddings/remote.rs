use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig as AsyncOpenAIConfig, types::CreateEmbeddingRequestArgs, Client,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::RemoteConfig;

use super::provider::{
    EmbeddingProvider, HealthStatus, ProviderCapabilities, ThrottleCallback, ThrottleEvent,
};

/// A response slower than this is reported as server-side throttling even
/// when the provider returns success.
const SLOW_RESPONSE: Duration = Duration::from_secs(30);

/// Fallback per-request token limit for models not in the table
const DEFAULT_REQUEST_TOKEN_LIMIT: usize = 120_000;

/// Token-bucket rate limiter for API calls
struct RateLimiter {
    tokens: Arc<RwLock<f64>>,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: Arc<RwLock<Instant>>,
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(max_tokens)),
            max_tokens,
            refill_rate,
            last_refill: Arc::new(RwLock::new(Instant::now())),
        }
    }

    /// Take `count` tokens, sleeping until the bucket refills if needed.
    /// Returns how long the caller was made to wait.
    async fn acquire(&self, count: usize) -> Duration {
        let started = Instant::now();
        loop {
            let mut tokens = self.tokens.write().await;
            let mut last_refill = self.last_refill.write().await;

            let elapsed = last_refill.elapsed().as_secs_f64();
            *tokens = (*tokens + elapsed * self.refill_rate).min(self.max_tokens);
            *last_refill = Instant::now();

            if *tokens >= count as f64 {
                *tokens -= count as f64;
                return started.elapsed();
            }

            let wait_ms = ((count as f64 - *tokens) / self.refill_rate) * 1000.0;
            drop(tokens);
            drop(last_refill);

            tokio::time::sleep(Duration::from_millis(wait_ms as u64)).await;
        }
    }
}

/// Embedding provider backed by an OpenAI-compatible HTTP endpoint.
pub struct RemoteProvider {
    client: Client<AsyncOpenAIConfig>,
    model: String,
    config: RemoteConfig,
    rate_limiter: RateLimiter,
    throttle_callback: Mutex<Option<ThrottleCallback>>,
}

impl RemoteProvider {
    pub fn new(model: &str, config: &RemoteConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!("API key environment variable {} is not set", config.api_key_env)
        })?;

        let mut client_config = AsyncOpenAIConfig::new().with_api_key(api_key);
        if let Some(base_url) = &config.base_url {
            client_config = client_config.with_api_base(base_url);
        }

        let per_second = config.requests_per_minute / 60.0;
        let rate_limiter = RateLimiter::new(config.requests_per_minute, per_second);

        info!("Initialized remote embedding provider with model: {}", model);

        Ok(Self {
            client: Client::with_config(client_config),
            model: model.to_string(),
            config: config.clone(),
            rate_limiter,
            throttle_callback: Mutex::new(None),
        })
    }

    fn emit(&self, event: ThrottleEvent) {
        if let Some(cb) = self.throttle_callback.lock().unwrap().as_ref() {
            cb(event);
        }
    }

    /// Per-request token limits published by the providers we know about
    fn request_token_limit(model: &str) -> usize {
        match model {
            m if m.starts_with("voyage") => 120_000,
            "text-embedding-3-small" | "text-embedding-3-large" => 300_000,
            "text-embedding-ada-002" => 8_191,
            _ => DEFAULT_REQUEST_TOKEN_LIMIT,
        }
    }

    fn embedding_dimension_for(model: &str) -> usize {
        match model {
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            "text-embedding-ada-002" => 1536,
            m if m.contains("voyage-code") => 1024,
            m if m.contains("nomic") => 768,
            _ => 1024,
        }
    }

    fn is_rate_limit_error(err: &anyhow::Error) -> bool {
        let text = format!("{:#}", err).to_lowercase();
        text.contains("429") || text.contains("rate limit") || text.contains("rate_limit")
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(texts.to_vec())
            .build()
            .context("Failed to build embedding request")?;

        let started = Instant::now();
        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("Embedding API request failed")?;

        if started.elapsed() > SLOW_RESPONSE {
            warn!(
                "Embedding request took {:.1}s, treating as server throttling",
                started.elapsed().as_secs_f64()
            );
            self.emit(ThrottleEvent::ServerThrottle);
        }

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(response.data.len());
        for item in response.data {
            embeddings.push(item.embedding);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let waited = self.rate_limiter.acquire(1).await;
        if !waited.is_zero() {
            self.emit(ThrottleEvent::ClientWait(waited));
        }

        let mut attempt = 0;
        let mut backoff = self.config.initial_backoff_ms;

        let embeddings = loop {
            match self.request_once(texts).await {
                Ok(embeddings) => break embeddings,
                Err(e) if attempt >= self.config.max_retries => {
                    if Self::is_rate_limit_error(&e) {
                        self.emit(ThrottleEvent::ServerThrottle);
                    }
                    return Err(e).context("Max retries exceeded");
                }
                Err(e) => {
                    if Self::is_rate_limit_error(&e) {
                        self.emit(ThrottleEvent::ServerThrottle);
                    }
                    warn!("Embedding request failed (attempt {}): {:#}", attempt + 1, e);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = ((backoff as f64) * self.config.exponential_base) as u64;
                    backoff = backoff.min(self.config.max_backoff_ms);
                    attempt += 1;
                }
            }
        };

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "provider returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            ));
        }

        Ok(embeddings)
    }

    fn current_model(&self) -> String {
        self.model.clone()
    }

    fn model_token_limit(&self) -> usize {
        self.config
            .max_request_tokens
            .unwrap_or_else(|| Self::request_token_limit(&self.model))
    }

    fn embedding_dimension(&self) -> usize {
        Self::embedding_dimension_for(&self.model)
    }

    fn provider_name(&self) -> &'static str {
        "remote"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batching: true,
            requires_api_key: true,
            is_local: false,
        }
    }

    fn tokenizer_id(&self) -> Option<String> {
        if let Some(repo) = &self.config.tokenizer_repo {
            return Some(repo.clone());
        }
        match self.model.as_str() {
            "nomic-embed-text-v1.5" => Some("nomic-ai/nomic-embed-text-v1.5".to_string()),
            m if m.starts_with("voyage") => Some(format!("voyageai/{}", m)),
            _ => None,
        }
    }

    fn set_throttling_callback(&self, callback: ThrottleCallback) {
        *self.throttle_callback.lock().unwrap() = Some(callback);
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.embed(&["health check".to_string()]).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) if format!("{:#}", e).to_lowercase().contains("rate") => {
                Ok(HealthStatus::Degraded {
                    reason: "Rate limited".to_string(),
                })
            }
            Err(e) => Ok(HealthStatus::Unhealthy {
                error: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_reports_wait_time() {
        let limiter = RateLimiter::new(10.0, 10.0);

        // Bucket starts full; first acquisitions are free
        assert!(limiter.acquire(5).await < Duration::from_millis(50));
        assert!(limiter.acquire(5).await < Duration::from_millis(50));

        // Bucket is empty now; this one has to wait for a refill
        let waited = limiter.acquire(5).await;
        assert!(waited >= Duration::from_millis(100));
    }

    #[test]
    fn test_request_token_limits() {
        assert_eq!(RemoteProvider::request_token_limit("voyage-code-3"), 120_000);
        assert_eq!(RemoteProvider::request_token_limit("text-embedding-ada-002"), 8_191);
        assert_eq!(
            RemoteProvider::request_token_limit("something-new"),
            DEFAULT_REQUEST_TOKEN_LIMIT
        );
    }

    #[test]
    fn test_rate_limit_error_detection() {
        assert!(RemoteProvider::is_rate_limit_error(&anyhow!(
            "HTTP 429 Too Many Requests"
        )));
        assert!(RemoteProvider::is_rate_limit_error(&anyhow!(
            "rate limit exceeded, retry later"
        )));
        assert!(!RemoteProvider::is_rate_limit_error(&anyhow!(
            "connection refused"
        )));
    }
}
