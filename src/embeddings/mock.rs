use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::provider::{
    EmbeddingProvider, HealthStatus, ProviderCapabilities, ThrottleCallback, ThrottleEvent,
};

/// Deterministic embedding provider for tests and offline runs.
///
/// Records every batch it receives and can be scripted to fail or stall on
/// specific calls, which is how the pipeline's atomic-failure and timeout
/// paths get exercised.
pub struct MockEmbedder {
    dimension: usize,
    token_limit: usize,
    calls: Mutex<Vec<Vec<String>>>,
    fail_on_calls: Mutex<Vec<usize>>,
    call_counter: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    throttle_callback: Mutex<Option<ThrottleCallback>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            token_limit: 120_000,
            calls: Mutex::new(Vec::new()),
            fail_on_calls: Mutex::new(Vec::new()),
            call_counter: AtomicUsize::new(0),
            delay: Mutex::new(None),
            throttle_callback: Mutex::new(None),
        }
    }

    /// Override the per-request token limit reported to the batcher.
    pub fn with_token_limit(mut self, limit: usize) -> Self {
        self.token_limit = limit;
        self
    }

    /// Make the Nth `embed` call (0-based) return an error.
    pub fn fail_on_call(&self, call_index: usize) {
        self.fail_on_calls.lock().unwrap().push(call_index);
    }

    /// Delay every `embed` call, for exercising slow-provider paths.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Batches received so far, in arrival order.
    pub fn recorded_batches(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_counter.load(Ordering::SeqCst)
    }

    /// Fire a throttle event through the installed callback, as a rate
    /// limiter or HTTP client would.
    pub fn fire_throttle(&self, event: ThrottleEvent) {
        if let Some(cb) = self.throttle_callback.lock().unwrap().as_ref() {
            cb(event);
        }
    }

    fn text_to_vector(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();

        // Deterministic pseudo-random vector from the text hash
        let mut vector = Vec::with_capacity(self.dimension);
        let mut seed = hash;

        for _ in 0..self.dimension {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let value = ((seed / 65536) % 1000) as f32 / 1000.0;
            vector.push(value);
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in vector.iter_mut() {
                *v /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call_index = self.call_counter.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(texts.to_vec());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on_calls.lock().unwrap().contains(&call_index) {
            return Err(anyhow!("mock embed failure on call {}", call_index));
        }

        Ok(texts.iter().map(|t| self.text_to_vector(t)).collect())
    }

    fn current_model(&self) -> String {
        "mock-embed-v1".to_string()
    }

    fn model_token_limit(&self) -> usize {
        self.token_limit
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batching: true,
            requires_api_key: false,
            is_local: true,
        }
    }

    fn set_throttling_callback(&self, callback: ThrottleCallback) {
        *self.throttle_callback.lock().unwrap() = Some(callback);
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        Ok(HealthStatus::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(768);

        let texts = vec!["test text".to_string()];
        let vec1 = embedder.embed(&texts).await.unwrap();
        let vec2 = embedder.embed(&texts).await.unwrap();

        assert_eq!(vec1, vec2, "Same text should produce same vector");
    }

    #[tokio::test]
    async fn test_mock_embedder_dimension_and_order() {
        let embedder = MockEmbedder::new(512);
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 512);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn test_mock_embedder_normalized() {
        let embedder = MockEmbedder::new(768);
        let vectors = embedder.embed(&["test".to_string()]).await.unwrap();

        let magnitude: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5, "Vector should be normalized");
    }

    #[tokio::test]
    async fn test_mock_embedder_scripted_failure() {
        let embedder = MockEmbedder::new(8);
        embedder.fail_on_call(1);

        assert!(embedder.embed(&["ok".to_string()]).await.is_ok());
        assert!(embedder.embed(&["boom".to_string()]).await.is_err());
        assert_eq!(embedder.call_count(), 2);
        assert_eq!(embedder.recorded_batches().len(), 2);
    }
}
