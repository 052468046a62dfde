mod local;
mod mock;
mod provider;
mod remote;
mod tokens;

pub use local::LocalProvider;
pub use mock::MockEmbedder;
pub use provider::{
    default_vector_thread_count, EmbeddingProvider, HealthStatus, ProviderCapabilities,
    ThrottleCallback, ThrottleEvent,
};
pub use remote::RemoteProvider;
pub use tokens::TokenCounter;

use crate::config::{EmbeddingsConfig, ProviderKind};
use anyhow::Result;
use std::sync::Arc;

/// Build the configured embedding provider.
pub fn create_provider(config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::Remote => Ok(Arc::new(RemoteProvider::new(&config.model, &config.remote)?)),
        ProviderKind::Local => Ok(Arc::new(LocalProvider::new(&config.model)?)),
    }
}
