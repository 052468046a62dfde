use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tracing::{info, warn};

use super::provider::{EmbeddingProvider, HealthStatus, ProviderCapabilities};

/// In-process batch size for the fastembed model
const LOCAL_BATCH_SIZE: usize = 32;

/// Local embedding provider running fastembed models in-process.
pub struct LocalProvider {
    model: Arc<TextEmbedding>,
    model_name: String,
}

impl LocalProvider {
    pub fn new(model_name: &str) -> Result<Self> {
        let model_type = Self::parse_model_name(model_name);

        info!("Loading embedding model: {}", model_name);

        let model = TextEmbedding::try_new(
            InitOptions::new(model_type).with_show_download_progress(true),
        )
        .with_context(|| format!("Failed to initialize embedding model: {}", model_name))?;

        info!("Embedding model loaded successfully");

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    fn parse_model_name(name: &str) -> EmbeddingModel {
        match name {
            "nomic-embed-text-v1.5" | "nomic-embed-text" | "nomic-ai/nomic-embed-text-v1.5" => {
                EmbeddingModel::NomicEmbedTextV15
            }
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
            "bge-small-en-v1.5" | "bge-small" | "BAAI/bge-small-en-v1.5" => {
                EmbeddingModel::BGESmallENV15
            }
            "bge-base-en-v1.5" | "bge-base" | "BAAI/bge-base-en-v1.5" => {
                EmbeddingModel::BGEBaseENV15
            }
            "bge-large-en-v1.5" | "bge-large" | "BAAI/bge-large-en-v1.5" => {
                EmbeddingModel::BGELargeENV15
            }
            other => {
                warn!("Unknown model '{}', falling back to nomic-embed-text-v1.5", other);
                EmbeddingModel::NomicEmbedTextV15
            }
        }
    }

    fn model_dimension(model_name: &str) -> usize {
        match model_name {
            name if name.contains("bge-small") => 384,
            name if name.contains("bge-base") => 768,
            name if name.contains("bge-large") => 1024,
            name if name.contains("nomic") => 768,
            name if name.contains("MiniLM") || name.contains("minilm") => 384,
            _ => 768,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // fastembed is synchronous; keep it off the async workers
        let model = self.model.clone();
        let texts = texts.to_vec();

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut embeddings = Vec::with_capacity(texts.len());

            for chunk in texts.chunks(LOCAL_BATCH_SIZE) {
                let batch: Vec<&str> = chunk.iter().map(|s| s.as_str()).collect();
                let batch_embeddings = model
                    .embed(batch, None)
                    .with_context(|| "Failed to generate embeddings")?;
                embeddings.extend(batch_embeddings);
            }

            Ok::<Vec<Vec<f32>>, anyhow::Error>(embeddings)
        })
        .await
        .context("Local embedding task failed")??;

        Ok(embeddings)
    }

    fn current_model(&self) -> String {
        self.model_name.clone()
    }

    fn model_token_limit(&self) -> usize {
        // Local models process chunks sequentially; the limit only bounds
        // batch assembly, not a wire request.
        8_192
    }

    fn embedding_dimension(&self) -> usize {
        Self::model_dimension(&self.model_name)
    }

    fn provider_name(&self) -> &'static str {
        "fastembed"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_batching: true,
            requires_api_key: false,
            is_local: true,
        }
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.embed(&["health check".to_string()]).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy {
                error: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_name() {
        assert!(matches!(
            LocalProvider::parse_model_name("nomic-embed-text-v1.5"),
            EmbeddingModel::NomicEmbedTextV15
        ));
        assert!(matches!(
            LocalProvider::parse_model_name("all-MiniLM-L6-v2"),
            EmbeddingModel::AllMiniLML6V2
        ));
        assert!(matches!(
            LocalProvider::parse_model_name("BAAI/bge-base-en-v1.5"),
            EmbeddingModel::BGEBaseENV15
        ));
        // Unknown should fall back to nomic
        assert!(matches!(
            LocalProvider::parse_model_name("unknown-model"),
            EmbeddingModel::NomicEmbedTextV15
        ));
    }

    #[test]
    fn test_model_dimension() {
        assert_eq!(LocalProvider::model_dimension("bge-small-en-v1.5"), 384);
        assert_eq!(LocalProvider::model_dimension("bge-large-en-v1.5"), 1024);
        assert_eq!(LocalProvider::model_dimension("nomic-embed-text-v1.5"), 768);
        assert_eq!(LocalProvider::model_dimension("unknown"), 768);
    }

    #[tokio::test]
    #[ignore] // Requires model download
    async fn test_embed_texts() {
        let provider = LocalProvider::new("all-MiniLM-L6-v2").unwrap();

        let texts = vec![
            "fn main() { println!(\"Hello\"); }".to_string(),
            "def hello(): print('world')".to_string(),
        ];

        let embeddings = provider.embed(&texts).await.unwrap();

        assert_eq!(embeddings.len(), 2);
        assert!(!embeddings[0].is_empty());
    }
}
