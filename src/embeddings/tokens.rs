//! Token counting for batch sizing.
//!
//! Remote providers get exact counts from the model's official tokenizer;
//! everything else uses a conservative character heuristic. Tokenizers are
//! loaded lazily and cached per model for the life of the process.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokenizers::Tokenizer;
use tracing::warn;

use super::provider::EmbeddingProvider;

/// Rough bytes-per-token ratio for the heuristic fallback
const HEURISTIC_CHARS_PER_TOKEN: usize = 4;

lazy_static! {
    // Write-once per model, then read-only.
    static ref TOKENIZER_CACHE: RwLock<HashMap<String, Arc<Tokenizer>>> =
        RwLock::new(HashMap::new());
}

enum CountMode {
    /// Official tokenizer fetched from the given Hugging Face repo
    Pretrained { repo: String },
    /// ~4 chars per token estimate
    Heuristic,
}

/// Provider-aware token counter.
pub struct TokenCounter {
    mode: CountMode,
}

impl TokenCounter {
    /// Pick the counting strategy for a provider: exact counting when the
    /// provider names a tokenizer, heuristic otherwise.
    pub fn for_provider(provider: &dyn EmbeddingProvider) -> Self {
        match provider.tokenizer_id() {
            Some(repo) => Self {
                mode: CountMode::Pretrained { repo },
            },
            None => Self::heuristic(),
        }
    }

    /// Character-based estimate, used for local providers and in tests.
    pub fn heuristic() -> Self {
        Self {
            mode: CountMode::Heuristic,
        }
    }

    /// Count tokens in a single text.
    pub fn count(&self, text: &str) -> usize {
        match &self.mode {
            CountMode::Heuristic => heuristic_count(text),
            CountMode::Pretrained { repo } => match cached_tokenizer(repo) {
                Ok(tokenizer) => tokenizer
                    .encode(text, false)
                    .map(|encoding| encoding.get_ids().len())
                    .unwrap_or_else(|e| {
                        warn!("Tokenizer failed on text, using heuristic count: {}", e);
                        heuristic_count(text)
                    }),
                Err(e) => {
                    warn!("Failed to load tokenizer '{}': {}. Using heuristic counts.", repo, e);
                    heuristic_count(text)
                }
            },
        }
    }

    /// Exact sum of token counts over a batch.
    pub fn count_batch(&self, texts: &[String]) -> usize {
        texts.iter().map(|t| self.count(t)).sum()
    }
}

fn heuristic_count(text: &str) -> usize {
    text.len() / HEURISTIC_CHARS_PER_TOKEN
}

/// Load a tokenizer once and reuse it. The first caller for a model pays the
/// download; later callers take the read path.
fn cached_tokenizer(repo: &str) -> Result<Arc<Tokenizer>> {
    {
        let cache = TOKENIZER_CACHE
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tokenizer) = cache.get(repo) {
            return Ok(Arc::clone(tokenizer));
        }
    }

    let tokenizer = Tokenizer::from_pretrained(repo, None)
        .map_err(|e| anyhow!("failed to load tokenizer for '{}': {}", repo, e))?;
    let tokenizer = Arc::new(tokenizer);

    let mut cache = TOKENIZER_CACHE
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // Another thread may have raced us here; keep whichever landed first.
    let entry = cache
        .entry(repo.to_string())
        .or_insert_with(|| Arc::clone(&tokenizer));
    Ok(Arc::clone(entry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_count() {
        let counter = TokenCounter::heuristic();
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_batch_count_is_exact_sum() {
        let counter = TokenCounter::heuristic();
        let texts = vec!["abcd".to_string(), "x".repeat(40), "yz".to_string()];
        let expected: usize = texts.iter().map(|t| counter.count(t)).sum();
        assert_eq!(counter.count_batch(&texts), expected);
        assert_eq!(counter.count_batch(&[]), 0);
    }
}
