//! Cache-first generation keyed by a content hash of the full prompt.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::types::{Generation, LlmError, TextGenerator};

/// Hex SHA-256 of `instructions` followed by `input`.
pub fn cache_key(instructions: &str, input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instructions.as_bytes());
    hasher.update(input.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Storage for generated text. Write failures are the implementation's
/// problem; a miss is always an acceptable answer.
pub trait GenerationCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, model: &str, content: &str);
}

/// Process-local cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, String>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl GenerationCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    fn put(&self, key: &str, _model: &str, content: &str) {
        self.entries.insert(key.to_string(), content.to_string());
    }
}

pub struct CachedGenerator {
    inner: Arc<dyn TextGenerator>,
    cache: Arc<dyn GenerationCache>,
}

impl CachedGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, cache: Arc<dyn GenerationCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl TextGenerator for CachedGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, instructions: &str, input: &str) -> Result<Generation, LlmError> {
        let key = cache_key(instructions, input);
        if let Some(content) = self.cache.get(&key) {
            debug!("generation cache hit {}", &key[..12]);
            return Ok(Generation {
                content,
                model: "cache".into(),
                cached: true,
            });
        }

        let generation = self.inner.generate(instructions, input).await?;
        self.cache.put(&key, &generation.model, &generation.content);
        Ok(generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _instructions: &str, input: &str) -> Result<Generation, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Generation {
                content: format!("echo {input}"),
                model: "counting-1".into(),
                cached: false,
            })
        }
    }

    #[test]
    fn test_cache_key_is_stable_hex() {
        let key = cache_key("persona", "dossier");
        assert_eq!(key.len(), 64);
        assert_eq!(key, cache_key("persona", "dossier"));
        assert_ne!(key, cache_key("persona", "dossier2"));
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_identical_prompt_is_generated_once() {
        let inner = Arc::new(Counting::default());
        let cache = Arc::new(MemoryCache::new());
        let generator = CachedGenerator::new(inner.clone(), cache.clone());

        let first = generator.generate("alpha", "dossier").await.unwrap();
        let second = generator.generate("alpha", "dossier").await.unwrap();

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.content, second.content);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_different_persona_misses() {
        let inner = Arc::new(Counting::default());
        let generator = CachedGenerator::new(inner.clone(), Arc::new(MemoryCache::new()));

        generator.generate("alpha", "dossier").await.unwrap();
        generator.generate("sage", "dossier").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
