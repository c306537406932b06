use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::provider::EmbeddingProvider;

/// On-disk embedding cache: one JSON file per entry, keyed by
/// `sha256(model_id ":" text)`.
///
/// All reads and writes are best-effort — a missing or unreadable entry
/// recomputes, a failed write is swallowed. Overwriting an equal value is
/// acceptable, so concurrent writers need no coordination.
pub struct EmbeddingCache {
    dir: PathBuf,
    model_id: String,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    embedding: Vec<f32>,
}

impl EmbeddingCache {
    pub fn new(dir: PathBuf, model_id: String) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            debug!(dir = %dir.display(), error = %e, "cannot create embedding cache dir");
        }
        Self { dir, model_id }
    }

    /// Cache key for a text under the configured model.
    pub fn key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model_id.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Load a cached embedding, or `None` on any failure.
    pub fn load(&self, text: &str) -> Option<Vec<f32>> {
        let path = self.dir.join(format!("{}.json", self.key(text)));
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str::<CacheEntry>(&data)
            .ok()
            .map(|e| e.embedding)
    }

    /// Store an embedding; failures are logged at debug and swallowed.
    pub fn store(&self, text: &str, embedding: &[f32]) {
        let path = self.dir.join(format!("{}.json", self.key(text)));
        let entry = CacheEntry {
            embedding: embedding.to_vec(),
        };
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    debug!(path = %path.display(), error = %e, "embedding cache write failed");
                }
            }
            Err(e) => debug!(error = %e, "embedding cache serialize failed"),
        }
    }
}

/// Wraps any provider with the disk cache.
pub struct CachedProvider {
    inner: Box<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
}

impl CachedProvider {
    pub fn new(inner: Box<dyn EmbeddingProvider>, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<usize> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.load(text) {
                Some(vector) => results.push(Some(vector)),
                None => {
                    results.push(None);
                    misses.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        if !miss_texts.is_empty() {
            let computed = self.inner.embed_batch(&miss_texts).await?;
            for (slot, vector) in misses.iter().zip(computed) {
                self.cache.store(&texts[*slot], &vector);
                results[*slot] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
