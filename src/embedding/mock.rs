use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::provider::EmbeddingProvider;

/// A deterministic embedding provider for offline use and tests.
///
/// Texts are mapped to vectors by feature-hashing their character
/// trigrams and whitespace tokens into the declared dimensions, then
/// L2-normalizing. Identical input always produces identical output, and
/// texts sharing vocabulary land near each other, so similarity ranking
/// behaves sensibly without a model. Tracks how many times `embed_batch`
/// has been called.
pub struct MockProvider {
    dimensions: usize,
    call_count: Arc<AtomicUsize>,
}

impl MockProvider {
    /// Create a new mock provider with the given vector dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            call_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the number of times `embed_batch` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn bucket(&self, feature: &str) -> usize {
        let mut hasher = Sha256::new();
        hasher.update(feature.as_bytes());
        let hash = hasher.finalize();
        let idx = u64::from_be_bytes(hash[..8].try_into().unwrap());
        (idx % self.dimensions as u64) as usize
    }

    /// Hash a text into a stable pseudo-embedding.
    fn deterministic_vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();

        let chars: Vec<char> = lowered.chars().collect();
        for window in chars.windows(3) {
            let gram: String = window.iter().collect();
            vector[self.bucket(&gram)] += 1.0;
        }
        for token in lowered.split_whitespace() {
            vector[self.bucket(token)] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.deterministic_vector(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}
