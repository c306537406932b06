use async_trait::async_trait;

use crate::config::{Config, EmbeddingProviderType};
use crate::error::Error;

use super::cache::{CachedProvider, EmbeddingCache};
use super::mock::MockProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAIProvider;

/// Trait for embedding text into fixed-dimension vector representations.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingProvider("provider returned no vector".into()))
    }

    /// The dimensionality of the embedding vectors produced.
    fn dimensions(&self) -> usize;

    /// Human-readable name for this provider.
    fn name(&self) -> &str;
}

/// Create an embedding provider based on the current configuration.
///
/// When `embedding_cache_dir` is set the provider is wrapped in a
/// best-effort disk cache keyed by model id and text.
pub fn create_provider(config: &Config) -> crate::Result<Box<dyn EmbeddingProvider>> {
    let inner: Box<dyn EmbeddingProvider> = match config.embedding_provider {
        EmbeddingProviderType::OpenAI => {
            let api_key = config.openai_api_key.as_ref().ok_or_else(|| {
                Error::EmbeddingProvider("OpenAI provider requires OPENAI_API_KEY to be set".into())
            })?;
            Box::new(OpenAIProvider::new(
                api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            ))
        }
        EmbeddingProviderType::Ollama => Box::new(OllamaProvider::new(
            config.ollama_host.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        )),
        EmbeddingProviderType::Mock => Box::new(MockProvider::new(config.embedding_dimensions)),
    };

    match &config.embedding_cache_dir {
        Some(dir) => {
            let cache = EmbeddingCache::new(dir.clone(), config.embedding_model.clone());
            Ok(Box::new(CachedProvider::new(inner, cache)))
        }
        None => Ok(inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn create_mock_provider() {
        let config = Config::for_tests(64);
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "mock");
        assert_eq!(provider.dimensions(), 64);
    }

    #[test]
    fn create_ollama_provider() {
        let mut config = Config::for_tests(128);
        config.embedding_provider = EmbeddingProviderType::Ollama;
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.dimensions(), 128);
    }

    #[test]
    fn create_openai_provider_requires_key() {
        let mut config = Config::for_tests(128);
        config.embedding_provider = EmbeddingProviderType::OpenAI;
        config.openai_api_key = None;
        let err = match create_provider(&config) {
            Err(e) => e.to_string(),
            Ok(_) => panic!("expected error for missing API key"),
        };
        assert!(err.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn create_openai_provider_with_key() {
        let mut config = Config::for_tests(1536);
        config.embedding_provider = EmbeddingProviderType::OpenAI;
        config.openai_api_key = Some("sk-test".into());
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[tokio::test]
    async fn single_embed_delegates_to_batch() {
        let config = Config::for_tests(32);
        let provider = create_provider(&config).unwrap();
        let vector = provider.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 32);
    }
}
