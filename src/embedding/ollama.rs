use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Error;

use super::provider::EmbeddingProvider;

/// Ollama embedding provider.
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    /// Create a new Ollama embedding provider.
    pub fn new(host: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            host,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.host.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingProvider(format!(
                "ollama returned {status}: {detail}"
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProvider(format!("ollama response parse: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Error::EmbeddingProvider(format!(
                "ollama returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_configured_dimensions() {
        let provider =
            OllamaProvider::new("http://localhost:11434".into(), "nomic-embed-text".into(), 768);
        assert_eq!(provider.dimensions(), 768);
        assert_eq!(provider.name(), "ollama");
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let provider = OllamaProvider::new("http://localhost:11434".into(), "m".into(), 8);
        let result = provider.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
