use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::chunker::estimate_tokens;
use crate::config::Config;
use crate::document::DocumentChunk;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::VectorIndex;

/// A retrieved chunk with its similarity score and owning document path.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: DocumentChunk,
    /// Similarity score in [0, 1].
    pub score: f64,
    pub document_path: String,
}

/// Context assembled for the LLM from retrieved chunks.
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    /// The cleaned query.
    pub query: String,
    /// Ranked results, score descending.
    pub retrieved_chunks: Vec<RetrievalResult>,
    /// Estimated token count of `context_text`.
    pub total_tokens: usize,
    pub context_text: String,
}

impl QueryContext {
    pub fn has_results(&self) -> bool {
        !self.retrieved_chunks.is_empty()
    }
}

/// Processes user queries: clean → expand → embed → retrieve → rank →
/// assemble bounded context.
pub struct QueryProcessor {
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    max_results: usize,
    min_score: f64,
    max_context_tokens: usize,
}

impl QueryProcessor {
    pub fn new(
        index: Arc<VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        max_results: usize,
        min_score: f64,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            index,
            provider,
            max_results,
            min_score,
            max_context_tokens,
        }
    }

    pub fn from_config(
        index: Arc<VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self::new(
            index,
            provider,
            config.max_results,
            config.min_score,
            config.max_context_tokens,
        )
    }

    /// Run the full query pipeline. `conversation_history` is a short
    /// snippet of recent message contents, oldest first.
    pub async fn process_query(
        &self,
        query: &str,
        conversation_history: Option<&[String]>,
    ) -> Result<QueryContext> {
        let cleaned = clean_query(query);
        let expanded = expand_query(&cleaned, conversation_history);

        let results = self.retrieve(&expanded).await?;
        let (context_text, total_tokens) = self.build_context(&results);

        debug!(
            query = %cleaned,
            results = results.len(),
            tokens = total_tokens,
            "query processed"
        );

        Ok(QueryContext {
            query: cleaned,
            retrieved_chunks: results,
            total_tokens,
            context_text,
        })
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalResult>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self.provider.embed(query).await?;
        let matches = self.index.query(&embedding, self.max_results, None)?;

        let mut results: Vec<RetrievalResult> = matches
            .into_iter()
            .filter(|m| m.score >= self.min_score)
            .map(|m| {
                let document_id = m
                    .metadata
                    .get("source_file")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let start_line = m
                    .metadata
                    .get("start_line")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;
                let end_line = m
                    .metadata
                    .get("end_line")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as usize;

                RetrievalResult {
                    document_path: document_id.clone(),
                    score: m.score,
                    chunk: DocumentChunk {
                        chunk_id: m.id,
                        document_id,
                        content: m.payload,
                        start_line,
                        end_line,
                        metadata: m.metadata,
                        embedding: None,
                    },
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    /// Format ranked results into a bounded context text. Entries that
    /// would push the estimate past `max_context_tokens` are dropped.
    fn build_context(&self, results: &[RetrievalResult]) -> (String, usize) {
        if results.is_empty() {
            return (String::new(), 0);
        }

        let mut parts: Vec<String> = Vec::new();
        let mut total_tokens = 0usize;

        for (i, result) in results.iter().enumerate() {
            let mut label = format!("[Source {}] {}", i + 1, result.document_path);
            if result.chunk.start_line > 0 {
                label.push_str(&format!(
                    " (lines {}-{})",
                    result.chunk.start_line, result.chunk.end_line
                ));
            }
            let entry = format!("{label}\n{}\n", result.chunk.content);

            let entry_tokens = estimate_tokens(&entry);
            if total_tokens + entry_tokens > self.max_context_tokens {
                break;
            }
            parts.push(entry);
            total_tokens += entry_tokens;
        }

        (parts.join("\n---\n"), total_tokens)
    }
}

/// Collapse whitespace runs (including newlines) to single spaces.
fn clean_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trivial v1 expansion: a prior message that is itself a question is
/// prepended for retrieval; anything else (likely an answer) is ignored.
fn expand_query(query: &str, history: Option<&[String]>) -> String {
    let Some(history) = history else {
        return query.to_string();
    };
    match history.last() {
        Some(last) if last.ends_with('?') || last.ends_with('？') => {
            format!("{last} {query}")
        }
        _ => query.to_string(),
    }
}
