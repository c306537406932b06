use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::rag::conversation::ConversationStore;
use crate::rag::llm::{LlmClient, LlmMessage, PromptTemplate, Role};
use crate::rag::query::{QueryContext, QueryProcessor};
use crate::rag::response::{FormattedResponse, ResponseGenerator};

/// Tunables for the RAG pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct RagConfig {
    pub max_results: usize,
    pub min_score: f64,
    pub max_context_tokens: usize,
    pub max_llm_tokens: usize,
    pub temperature: f64,
    pub max_conversation_tokens: usize,
    pub suggest_external: bool,
    pub include_confidence: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_results: 5,
            min_score: 0.3,
            max_context_tokens: 2000,
            max_llm_tokens: 1000,
            temperature: 0.7,
            max_conversation_tokens: 4000,
            suggest_external: true,
            include_confidence: true,
        }
    }
}

impl RagConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_results: config.max_results,
            min_score: config.min_score,
            max_context_tokens: config.max_context_tokens,
            max_llm_tokens: config.max_llm_tokens,
            temperature: config.temperature,
            max_conversation_tokens: config.max_conversation_tokens,
            suggest_external: config.suggest_external,
            include_confidence: config.include_confidence,
        }
    }
}

/// Result of one RAG query.
#[derive(Debug, Clone, Serialize)]
pub struct RagResult {
    pub query: String,
    pub response: FormattedResponse,
    pub conversation_id: String,
    pub turn_count: usize,
    pub processing_time: f64,
    pub has_local_data: bool,
    pub retrieved_chunks_count: usize,
    pub llm_tokens_used: usize,
    pub error: Option<String>,
}

/// Rolling statistics over all queries handled by one engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RagStats {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub total_processing_time: f64,
    pub average_processing_time: f64,
    pub total_chunks_retrieved: usize,
    pub total_tokens_used: usize,
}

impl RagStats {
    fn update(&mut self, result: &RagResult) {
        self.total_queries += 1;
        if result.error.is_some() {
            self.failed_queries += 1;
        } else {
            self.successful_queries += 1;
        }
        self.total_processing_time += result.processing_time;
        self.average_processing_time = self.total_processing_time / self.total_queries as f64;
        self.total_chunks_retrieved += result.retrieved_chunks_count;
        self.total_tokens_used += result.llm_tokens_used;
    }
}

/// Monotonic suffix for generated conversation ids.
static CONVERSATION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_conversation_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let counter = CONVERSATION_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("rag-{secs}-{counter}")
}

/// The complete retrieval-augmented generation pipeline: query
/// processing, LLM generation, response shaping, and conversation
/// management. Every query returns a `RagResult`; failures are captured
/// into the result rather than propagated.
pub struct RagEngine {
    query_processor: QueryProcessor,
    llm: Arc<dyn LlmClient>,
    conversations: ConversationStore,
    generator: ResponseGenerator,
    config: RagConfig,
    stats: RagStats,
}

impl RagEngine {
    pub fn new(
        query_processor: QueryProcessor,
        llm: Arc<dyn LlmClient>,
        conversations: ConversationStore,
        config: RagConfig,
    ) -> Self {
        let generator = ResponseGenerator::new(config.include_confidence, config.suggest_external);
        Self {
            query_processor,
            llm,
            conversations,
            generator,
            config,
            stats: RagStats::default(),
        }
    }

    /// Process a user query through the complete pipeline.
    pub async fn query(
        &mut self,
        query: &str,
        conversation_id: Option<&str>,
        system_prompt: Option<&str>,
    ) -> RagResult {
        let started = Instant::now();
        let conversation_id = self.ensure_conversation(conversation_id, system_prompt);

        match self.run_query(query, &conversation_id).await {
            Ok(result) => {
                self.stats.update(&result);
                result
            }
            Err(e) => {
                let result = RagResult {
                    query: query.to_string(),
                    response: FormattedResponse {
                        content: format!("❌ 處理查詢時發生錯誤：{e}"),
                        citations: Vec::new(),
                        has_local_data: false,
                        confidence: None,
                    },
                    conversation_id,
                    turn_count: 0,
                    processing_time: started.elapsed().as_secs_f64(),
                    has_local_data: false,
                    retrieved_chunks_count: 0,
                    llm_tokens_used: 0,
                    error: Some(e.to_string()),
                };
                self.stats.update(&result);
                result
            }
        }
    }

    async fn run_query(&mut self, query: &str, conversation_id: &str) -> Result<RagResult> {
        let started = Instant::now();

        // Recent history snippet for query expansion.
        let history = self.history_snippet(conversation_id);
        let context = self
            .query_processor
            .process_query(query, history.as_deref())
            .await?;

        if !context.has_results() {
            debug!(query = %context.query, "no local data for query");
            let response = self.generator.format_no_results_response(&context.query);
            let turn_count = self
                .conversations
                .get(conversation_id)
                .map(|c| c.turn_count)
                .unwrap_or(0);
            let result = RagResult {
                query: context.query,
                response,
                conversation_id: conversation_id.to_string(),
                turn_count,
                processing_time: started.elapsed().as_secs_f64(),
                has_local_data: false,
                retrieved_chunks_count: 0,
                llm_tokens_used: 0,
                error: None,
            };
            return Ok(result);
        }

        // Assemble LLM messages: bounded recall + context-bearing query.
        let (llm_response, tokens_used) = self.generate(&context, conversation_id).await?;
        let formatted = self
            .generator
            .format_response(&llm_response, &context, true);

        // Record the exchange.
        let turn_count = match self.conversations.get(conversation_id) {
            Some(conversation) => {
                conversation.add_message(LlmMessage::new(Role::User, context.query.clone()));
                conversation
                    .add_message(LlmMessage::new(Role::Assistant, formatted.content.clone()));
                conversation.turn_count
            }
            None => 0,
        };
        self.conversations.save(conversation_id);

        info!(
            query = %context.query,
            chunks = context.retrieved_chunks.len(),
            tokens = tokens_used,
            "rag query complete"
        );

        Ok(RagResult {
            query: context.query.clone(),
            retrieved_chunks_count: context.retrieved_chunks.len(),
            response: formatted,
            conversation_id: conversation_id.to_string(),
            turn_count,
            processing_time: started.elapsed().as_secs_f64(),
            has_local_data: true,
            llm_tokens_used: tokens_used,
            error: None,
        })
    }

    /// Generate a summary for one document's retrieved content.
    pub async fn summarize_document(
        &mut self,
        document_path: &str,
        conversation_id: Option<&str>,
    ) -> RagResult {
        let started = Instant::now();
        let conversation_id =
            self.ensure_conversation(conversation_id, Some(PromptTemplate::SYSTEM_SUMMARY));

        let outcome: Result<RagResult> = async {
            let context = self
                .query_processor
                .process_query(document_path, None)
                .await?;

            if !context.has_results() {
                let response = self.generator.format_no_results_response(document_path);
                return Ok(RagResult {
                    query: format!("摘要: {document_path}"),
                    response,
                    conversation_id: conversation_id.clone(),
                    turn_count: 0,
                    processing_time: started.elapsed().as_secs_f64(),
                    has_local_data: false,
                    retrieved_chunks_count: 0,
                    llm_tokens_used: 0,
                    error: None,
                });
            }

            let mut messages = self
                .conversations
                .get(&conversation_id)
                .map(|c| c.get_messages(Some(self.config.max_conversation_tokens)))
                .unwrap_or_default();
            messages.push(LlmMessage::new(
                Role::User,
                PromptTemplate::format_summary_prompt(document_path, &context.context_text),
            ));

            let response = self
                .llm
                .generate(&messages, self.config.max_llm_tokens, self.config.temperature)
                .await?;

            let formatted = self.generator.format_summary_response(
                &response.content,
                document_path,
                context.retrieved_chunks.len(),
            );

            let turn_count = self
                .conversations
                .get(&conversation_id)
                .map(|c| c.turn_count)
                .unwrap_or(0);

            Ok(RagResult {
                query: format!("摘要: {document_path}"),
                response: formatted,
                conversation_id: conversation_id.clone(),
                turn_count,
                processing_time: started.elapsed().as_secs_f64(),
                has_local_data: true,
                retrieved_chunks_count: context.retrieved_chunks.len(),
                llm_tokens_used: response.tokens_used,
                error: None,
            })
        }
        .await;

        let result = outcome.unwrap_or_else(|e| RagResult {
            query: format!("摘要: {document_path}"),
            response: FormattedResponse {
                content: format!("❌ 生成摘要時發生錯誤：{e}"),
                citations: Vec::new(),
                has_local_data: false,
                confidence: None,
            },
            conversation_id: conversation_id.clone(),
            turn_count: 0,
            processing_time: started.elapsed().as_secs_f64(),
            has_local_data: false,
            retrieved_chunks_count: 0,
            llm_tokens_used: 0,
            error: Some(e.to_string()),
        });
        self.stats.update(&result);
        result
    }

    /// Clear a conversation's history.
    pub fn clear_conversation(&mut self, conversation_id: &str, keep_system: bool) {
        if let Some(conversation) = self.conversations.get(conversation_id) {
            conversation.clear_history(keep_system);
        }
        self.conversations.save(conversation_id);
    }

    pub fn stats(&self) -> &RagStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RagStats::default();
    }

    pub fn conversations(&mut self) -> &mut ConversationStore {
        &mut self.conversations
    }

    /// Resolve or create the conversation, returning its id.
    fn ensure_conversation(
        &mut self,
        conversation_id: Option<&str>,
        system_prompt: Option<&str>,
    ) -> String {
        if let Some(id) = conversation_id {
            if self.conversations.get(id).is_some() {
                return id.to_string();
            }
            let system = system_prompt.unwrap_or(PromptTemplate::SYSTEM_RAG);
            self.conversations.create(id, Some(system), None);
            return id.to_string();
        }

        let id = generate_conversation_id();
        let system = system_prompt.unwrap_or(PromptTemplate::SYSTEM_RAG);
        self.conversations.create(&id, Some(system), None);
        id
    }

    /// Contents of the last few non-system messages, oldest first.
    fn history_snippet(&mut self, conversation_id: &str) -> Option<Vec<String>> {
        let conversation = self.conversations.get(conversation_id)?;
        if conversation.turn_count == 0 {
            return None;
        }
        let recent: Vec<String> = conversation
            .get_messages(Some(500))
            .into_iter()
            .filter(|m| m.role != Role::System)
            .map(|m| m.content)
            .collect();
        if recent.is_empty() {
            return None;
        }
        let start = recent.len().saturating_sub(4);
        Some(recent[start..].to_vec())
    }

    async fn generate(
        &mut self,
        context: &QueryContext,
        conversation_id: &str,
    ) -> Result<(String, usize)> {
        let mut messages = self
            .conversations
            .get(conversation_id)
            .map(|c| c.get_messages(Some(self.config.max_conversation_tokens)))
            .unwrap_or_default();

        messages.push(LlmMessage::new(
            Role::User,
            PromptTemplate::format_rag_prompt(&context.query, &context.context_text),
        ));

        let response = self
            .llm
            .generate(&messages, self.config.max_llm_tokens, self.config.temperature)
            .await?;

        Ok((response.content, response.tokens_used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = generate_conversation_id();
        let b = generate_conversation_id();
        assert!(a.starts_with("rag-"));
        assert_ne!(a, b);
    }

    #[test]
    fn stats_update_counts_success_and_failure() {
        let mut stats = RagStats::default();
        let ok = RagResult {
            query: "q".into(),
            response: FormattedResponse {
                content: "a".into(),
                citations: vec![],
                has_local_data: true,
                confidence: None,
            },
            conversation_id: "c".into(),
            turn_count: 1,
            processing_time: 0.5,
            has_local_data: true,
            retrieved_chunks_count: 3,
            llm_tokens_used: 42,
            error: None,
        };
        let mut failed = ok.clone();
        failed.error = Some("boom".into());
        failed.processing_time = 1.5;

        stats.update(&ok);
        stats.update(&failed);

        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.failed_queries, 1);
        assert!((stats.average_processing_time - 1.0).abs() < 1e-9);
        assert_eq!(stats.total_chunks_retrieved, 6);
        assert_eq!(stats.total_tokens_used, 84);
    }

    #[test]
    fn default_rag_config_matches_contract() {
        let config = RagConfig::default();
        assert_eq!(config.max_results, 5);
        assert_eq!(config.min_score, 0.3);
        assert_eq!(config.max_context_tokens, 2000);
        assert_eq!(config.max_conversation_tokens, 4000);
    }
}
