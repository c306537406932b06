use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{Config, LlmProviderType};
use crate::error::Error;

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: Role,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Response from an LLM backend.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub tokens_used: usize,
    pub finish_reason: String,
}

/// Port for answer generation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a response from the conversation messages.
    async fn generate(
        &self,
        messages: &[LlmMessage],
        max_tokens: usize,
        temperature: f64,
    ) -> crate::Result<LlmResponse>;

    /// Count tokens in a text (estimator quality is backend-defined).
    fn count_tokens(&self, text: &str) -> usize;

    /// Model identifier.
    fn model(&self) -> &str;
}

/// Create an LLM client from the configuration.
pub fn create_llm_client(config: &Config) -> crate::Result<Box<dyn LlmClient>> {
    match config.llm_provider {
        LlmProviderType::Ollama => Ok(Box::new(OllamaLlmClient::new(
            config.ollama_host.clone(),
            config.llm_model.clone(),
        ))),
        LlmProviderType::Mock => Ok(Box::new(MockLlmClient::new(
            config.llm_model.clone(),
            Vec::new(),
            None,
        ))),
    }
}

/// Deterministic LLM client for tests: walks through the scripted
/// responses in order, then answers with the default string. Records
/// every call for inspection.
pub struct MockLlmClient {
    model: String,
    responses: Vec<String>,
    default_response: String,
    call_count: AtomicUsize,
    history: Mutex<Vec<Vec<LlmMessage>>>,
}

impl MockLlmClient {
    pub fn new(model: String, responses: Vec<String>, default_response: Option<String>) -> Self {
        Self {
            model,
            responses,
            default_response: default_response.unwrap_or_else(|| "這是一個測試回應。".to_string()),
            call_count: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Messages of every `generate` call so far.
    pub fn call_history(&self) -> Vec<Vec<LlmMessage>> {
        self.history.lock().clone()
    }

    /// Reset the call counter and recorded history.
    pub fn reset(&self) {
        self.call_count.store(0, Ordering::SeqCst);
        self.history.lock().clear();
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        _max_tokens: usize,
        _temperature: f64,
    ) -> crate::Result<LlmResponse> {
        self.history.lock().push(messages.to_vec());
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);

        let content = self
            .responses
            .get(call)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone());

        let tokens_used = content.chars().count() / 4;
        Ok(LlmResponse {
            content,
            model: self.model.clone(),
            tokens_used,
            finish_reason: "stop".into(),
        })
    }

    fn count_tokens(&self, text: &str) -> usize {
        (text.chars().count() / 4).max(1)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Ollama chat client.
pub struct OllamaLlmClient {
    client: reqwest::Client,
    host: String,
    model: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
    #[serde(default)]
    eval_count: usize,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

impl OllamaLlmClient {
    pub fn new(host: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            host,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    async fn generate(
        &self,
        messages: &[LlmMessage],
        max_tokens: usize,
        temperature: f64,
    ) -> crate::Result<LlmResponse> {
        let url = format!("{}/api/chat", self.host.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": temperature,
                "num_predict": max_tokens,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::LlmProvider(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::LlmProvider(format!(
                "ollama returned {status}: {detail}"
            )));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LlmProvider(format!("ollama response parse: {e}")))?;

        Ok(LlmResponse {
            content: parsed.message.content,
            model: self.model.clone(),
            tokens_used: parsed.eval_count,
            finish_reason: parsed.done_reason.unwrap_or_else(|| "stop".into()),
        })
    }

    fn count_tokens(&self, text: &str) -> usize {
        (text.chars().count() / 4).max(1)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Prompt templates for the RAG flows.
pub struct PromptTemplate;

impl PromptTemplate {
    /// System prompt for retrieval-augmented answering.
    pub const SYSTEM_RAG: &'static str = "\
你是一個智能助手，專門幫助用戶從他們的個人知識庫中查找和理解資訊。

你的任務：
1. 根據提供的上下文（Context）回答用戶的問題
2. 回答時必須引用來源，使用 [來源 N] 的格式
3. 如果上下文中沒有相關資訊，請明確告知用戶
4. 回答要準確、簡潔、有幫助
5. 支援繁體中文和英文

重要規則：
- 只使用提供的上下文回答，不要編造資訊
- 如果不確定，請說「我不確定」
- 引用來源時要具體（檔名和位置）";

    /// System prompt for document summarization.
    pub const SYSTEM_SUMMARY: &'static str = "\
你是一個專業的內容摘要助手。

你的任務：
1. 閱讀提供的文件內容
2. 生成簡潔、準確的摘要
3. 保留關鍵資訊和重點
4. 使用清晰的結構（如標題、列表）
5. 支援繁體中文和英文";

    /// User prompt combining retrieved context and the question.
    pub fn format_rag_prompt(query: &str, context: &str) -> String {
        format!(
            "請根據以下上下文回答問題。\n\n【上下文】\n{context}\n\n【問題】\n{query}\n\n【回答】\n\
             請根據上下文回答問題，並引用來源。如果上下文中沒有相關資訊，\
             請說「根據本機知識庫中的資料，我找不到相關資訊。」"
        )
    }

    /// Summary-generation prompt.
    pub fn format_summary_prompt(title: &str, content: &str) -> String {
        format!(
            "請為以下文件生成摘要。\n\n【文件標題】\n{title}\n\n【文件內容】\n{content}\n\n\
             【摘要要求】\n1. 簡潔明瞭（100-300字）\n2. 包含主要重點\n3. 保留關鍵資訊\n\
             4. 使用清晰的結構\n\n【摘要】"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_walks_scripted_responses_then_default() {
        let llm = MockLlmClient::new(
            "mock".into(),
            vec!["first".into(), "second".into()],
            Some("fallback".into()),
        );
        let messages = vec![LlmMessage::new(Role::User, "hi")];

        let r1 = llm.generate(&messages, 100, 0.7).await.unwrap();
        let r2 = llm.generate(&messages, 100, 0.7).await.unwrap();
        let r3 = llm.generate(&messages, 100, 0.7).await.unwrap();
        let r4 = llm.generate(&messages, 100, 0.7).await.unwrap();

        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(r3.content, "fallback");
        assert_eq!(r4.content, "fallback");
        assert_eq!(llm.call_count(), 4);
    }

    #[tokio::test]
    async fn mock_records_history_and_resets() {
        let llm = MockLlmClient::new("mock".into(), vec![], None);
        let messages = vec![
            LlmMessage::new(Role::System, "sys"),
            LlmMessage::new(Role::User, "question"),
        ];
        llm.generate(&messages, 100, 0.7).await.unwrap();

        let history = llm.call_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].len(), 2);
        assert_eq!(history[0][1].content, "question");

        llm.reset();
        assert_eq!(llm.call_count(), 0);
        assert!(llm.call_history().is_empty());
    }

    #[test]
    fn count_tokens_quarter_estimate() {
        let llm = MockLlmClient::new("mock".into(), vec![], None);
        assert_eq!(llm.count_tokens("12345678"), 2);
        assert_eq!(llm.count_tokens(""), 1);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(role, Role::System);
    }

    #[test]
    fn rag_prompt_embeds_query_and_context() {
        let prompt = PromptTemplate::format_rag_prompt("什麼是所有權？", "一些上下文");
        assert!(prompt.contains("什麼是所有權？"));
        assert!(prompt.contains("一些上下文"));
    }

    #[test]
    fn factory_creates_mock() {
        let config = Config::for_tests(8);
        let client = create_llm_client(&config).unwrap();
        assert_eq!(client.model(), "mock-llm");
    }
}
