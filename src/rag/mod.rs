pub mod conversation;
pub mod engine;
pub mod llm;
pub mod query;
pub mod response;

pub use conversation::{Conversation, ConversationStore};
pub use engine::{RagConfig, RagEngine, RagResult, RagStats};
pub use llm::{create_llm_client, LlmClient, LlmMessage, LlmResponse, MockLlmClient, Role};
pub use query::{QueryContext, QueryProcessor, RetrievalResult};
pub use response::{Citation, Confidence, FormattedResponse, ResponseGenerator};
