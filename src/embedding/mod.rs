pub mod cache;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;

pub use cache::{CachedProvider, EmbeddingCache};
pub use mock::MockProvider;
pub use provider::{create_provider, EmbeddingProvider};
