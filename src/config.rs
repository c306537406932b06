use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;

/// Supported embedding provider backends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EmbeddingProviderType {
    OpenAI,
    Ollama,
    Mock,
}

impl FromStr for EmbeddingProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            other => Err(Error::Config(format!(
                "unknown embedding provider '{other}': expected openai, ollama, or mock"
            ))),
        }
    }
}

/// Supported LLM backends for answer generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LlmProviderType {
    Ollama,
    Mock,
}

impl FromStr for LlmProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "mock" => Ok(Self::Mock),
            other => Err(Error::Config(format!(
                "unknown llm provider '{other}': expected ollama or mock"
            ))),
        }
    }
}

/// Full configuration for vaultkb, loaded from environment / `.vaultkb` file / defaults.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // Embedding port
    pub embedding_provider: EmbeddingProviderType,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_batch_size: usize,
    pub embedding_cache_dir: Option<PathBuf>,
    pub openai_api_key: Option<String>,
    pub ollama_host: String,

    // LLM port
    pub llm_provider: LlmProviderType,
    pub llm_model: String,
    pub max_llm_tokens: usize,
    pub temperature: f64,

    // Scanning
    pub file_patterns: Vec<String>,

    // Chunking
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub preserve_code_blocks: bool,

    // Ingestion
    pub max_workers: usize,

    // Vector index persistence (a directory owned by the backend)
    pub index_dir: PathBuf,

    // Retrieval
    pub max_results: usize,
    pub min_score: f64,
    pub max_context_tokens: usize,

    // Conversations
    pub max_conversation_tokens: usize,
    pub conversation_dir: Option<PathBuf>,

    // Graph construction
    pub min_edge_weight: f64,
    pub max_edges_per_node: usize,
    pub keyword_min_length: usize,

    // Response shaping
    pub suggest_external: bool,
    pub include_confidence: bool,
}

impl Config {
    /// Load configuration with priority: shell env > `.vaultkb` file > `.env` file > built-in defaults.
    pub fn load(project_root: &Path) -> Result<Self, Error> {
        // dotenvy::from_path does NOT override existing env vars,
        // so shell env always takes priority.
        let _ = dotenvy::from_path(project_root.join(".vaultkb"));
        let _ = dotenvy::from_path(project_root.join(".env"));

        let embedding_provider =
            env_or_default("VAULTKB_EMBEDDING_PROVIDER", "mock").parse::<EmbeddingProviderType>()?;
        let embedding_model = env_or_default(
            "VAULTKB_EMBEDDING_MODEL",
            "paraphrase-multilingual-minilm-l12-v2",
        );
        let embedding_dimensions = parse_env::<usize>("VAULTKB_EMBEDDING_DIMENSIONS", 384)?;
        let embedding_batch_size = parse_env::<usize>("VAULTKB_EMBEDDING_BATCH_SIZE", 32)?;
        // Explicit dir wins; otherwise an opt-in flag uses the platform
        // cache directory.
        let embedding_cache_dir = match std::env::var("VAULTKB_EMBEDDING_CACHE_DIR") {
            Ok(dir) => Some(PathBuf::from(dir)),
            Err(_) => {
                if parse_env_bool("VAULTKB_EMBEDDING_CACHE", false)? {
                    dirs::cache_dir().map(|d| d.join("vaultkb").join("embeddings"))
                } else {
                    None
                }
            }
        };
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let ollama_host = env_or_default("OLLAMA_HOST", "http://localhost:11434");

        let llm_provider =
            env_or_default("VAULTKB_LLM_PROVIDER", "mock").parse::<LlmProviderType>()?;
        let llm_model = env_or_default("VAULTKB_LLM_MODEL", "llama3");
        let max_llm_tokens = parse_env::<usize>("VAULTKB_MAX_LLM_TOKENS", 1000)?;
        let temperature = parse_env::<f64>("VAULTKB_TEMPERATURE", 0.7)?;

        let file_patterns = parse_comma_list_string(
            "VAULTKB_FILE_PATTERNS",
            vec![
                "*.md".to_string(),
                "*.jpg".to_string(),
                "*.jpeg".to_string(),
                "*.png".to_string(),
            ],
        );

        let chunk_size = parse_env::<usize>("VAULTKB_CHUNK_SIZE", 512)?;
        let chunk_overlap = parse_env::<usize>("VAULTKB_CHUNK_OVERLAP", 102)?;
        let preserve_code_blocks = parse_env_bool("VAULTKB_PRESERVE_CODE_BLOCKS", true)?;

        let max_workers = parse_env::<usize>("VAULTKB_MAX_WORKERS", 4)?;

        let index_dir = PathBuf::from(env_or_default(
            "VAULTKB_INDEX_DIR",
            ".vaultkb/vector_db",
        ));

        let max_results = parse_env::<usize>("VAULTKB_MAX_RESULTS", 5)?;
        let min_score = parse_env::<f64>("VAULTKB_MIN_SCORE", 0.3)?;
        let max_context_tokens = parse_env::<usize>("VAULTKB_MAX_CONTEXT_TOKENS", 2000)?;

        let max_conversation_tokens = parse_env::<usize>("VAULTKB_MAX_CONVERSATION_TOKENS", 4000)?;
        let conversation_dir = std::env::var("VAULTKB_CONVERSATION_DIR")
            .ok()
            .map(PathBuf::from);

        let min_edge_weight = parse_env::<f64>("VAULTKB_MIN_EDGE_WEIGHT", 0.1)?;
        let max_edges_per_node = parse_env::<usize>("VAULTKB_MAX_EDGES_PER_NODE", 20)?;
        let keyword_min_length = parse_env::<usize>("VAULTKB_KEYWORD_MIN_LENGTH", 3)?;

        let suggest_external = parse_env_bool("VAULTKB_SUGGEST_EXTERNAL", true)?;
        let include_confidence = parse_env_bool("VAULTKB_INCLUDE_CONFIDENCE", true)?;

        let config = Self {
            embedding_provider,
            embedding_model,
            embedding_dimensions,
            embedding_batch_size,
            embedding_cache_dir,
            openai_api_key,
            ollama_host,
            llm_provider,
            llm_model,
            max_llm_tokens,
            temperature,
            file_patterns,
            chunk_size,
            chunk_overlap,
            preserve_code_blocks,
            max_workers,
            index_dir,
            max_results,
            min_score,
            max_context_tokens,
            max_conversation_tokens,
            conversation_dir,
            min_edge_weight,
            max_edges_per_node,
            keyword_min_length,
            suggest_external,
            include_confidence,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate constraint invariants on the loaded config.
    fn validate(&self) -> Result<(), Error> {
        if self.embedding_dimensions == 0 {
            return Err(Error::Config("embedding_dimensions must be > 0".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(Error::Config("embedding_batch_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::Config(format!(
                "min_score ({}) must be in [0.0, 1.0]",
                self.min_score
            )));
        }
        if !(0.0..=1.0).contains(&self.min_edge_weight) {
            return Err(Error::Config(format!(
                "min_edge_weight ({}) must be in [0.0, 1.0]",
                self.min_edge_weight
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::Config(format!(
                "temperature ({}) must be in [0.0, 2.0]",
                self.temperature
            )));
        }
        Ok(())
    }

    /// A config suitable for tests: mock ports, small dimensions, no persistence dirs.
    pub fn for_tests(dimensions: usize) -> Self {
        Self {
            embedding_provider: EmbeddingProviderType::Mock,
            embedding_model: "mock-model".into(),
            embedding_dimensions: dimensions,
            embedding_batch_size: 32,
            embedding_cache_dir: None,
            openai_api_key: None,
            ollama_host: "http://localhost:11434".into(),
            llm_provider: LlmProviderType::Mock,
            llm_model: "mock-llm".into(),
            max_llm_tokens: 1000,
            temperature: 0.7,
            file_patterns: vec![
                "*.md".into(),
                "*.jpg".into(),
                "*.jpeg".into(),
                "*.png".into(),
            ],
            chunk_size: 512,
            chunk_overlap: 102,
            preserve_code_blocks: true,
            max_workers: 4,
            index_dir: PathBuf::from(".vaultkb/vector_db"),
            max_results: 5,
            min_score: 0.3,
            max_context_tokens: 2000,
            max_conversation_tokens: 4000,
            conversation_dir: None,
            min_edge_weight: 0.1,
            max_edges_per_node: 20,
            keyword_min_length: 3,
            suggest_external: true,
            include_confidence: true,
        }
    }
}

/// Read an env var or return a default string value.
fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var into a typed value, using a default if not set.
fn parse_env<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| Error::Config(format!("failed to parse {key}='{val}': {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean env var (true/false/1/0/yes/no).
fn parse_env_bool(key: &str, default: bool) -> Result<bool, Error> {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::Config(format!(
                "failed to parse {key}='{val}': expected true/false/1/0/yes/no"
            ))),
        },
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated env var into Vec<String>, trimming whitespace.
fn parse_comma_list_string(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default,
    }
}
