pub mod chunker;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod ocr;
pub mod parser;
pub mod rag;
pub mod scanner;
pub mod snapshot;

pub use error::Error;

// Re-export key public types for convenience.
pub use config::{Config, EmbeddingProviderType, LlmProviderType};
pub use document::{Document, DocumentChunk, DocumentMetadata, DocumentStatus, RelationKind, Relationship};
pub use graph::{DocumentGraph, GraphAnalyzer, GraphBuilder, GraphExporter};
pub use index::{IndexStatus, VectorIndex};
pub use ingest::{IngestPipeline, ProcessingStats};
pub use rag::{RagConfig, RagEngine, RagResult, RagStats};
pub use snapshot::{ImportResult, SnapshotExporter, SnapshotImporter, SourceVerifier, VerificationReport};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::embedding::{create_provider, EmbeddingProvider};
use crate::ingest::ProgressFn;
use crate::ocr::{NoopRecognizer, TextRecognizer};
use crate::rag::conversation::ConversationStore;
use crate::rag::llm::{create_llm_client, LlmClient};
use crate::rag::query::QueryProcessor;

/// Status snapshot of an engine instance.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub document_count: usize,
    pub chunk_count: usize,
    pub relationship_count: usize,
    pub index: IndexStatus,
}

/// Primary library handle for the knowledge-base engine.
///
/// Owns the configuration, the embedding/LLM/OCR ports, the persistent
/// vector index, the ingestion pipeline with its document registry, and
/// the RAG engine. No module-level singletons; everything is reachable
/// from here.
pub struct KnowledgeEngine {
    root: PathBuf,
    config: Config,
    index: Arc<VectorIndex>,
    pipeline: IngestPipeline,
    rag: RagEngine,
}

impl KnowledgeEngine {
    /// Open an engine rooted at the given directory, loading config from
    /// `.vaultkb` / environment.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!("cannot canonicalize root '{}': {e}", root.display()))
        })?;
        let config = Config::load(&root)?;
        Self::open_with_config(root, config)
    }

    /// Open with an explicit configuration; ports are created from it.
    pub fn open_with_config(root: PathBuf, config: Config) -> Result<Self> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config)?);
        let llm: Arc<dyn LlmClient> = Arc::from(create_llm_client(&config)?);
        let recognizer: Arc<dyn TextRecognizer> = Arc::new(NoopRecognizer);
        Self::open_with_ports(root, config, provider, llm, recognizer)
    }

    /// Open with explicitly injected ports (tests, custom backends).
    pub fn open_with_ports(
        root: PathBuf,
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LlmClient>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Result<Self> {
        let index_dir = if config.index_dir.is_absolute() {
            config.index_dir.clone()
        } else {
            root.join(&config.index_dir)
        };
        let index = Arc::new(VectorIndex::open_or_create(
            &index_dir,
            config.embedding_dimensions,
        )?);

        let pipeline = IngestPipeline::new(
            Arc::clone(&index),
            Arc::clone(&provider),
            recognizer,
            &config,
        );

        let conversation_dir = config.conversation_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                root.join(dir)
            }
        });
        let conversations = ConversationStore::new(conversation_dir);
        let query_processor =
            QueryProcessor::from_config(Arc::clone(&index), Arc::clone(&provider), &config);
        let rag = RagEngine::new(
            query_processor,
            llm,
            conversations,
            RagConfig::from_config(&config),
        );

        info!(
            root = %root.display(),
            provider = provider.name(),
            dimensions = config.embedding_dimensions,
            "opened knowledge engine"
        );

        Ok(Self {
            root,
            config,
            index,
            pipeline,
            rag,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// The document registry, keyed by doc id.
    pub fn documents(&self) -> &HashMap<String, Document> {
        self.pipeline.registry()
    }

    /// Ingest one or more folders of notes.
    pub async fn ingest(
        &mut self,
        folders: &[PathBuf],
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> ProcessingStats {
        self.pipeline.process_folders(folders, force, progress).await
    }

    /// Answer a question over the indexed corpus.
    pub async fn ask(&mut self, query: &str, conversation_id: Option<&str>) -> RagResult {
        self.rag.query(query, conversation_id, None).await
    }

    /// Summarize one document's indexed content.
    pub async fn summarize(&mut self, document_path: &str, conversation_id: Option<&str>) -> RagResult {
        self.rag.summarize_document(document_path, conversation_id).await
    }

    /// Rolling RAG statistics.
    pub fn rag_stats(&self) -> &RagStats {
        self.rag.stats()
    }

    /// Direct access to the RAG engine (conversation management).
    pub fn rag(&mut self) -> &mut RagEngine {
        &mut self.rag
    }

    /// Build the weighted document graph from the current registry.
    pub fn build_graph(&self) -> DocumentGraph {
        let builder = GraphBuilder::from_config(&self.config);

        let mut docs: Vec<&Document> = self.pipeline.registry().values().collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

        let embeddings: HashMap<String, Vec<f32>> = docs
            .iter()
            .filter_map(|d| d.embedding.clone().map(|e| (d.doc_id.clone(), e)))
            .collect();

        builder.build_graph(&docs, Some(&embeddings))
    }

    /// Export the knowledge base as a portable snapshot.
    pub fn export_snapshot(
        &self,
        export_dir: &Path,
        source_folders: Option<Vec<String>>,
        create_archive: bool,
    ) -> Result<PathBuf> {
        let exporter = SnapshotExporter::new(Arc::clone(&self.index), export_dir.to_path_buf())?;

        let mut docs: Vec<&Document> = self.pipeline.registry().values().collect();
        docs.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));

        let folders = source_folders.unwrap_or_else(|| self.known_source_folders());
        exporter.export_all(&docs, &folders, create_archive)
    }

    /// Import a snapshot, replacing the registry and the vector index.
    pub fn import_snapshot(&mut self, source: &Path) -> ImportResult {
        let importer = SnapshotImporter::new(Arc::clone(&self.index), source.to_path_buf());
        let (result, documents) = importer.import_all();

        if result.imported_documents > 0 {
            let registry: HashMap<String, Document> = documents
                .into_iter()
                .map(|d| (d.doc_id.clone(), d))
                .collect();
            self.pipeline.set_registry(registry);
        }
        result
    }

    /// Verify source-folder availability, freezing and thawing documents.
    pub fn verify_sources(&mut self, source_folders: Option<Vec<String>>) -> VerificationReport {
        let folders = source_folders.unwrap_or_else(|| self.known_source_folders());
        let verifier = SourceVerifier::new();
        verifier.verify(self.pipeline.registry_mut().values_mut(), &folders)
    }

    /// Engine status: registry counts plus the index snapshot.
    pub fn status(&self) -> EngineStatus {
        let registry = self.pipeline.registry();
        EngineStatus {
            document_count: registry.len(),
            chunk_count: registry.values().map(|d| d.chunks.len()).sum(),
            relationship_count: registry.values().map(|d| d.relationships.len()).sum(),
            index: self.index.status(),
        }
    }

    /// Distinct source folders recorded on registry documents, sorted.
    fn known_source_folders(&self) -> Vec<String> {
        let mut folders: Vec<String> = self
            .pipeline
            .registry()
            .values()
            .map(|d| d.source_folder.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();
        folders.sort();
        folders
    }
}
