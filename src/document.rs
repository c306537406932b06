use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Status of a document in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Queued for processing.
    Pending,
    /// Indexed and its source folder is reachable.
    Active,
    /// Retained in the registry and index, but the owning source folder
    /// is unreachable at the latest verification.
    Frozen,
    /// Processing failed.
    Error,
}

/// Kind of relationship between two documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Wikilink,
    WikilinkHeader,
    Similarity,
    Keyword,
}

/// An outbound edge from one document to another.
///
/// `strength` combines the component scores as
/// `0.3·keyword + 0.5·vector + 0.2·manual_link`; the manual-link component
/// is the wikilink signal (1.0 for explicit links).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub source_doc_id: String,
    pub target_doc_id: String,
    #[serde(rename = "relationship_type")]
    pub kind: RelationKind,
    pub strength: f64,
    pub keyword_score: f64,
    pub vector_score: f64,
    pub manual_link_score: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Relationship {
    pub fn new(source_doc_id: String, target_doc_id: String, kind: RelationKind) -> Self {
        Self {
            source_doc_id,
            target_doc_id,
            kind,
            strength: 0.0,
            keyword_score: 0.0,
            vector_score: 0.0,
            manual_link_score: 0.0,
            metadata: serde_json::Map::new(),
        }
    }

    /// Recompute `strength` from the component scores.
    pub fn calculate_strength(&mut self) {
        self.strength = self.keyword_score * 0.3
            + self.vector_score * 0.5
            + self.manual_link_score * 0.2;
    }
}

/// A chunk of document content mirrored into the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `{stem}_{index}` — also the row id in the vector index.
    pub chunk_id: String,
    /// Back-reference to the owning document.
    pub document_id: String,
    pub content: String,
    /// Approximate 1-based start line in the source text.
    pub start_line: usize,
    /// Approximate 1-based end line in the source text.
    pub end_line: usize,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Embedding vector; carried in memory only, the vector index owns
    /// the persistent copy.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// Metadata extracted from frontmatter and content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub headings: Vec<String>,
    #[serde(default)]
    pub word_count: usize,
    /// Frontmatter fields the engine does not interpret.
    #[serde(default)]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
}

/// A complete document in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier derived from the absolute path.
    pub doc_id: String,
    /// Absolute path to the source file.
    pub file_path: PathBuf,
    /// Path relative to the source folder.
    pub relative_path: PathBuf,
    /// The source folder this document belongs to.
    pub source_folder: String,
    pub raw_content: String,
    /// Content after Obsidian syntax degradation.
    pub parsed_content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub chunks: Vec<DocumentChunk>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    pub status: DocumentStatus,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_hash: String,
    /// Unix seconds of the last successful indexing pass.
    #[serde(default)]
    pub last_indexed: Option<u64>,
    /// Mean of the chunk embeddings; in-memory only.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    /// Title with the filename stem as fallback.
    pub fn title(&self) -> String {
        self.metadata
            .title
            .clone()
            .or_else(|| {
                self.file_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| self.doc_id.clone())
    }

    /// Filename stem of the source file.
    pub fn stem(&self) -> String {
        self.file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Frozen).unwrap(),
            "\"frozen\""
        );
        assert_eq!(
            serde_json::to_string(&DocumentStatus::Active).unwrap(),
            "\"active\""
        );
        let status: DocumentStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(status, DocumentStatus::Pending);
    }

    #[test]
    fn relation_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RelationKind::WikilinkHeader).unwrap(),
            "\"wikilink_header\""
        );
    }

    #[test]
    fn strength_formula() {
        let mut rel = Relationship::new("a".into(), "b".into(), RelationKind::Wikilink);
        rel.keyword_score = 0.6;
        rel.vector_score = 0.8;
        rel.manual_link_score = 1.0;
        rel.calculate_strength();
        let expected = 0.6 * 0.3 + 0.8 * 0.5 + 1.0 * 0.2;
        assert!((rel.strength - expected).abs() < 1e-12);
    }

    #[test]
    fn relationship_serde_uses_relationship_type_key() {
        let rel = Relationship::new("a".into(), "b".into(), RelationKind::Similarity);
        let json = serde_json::to_string(&rel).unwrap();
        assert!(json.contains("\"relationship_type\":\"similarity\""));
    }

    #[test]
    fn chunk_embedding_not_serialized() {
        let chunk = DocumentChunk {
            chunk_id: "a_0".into(),
            document_id: "a".into(),
            content: "text".into(),
            start_line: 1,
            end_line: 2,
            metadata: serde_json::Map::new(),
            embedding: Some(vec![0.1, 0.2]),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("embedding"));
        let back: DocumentChunk = serde_json::from_str(&json).unwrap();
        assert!(back.embedding.is_none());
    }

    #[test]
    fn document_title_falls_back_to_stem() {
        let doc = Document {
            doc_id: "/vault/notes/rust-notes.md".into(),
            file_path: PathBuf::from("/vault/notes/rust-notes.md"),
            relative_path: PathBuf::from("notes/rust-notes.md"),
            source_folder: "/vault".into(),
            raw_content: String::new(),
            parsed_content: String::new(),
            metadata: DocumentMetadata::default(),
            chunks: vec![],
            relationships: vec![],
            status: DocumentStatus::Active,
            file_size: 0,
            file_hash: String::new(),
            last_indexed: None,
            embedding: None,
        };
        assert_eq!(doc.title(), "rust-notes");
        assert_eq!(doc.stem(), "rust-notes");
    }
}
