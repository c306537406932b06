use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunker::Chunker;
use crate::config::Config;
use crate::document::{
    Document, DocumentChunk, DocumentMetadata, DocumentStatus, RelationKind, Relationship,
};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::ocr::TextRecognizer;
use crate::parser::{Parser, WikiLinkKind};
use crate::scanner::{ChangeKind, FileChange, FileScanner};

/// Progress callback: `(completed, total, path)`. Invoked from the
/// collector only, so calls are serialized.
pub type ProgressFn = dyn Fn(usize, usize, &Path) + Send + Sync;

/// A single per-file ingestion failure.
#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub path: String,
    pub error: String,
}

/// Statistics from one `process_folders` batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub total_files: usize,
    pub new_files: usize,
    pub modified_files: usize,
    pub deleted_files: usize,
    pub unchanged_files: usize,
    pub errors: usize,
    pub processing_time: f64,
    pub relationships_built: usize,
    pub error_details: Vec<FileError>,
}

/// How many relationships a document retains, sorted by strength.
const MAX_RELATIONSHIPS_PER_DOC: usize = 5;

/// How many similar chunks to fetch when building similarity
/// relationships (one extra to drop the document itself).
const SIMILARITY_TOP_K: usize = 6;

/// Drives the full ingestion pipeline: scan → parse → OCR → chunk →
/// embed → index, with bounded parallelism, then builds document
/// relationships. Owns the in-memory document registry; registry writes
/// happen only on the collector side of the fan-out.
pub struct IngestPipeline {
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    recognizer: Arc<dyn TextRecognizer>,
    scanner: FileScanner,
    chunker: Chunker,
    max_workers: usize,
    embedding_batch_size: usize,
    documents: HashMap<String, Document>,
}

impl IngestPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        recognizer: Arc<dyn TextRecognizer>,
        config: &Config,
    ) -> Self {
        Self {
            index,
            provider,
            recognizer,
            scanner: FileScanner::new(Some(config.file_patterns.clone())),
            chunker: Chunker::new(
                config.chunk_size,
                config.chunk_overlap,
                config.preserve_code_blocks,
            ),
            max_workers: config.max_workers.max(1),
            embedding_batch_size: config.embedding_batch_size.max(1),
            documents: HashMap::new(),
        }
    }

    /// The document registry, keyed by `doc_id`.
    pub fn registry(&self) -> &HashMap<String, Document> {
        &self.documents
    }

    /// Mutable registry access (verifier status transitions, imports).
    pub fn registry_mut(&mut self) -> &mut HashMap<String, Document> {
        &mut self.documents
    }

    /// Replace the registry wholesale (snapshot import).
    pub fn set_registry(&mut self, documents: HashMap<String, Document>) {
        self.documents = documents;
    }

    /// Reset the scanner's change-detection cache.
    pub fn clear_scan_cache(&mut self) {
        self.scanner.clear_cache();
    }

    /// Process one or more folders of documents.
    ///
    /// With `force`, every sighted file is treated as new regardless of
    /// the change cache. Single-file failures are recorded in
    /// `error_details` and never abort the batch.
    pub async fn process_folders(
        &mut self,
        folders: &[PathBuf],
        force: bool,
        progress: Option<&ProgressFn>,
    ) -> ProcessingStats {
        let started = Instant::now();
        let mut stats = ProcessingStats::default();

        // Scan all folders and collate changes.
        let mut all_changes: Vec<(PathBuf, FileChange)> = Vec::new();
        for folder in folders {
            if !folder.is_dir() {
                warn!(folder = %folder.display(), "folder does not exist, skipping");
                continue;
            }
            let changes = if force {
                match self.scanner.scan_directory(folder, true) {
                    Ok(files) => files
                        .into_iter()
                        .map(|f| FileChange {
                            path: f.path,
                            kind: ChangeKind::New,
                            size: f.size,
                            mtime: f.mtime,
                            content_hash: f.content_hash,
                        })
                        .collect(),
                    Err(e) => {
                        warn!(folder = %folder.display(), error = %e, "scan failed");
                        continue;
                    }
                }
            } else {
                match self.scanner.detect_changes(folder, true) {
                    Ok(changes) => changes,
                    Err(e) => {
                        warn!(folder = %folder.display(), error = %e, "change detection failed");
                        continue;
                    }
                }
            };
            all_changes.extend(changes.into_iter().map(|c| (folder.clone(), c)));
        }

        // Only Markdown reaches the document pipeline.
        let md_changes: Vec<(PathBuf, FileChange)> = all_changes
            .into_iter()
            .filter(|(_, c)| {
                c.path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("md"))
                    .unwrap_or(false)
            })
            .collect();

        stats.total_files = md_changes.len();
        for (_, change) in &md_changes {
            match change.kind {
                ChangeKind::New => stats.new_files += 1,
                ChangeKind::Modified => stats.modified_files += 1,
                ChangeKind::Deleted => stats.deleted_files += 1,
                ChangeKind::Unchanged => stats.unchanged_files += 1,
            }
        }

        // Deletions first: drop vector rows and registry entries.
        for (_, change) in md_changes.iter().filter(|(_, c)| c.kind == ChangeKind::Deleted) {
            self.delete_document(&change.path);
        }

        let to_process: Vec<(PathBuf, FileChange)> = md_changes
            .into_iter()
            .filter(|(_, c)| matches!(c.kind, ChangeKind::New | ChangeKind::Modified))
            .collect();

        if to_process.is_empty() {
            info!("no files to process");
            stats.processing_time = started.elapsed().as_secs_f64();
            return stats;
        }

        info!(
            files = to_process.len(),
            workers = self.max_workers,
            "processing documents"
        );

        // Fan out per-file tasks; results are reduced here on the
        // collector side, which owns the registry and drives progress.
        let total = to_process.len();
        let index = Arc::clone(&self.index);
        let provider = Arc::clone(&self.provider);
        let recognizer = Arc::clone(&self.recognizer);
        let chunker = self.chunker.clone();
        let batch_size = self.embedding_batch_size;
        let mut tasks = stream::iter(to_process.into_iter().map(move |(folder, change)| {
            let index = Arc::clone(&index);
            let provider = Arc::clone(&provider);
            let recognizer = Arc::clone(&recognizer);
            let chunker = chunker.clone();
            async move {
                let result = process_document(
                    &folder, &change.path, &change, index, provider, recognizer, &chunker,
                    batch_size,
                )
                .await;
                (change.path, result)
            }
        }))
        .buffer_unordered(self.max_workers);

        let mut completed = 0usize;
        while let Some((path, result)) = tasks.next().await {
            completed += 1;
            if let Some(progress) = progress {
                progress(completed, total, &path);
            }
            match result {
                Ok(doc) => {
                    debug!(doc_id = %doc.doc_id, chunks = doc.chunks.len(), "document processed");
                    self.documents.insert(doc.doc_id.clone(), doc);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to process document");
                    stats.errors += 1;
                    stats.error_details.push(FileError {
                        path: path.to_string_lossy().into_owned(),
                        error: e.to_string(),
                    });
                }
            }
        }

        // Relationship building runs only after every file task completed.
        self.build_relationships();
        stats.relationships_built = self
            .documents
            .values()
            .map(|d| d.relationships.len())
            .sum();

        if let Err(e) = self.index.save() {
            warn!(error = %e, "failed to persist vector index");
            stats.errors += 1;
            stats.error_details.push(FileError {
                path: self.index.dir().to_string_lossy().into_owned(),
                error: e.to_string(),
            });
        }

        stats.processing_time = started.elapsed().as_secs_f64();
        info!(
            new = stats.new_files,
            modified = stats.modified_files,
            deleted = stats.deleted_files,
            unchanged = stats.unchanged_files,
            errors = stats.errors,
            relationships = stats.relationships_built,
            elapsed = format!("{:.2}s", stats.processing_time),
            "processing complete"
        );

        stats
    }

    /// Remove a deleted document: vector rows first, then the registry entry.
    fn delete_document(&mut self, path: &Path) {
        let doc_id = path.to_string_lossy().into_owned();

        let chunk_ids: Vec<String> = match self.documents.get(&doc_id) {
            Some(doc) => doc.chunks.iter().map(|c| c.chunk_id.clone()).collect(),
            None => {
                // Not in the registry (e.g. fresh process): find rows by source file.
                let mut filter = serde_json::Map::new();
                filter.insert("source_file".into(), serde_json::Value::String(doc_id.clone()));
                self.index
                    .get(None, Some(&filter), None)
                    .into_iter()
                    .map(|row| row.id)
                    .collect()
            }
        };

        if !chunk_ids.is_empty() {
            if let Err(e) = self.index.delete(&chunk_ids) {
                warn!(path = %path.display(), error = %e, "failed to delete vector rows");
            }
        }
        self.documents.remove(&doc_id);
        info!(path = %path.display(), chunks = chunk_ids.len(), "document deleted");
    }

    /// Build per-document relationships: explicit wikilinks (strength 1.0)
    /// plus vector-similarity neighbors, top 5 by strength.
    fn build_relationships(&mut self) {
        let parser = Parser::new();

        // Stem → doc_id lookup for wikilink target matching.
        let stems: Vec<(String, String)> = self
            .documents
            .values()
            .map(|d| (d.stem(), d.doc_id.clone()))
            .collect();

        let doc_ids: Vec<String> = self.documents.keys().cloned().collect();
        for doc_id in doc_ids {
            let (raw_content, stem, embedding) = {
                let doc = &self.documents[&doc_id];
                (doc.raw_content.clone(), doc.stem(), doc.embedding.clone())
            };

            let mut relationships: Vec<Relationship> = Vec::new();

            // 1. Explicit wikilinks, matched by filename stem.
            let parsed = parser.parse_content(&raw_content, Some(&stem));
            for link in &parsed.wikilinks {
                let target = link.target.trim();
                for (other_stem, other_id) in &stems {
                    if *other_id == doc_id || other_stem != target {
                        continue;
                    }
                    if relationships.iter().any(|r| r.target_doc_id == *other_id) {
                        continue;
                    }
                    let mut rel = Relationship::new(
                        doc_id.clone(),
                        other_id.clone(),
                        match link.kind {
                            WikiLinkKind::Wikilink => RelationKind::Wikilink,
                            WikiLinkKind::WikilinkHeader => RelationKind::WikilinkHeader,
                        },
                    );
                    rel.manual_link_score = 1.0;
                    rel.strength = 1.0;
                    rel.metadata.insert(
                        "link_target".into(),
                        serde_json::Value::String(link.target.clone()),
                    );
                    relationships.push(rel);
                }
            }

            // 2. Vector-similarity neighbors from the aggregate embedding.
            if let Some(embedding) = embedding {
                match self.index.query(&embedding, SIMILARITY_TOP_K, None) {
                    Ok(matches) => {
                        for m in matches {
                            let Some(source_file) =
                                m.metadata.get("source_file").and_then(|v| v.as_str())
                            else {
                                continue;
                            };
                            if source_file == doc_id {
                                continue;
                            }
                            if !self.documents.contains_key(source_file) {
                                continue;
                            }
                            if relationships.iter().any(|r| r.target_doc_id == source_file) {
                                continue;
                            }
                            let mut rel = Relationship::new(
                                doc_id.clone(),
                                source_file.to_string(),
                                RelationKind::Similarity,
                            );
                            rel.vector_score = m.score;
                            rel.strength = m.score;
                            relationships.push(rel);
                        }
                    }
                    Err(e) => {
                        debug!(doc_id = %doc_id, error = %e, "similarity lookup failed");
                    }
                }
            }

            relationships.sort_by(|a, b| {
                b.strength
                    .partial_cmp(&a.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            relationships.truncate(MAX_RELATIONSHIPS_PER_DOC);

            if let Some(doc) = self.documents.get_mut(&doc_id) {
                doc.relationships = relationships;
            }
        }
    }
}

/// Process one file through parse → OCR → chunk → embed → index.
/// Returns the new `Document` by value; the collector owns insertion.
#[allow(clippy::too_many_arguments)]
async fn process_document(
    folder: &Path,
    path: &Path,
    change: &FileChange,
    index: Arc<VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    recognizer: Arc<dyn TextRecognizer>,
    chunker: &Chunker,
    embedding_batch_size: usize,
) -> Result<Document> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidData {
            Error::Parse {
                path: path.to_path_buf(),
                message: "file is not valid UTF-8".into(),
            }
        } else {
            Error::Io(e)
        }
    })?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string();

    let parser = Parser::new();
    let parsed = parser.parse_content(&content, Some(&stem));

    // OCR for images resolvable relative to the note.
    let mut image_texts: Vec<String> = Vec::new();
    let note_dir = path.parent().unwrap_or(Path::new(""));
    for image in &parsed.images {
        let image_path = note_dir.join(&image.path);
        if !image_path.is_file() {
            continue;
        }
        match recognizer.recognize(&image_path) {
            Ok(ocr) if !ocr.text.trim().is_empty() => image_texts.push(ocr.text),
            Ok(_) => {}
            Err(e) => debug!(image = %image_path.display(), error = %e, "ocr failed"),
        }
    }

    let mut combined_text = parsed.plain_text.clone();
    if !image_texts.is_empty() {
        combined_text.push_str("\n\n");
        combined_text.push_str(&image_texts.join("\n\n"));
    }

    let doc_id = path.to_string_lossy().into_owned();
    let chunks = chunker.chunk_text(&combined_text, None);
    let total_chunks = chunks.len();

    // Embed and upsert.
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = embed_in_batches(provider.as_ref(), &texts, embedding_batch_size).await?;

    let mut doc_chunks: Vec<DocumentChunk> = Vec::with_capacity(total_chunks);
    for (i, (chunk, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
        let start_line = line_of_char_offset(&combined_text, chunk.start_index);
        let end_line = line_of_char_offset(&combined_text, chunk.end_index);

        let mut metadata = serde_json::Map::new();
        metadata.insert("chunk_index".into(), serde_json::Value::from(i));
        metadata.insert(
            "source_file".into(),
            serde_json::Value::String(doc_id.clone()),
        );
        metadata.insert("total_chunks".into(), serde_json::Value::from(total_chunks));
        metadata.insert("start_line".into(), serde_json::Value::from(start_line));
        metadata.insert("end_line".into(), serde_json::Value::from(end_line));

        doc_chunks.push(DocumentChunk {
            chunk_id: format!("{stem}_{i}"),
            document_id: doc_id.clone(),
            content: chunk.text.clone(),
            start_line,
            end_line,
            metadata,
            embedding: Some(embedding.clone()),
        });
    }

    if !doc_chunks.is_empty() {
        let ids: Vec<String> = doc_chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let vectors: Vec<Vec<f32>> = embeddings.clone();
        let payloads: Vec<String> = doc_chunks.iter().map(|c| c.content.clone()).collect();
        let metadatas: Vec<serde_json::Map<String, serde_json::Value>> =
            doc_chunks.iter().map(|c| c.metadata.clone()).collect();
        index.add(&ids, &vectors, &payloads, &metadatas)?;
    }

    let word_count = combined_text.split_whitespace().count();
    let metadata = DocumentMetadata {
        title: Some(parsed.title.clone().unwrap_or_else(|| stem.clone())),
        tags: parsed.tags.clone(),
        aliases: parsed.aliases.clone(),
        headings: parsed.headings.clone(),
        word_count,
        custom_fields: parsed.frontmatter.clone(),
    };

    let relative_path = path
        .strip_prefix(folder)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf());

    Ok(Document {
        doc_id,
        file_path: path.to_path_buf(),
        relative_path,
        source_folder: folder.to_string_lossy().into_owned(),
        raw_content: content,
        parsed_content: parsed.parsed_content,
        metadata,
        embedding: mean_embedding(&embeddings),
        chunks: doc_chunks,
        relationships: Vec::new(),
        status: DocumentStatus::Active,
        file_size: change.size,
        file_hash: change.content_hash.clone(),
        last_indexed: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs()),
    })
}

/// Embed texts in slices of `batch_size`, preserving input order.
async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        embeddings.extend(provider.embed_batch(batch).await?);
    }
    Ok(embeddings)
}

/// 1-based line number of a character offset.
fn line_of_char_offset(text: &str, char_offset: usize) -> usize {
    1 + text
        .chars()
        .take(char_offset)
        .filter(|c| *c == '\n')
        .count()
}

/// Mean of the chunk embeddings, used as the document's aggregate vector.
fn mean_embedding(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let mut mean = vec![0.0f32; first.len()];
    for embedding in embeddings {
        for (slot, value) in mean.iter_mut().zip(embedding) {
            *slot += value;
        }
    }
    let n = embeddings.len() as f32;
    for slot in &mut mean {
        *slot /= n;
    }
    Some(mean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_of_offset_counts_newlines() {
        let text = "line one\nline two\nline three";
        assert_eq!(line_of_char_offset(text, 0), 1);
        assert_eq!(line_of_char_offset(text, 9), 2);
        assert_eq!(line_of_char_offset(text, text.chars().count()), 3);
    }

    #[test]
    fn mean_embedding_averages() {
        let mean = mean_embedding(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(mean, vec![0.5, 0.5]);
    }

    #[test]
    fn mean_embedding_empty_is_none() {
        assert!(mean_embedding(&[]).is_none());
    }
}
