use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::Document;
use crate::error::{Error, Result};
use crate::index::VectorIndex;

/// Snapshot format version.
pub const EXPORT_VERSION: &str = "1.0";

/// Metadata block of a snapshot manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_date: String,
    pub version: String,
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_relationships: usize,
    pub source_folders: Vec<String>,
}

/// The `manifest.json` payload tying the snapshot together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub metadata: ExportMetadata,
    pub documents_file: String,
    pub vector_db_path: String,
}

/// Size summary of what an export would contain.
#[derive(Debug, Clone, Serialize)]
pub struct ExportStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_relationships: usize,
    pub total_content_bytes: usize,
    pub avg_chunks_per_doc: f64,
    pub avg_relationships_per_doc: f64,
}

/// Writes a portable snapshot: `documents.json`, a verbatim copy of the
/// vector-index directory, and `manifest.json` — optionally zipped.
pub struct SnapshotExporter {
    index: Arc<VectorIndex>,
    export_dir: PathBuf,
}

impl SnapshotExporter {
    pub fn new(index: Arc<VectorIndex>, export_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&export_dir)?;
        Ok(Self { index, export_dir })
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Serialize all documents to `documents.json`.
    pub fn export_documents(&self, documents: &[&Document]) -> Result<PathBuf> {
        let path = self.export_dir.join("documents.json");
        let json = serde_json::to_string_pretty(documents)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(&path, json)?;
        debug!(path = %path.display(), documents = documents.len(), "documents exported");
        Ok(path)
    }

    /// Copy the vector-index directory verbatim into the export as
    /// `vector_db/`. The index is flushed first so the copy is current.
    pub fn export_vector_db(&self) -> Result<PathBuf> {
        self.index.save()?;

        let target = self.export_dir.join("vector_db");
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }

        let source = self.index.dir();
        if source.is_dir() {
            copy_dir_all(source, &target)?;
        } else {
            fs::create_dir_all(&target)?;
        }
        Ok(target)
    }

    /// Export the complete knowledge base. Returns the export directory,
    /// or the `.zip` archive path when `create_archive` is set.
    pub fn export_all(
        &self,
        documents: &[&Document],
        source_folders: &[String],
        create_archive: bool,
    ) -> Result<PathBuf> {
        self.export_documents(documents)?;
        self.export_vector_db()?;

        let manifest = Manifest {
            metadata: ExportMetadata {
                export_date: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs().to_string())
                    .unwrap_or_default(),
                version: EXPORT_VERSION.to_string(),
                total_documents: documents.len(),
                total_chunks: documents.iter().map(|d| d.chunks.len()).sum(),
                total_relationships: documents.iter().map(|d| d.relationships.len()).sum(),
                source_folders: source_folders.to_vec(),
            },
            documents_file: "documents.json".to_string(),
            vector_db_path: "vector_db".to_string(),
        };
        let manifest_json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(self.export_dir.join("manifest.json"), manifest_json)?;

        info!(
            dir = %self.export_dir.display(),
            documents = documents.len(),
            archive = create_archive,
            "snapshot exported"
        );

        if create_archive {
            let name = self
                .export_dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("export");
            let archive_path = self
                .export_dir
                .parent()
                .unwrap_or(Path::new("."))
                .join(format!("{name}.zip"));
            zip_directory(&self.export_dir, &archive_path)?;
            return Ok(archive_path);
        }

        Ok(self.export_dir.clone())
    }

    /// Statistics about what an export of `documents` would contain.
    pub fn export_stats(documents: &[&Document]) -> ExportStats {
        let total_chunks: usize = documents.iter().map(|d| d.chunks.len()).sum();
        let total_relationships: usize = documents.iter().map(|d| d.relationships.len()).sum();
        let n = documents.len();
        ExportStats {
            total_documents: n,
            total_chunks,
            total_relationships,
            total_content_bytes: documents.iter().map(|d| d.raw_content.len()).sum(),
            avg_chunks_per_doc: if n > 0 { total_chunks as f64 / n as f64 } else { 0.0 },
            avg_relationships_per_doc: if n > 0 {
                total_relationships as f64 / n as f64
            } else {
                0.0
            },
        }
    }
}

/// Recursively copy a directory.
pub(crate) fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Zip a directory's contents with paths relative to its root.
fn zip_directory(dir: &Path, archive_path: &Path) -> Result<()> {
    let file = fs::File::create(archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(dir)
                .map_err(|e| Error::Snapshot(format!("path outside export dir: {e}")))?
                .to_string_lossy()
                .replace('\\', "/");
            zip.start_file(relative, options)
                .map_err(|e| Error::Snapshot(format!("zip start_file: {e}")))?;
            let mut content = Vec::new();
            fs::File::open(&path)?.read_to_end(&mut content)?;
            zip.write_all(&content)?;
        }
    }

    zip.finish()
        .map_err(|e| Error::Snapshot(format!("zip finish: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentMetadata, DocumentStatus};
    use tempfile::TempDir;

    fn make_doc(id: &str, chunks: usize) -> Document {
        Document {
            doc_id: id.to_string(),
            file_path: PathBuf::from(id),
            relative_path: PathBuf::from(id),
            source_folder: "/vault".into(),
            raw_content: "content".into(),
            parsed_content: "content".into(),
            metadata: DocumentMetadata::default(),
            chunks: (0..chunks)
                .map(|i| crate::document::DocumentChunk {
                    chunk_id: format!("{id}_{i}"),
                    document_id: id.to_string(),
                    content: format!("chunk {i}"),
                    start_line: 1,
                    end_line: 2,
                    metadata: serde_json::Map::new(),
                    embedding: None,
                })
                .collect(),
            relationships: vec![],
            status: DocumentStatus::Active,
            file_size: 7,
            file_hash: "h".into(),
            last_indexed: None,
            embedding: None,
        }
    }

    fn make_index(dir: &TempDir) -> Arc<VectorIndex> {
        Arc::new(VectorIndex::create(&dir.path().join("vector_db"), 4).unwrap())
    }

    #[test]
    fn export_all_writes_three_artifacts() {
        let dir = TempDir::new().unwrap();
        let index = make_index(&dir);
        let export_dir = dir.path().join("export");
        let exporter = SnapshotExporter::new(index, export_dir.clone()).unwrap();

        let docs = [make_doc("a.md", 2), make_doc("b.md", 1)];
        let doc_refs: Vec<&Document> = docs.iter().collect();
        let out = exporter
            .export_all(&doc_refs, &["/vault".to_string()], false)
            .unwrap();

        assert_eq!(out, export_dir);
        assert!(export_dir.join("documents.json").exists());
        assert!(export_dir.join("manifest.json").exists());
        assert!(export_dir.join("vector_db").join("index").exists());

        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(export_dir.join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.metadata.version, "1.0");
        assert_eq!(manifest.metadata.total_documents, 2);
        assert_eq!(manifest.metadata.total_chunks, 3);
        assert_eq!(manifest.documents_file, "documents.json");
        assert_eq!(manifest.vector_db_path, "vector_db");
    }

    #[test]
    fn export_archive_creates_zip() {
        let dir = TempDir::new().unwrap();
        let index = make_index(&dir);
        let export_dir = dir.path().join("backup");
        let exporter = SnapshotExporter::new(index, export_dir).unwrap();

        let docs = [make_doc("a.md", 1)];
        let doc_refs: Vec<&Document> = docs.iter().collect();
        let archive = exporter
            .export_all(&doc_refs, &["/vault".to_string()], true)
            .unwrap();

        assert_eq!(archive, dir.path().join("backup.zip"));
        assert!(archive.exists());

        let file = fs::File::open(&archive).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"manifest.json".to_string()));
        assert!(names.contains(&"documents.json".to_string()));
        assert!(names.iter().any(|n| n.starts_with("vector_db/")));
    }

    #[test]
    fn vector_db_copied_byte_identical() {
        let dir = TempDir::new().unwrap();
        let index = make_index(&dir);
        index
            .add(
                &["a_0".into()],
                &[vec![1.0, 0.0, 0.0, 0.0]],
                &["text".into()],
                &[serde_json::Map::new()],
            )
            .unwrap();
        index.save().unwrap();

        let exporter = SnapshotExporter::new(Arc::clone(&index), dir.path().join("export")).unwrap();
        let copied = exporter.export_vector_db().unwrap();

        let original = fs::read(index.dir().join("index")).unwrap();
        let copy = fs::read(copied.join("index")).unwrap();
        assert_eq!(original, copy);
    }

    #[test]
    fn export_stats_averages() {
        let docs = [make_doc("a.md", 2), make_doc("b.md", 4)];
        let doc_refs: Vec<&Document> = docs.iter().collect();
        let stats = SnapshotExporter::export_stats(&doc_refs);
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_chunks, 6);
        assert!((stats.avg_chunks_per_doc - 3.0).abs() < 1e-9);
        assert_eq!(stats.total_content_bytes, 14);
    }
}
