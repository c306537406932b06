use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};

use super::exporter::{copy_dir_all, Manifest};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::index::VectorIndex;

/// Result of a snapshot import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub success: bool,
    pub imported_documents: usize,
    pub imported_chunks: usize,
    pub imported_relationships: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Reads a snapshot (directory or `.zip`) back into documents and
/// replaces the vector-index directory at the target's persistence path.
pub struct SnapshotImporter {
    index: Arc<VectorIndex>,
    source: PathBuf,
}

impl SnapshotImporter {
    pub fn new(index: Arc<VectorIndex>, source: PathBuf) -> Self {
        Self { index, source }
    }

    /// Import the complete snapshot. Per-document failures skip that
    /// document and accumulate error strings; a missing manifest or zero
    /// reconstructed documents fails the import.
    pub fn import_all(&self) -> (ImportResult, Vec<Document>) {
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let (import_dir, temp_dir) = match self.resolve_source() {
            Ok(pair) => pair,
            Err(e) => {
                errors.push(e.to_string());
                return (failed_result(errors, warnings), Vec::new());
            }
        };

        let manifest = match load_manifest(&import_dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                errors.push(e.to_string());
                cleanup(temp_dir);
                return (failed_result(errors, warnings), Vec::new());
            }
        };

        let documents = self.import_documents(&import_dir, &manifest, &mut errors);
        self.import_vector_db(&import_dir, &manifest, &mut errors, &mut warnings);

        cleanup(temp_dir);

        let imported_chunks: usize = documents.iter().map(|d| d.chunks.len()).sum();
        let imported_relationships: usize =
            documents.iter().map(|d| d.relationships.len()).sum();
        let success = !documents.is_empty() && errors.is_empty();

        info!(
            documents = documents.len(),
            chunks = imported_chunks,
            success,
            "snapshot import finished"
        );

        (
            ImportResult {
                success,
                imported_documents: documents.len(),
                imported_chunks,
                imported_relationships,
                errors,
                warnings,
            },
            documents,
        )
    }

    /// Peek at the snapshot's manifest metadata without importing.
    pub fn import_info(&self) -> Option<serde_json::Value> {
        let (import_dir, temp_dir) = self.resolve_source().ok()?;
        let manifest = load_manifest(&import_dir).ok();
        cleanup(temp_dir);
        manifest.and_then(|m| serde_json::to_value(m.metadata).ok())
    }

    /// Extract a `.zip` source to a temporary directory; a plain
    /// directory is used as-is. Returns `(import_dir, temp_dir)`.
    fn resolve_source(&self) -> Result<(PathBuf, Option<PathBuf>)> {
        if self.source.extension().and_then(|e| e.to_str()) == Some("zip") {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let temp_dir = std::env::temp_dir().join(format!("vaultkb-import-{nanos}"));
            fs::create_dir_all(&temp_dir)?;

            let file = fs::File::open(&self.source)?;
            let mut archive = zip::ZipArchive::new(file)
                .map_err(|e| Error::Snapshot(format!("cannot open archive: {e}")))?;
            archive
                .extract(&temp_dir)
                .map_err(|e| Error::Snapshot(format!("cannot extract archive: {e}")))?;

            Ok((temp_dir.clone(), Some(temp_dir)))
        } else if self.source.is_dir() {
            Ok((self.source.clone(), None))
        } else {
            Err(Error::Snapshot(format!(
                "import source not found: {}",
                self.source.display()
            )))
        }
    }

    /// Reconstruct documents from the manifest's documents file.
    fn import_documents(
        &self,
        import_dir: &Path,
        manifest: &Manifest,
        errors: &mut Vec<String>,
    ) -> Vec<Document> {
        let path = import_dir.join(&manifest.documents_file);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(_) => {
                errors.push("Documents file not found".to_string());
                return Vec::new();
            }
        };

        let values: Vec<serde_json::Value> = match serde_json::from_str(&data) {
            Ok(values) => values,
            Err(e) => {
                errors.push(format!("Invalid documents JSON: {e}"));
                return Vec::new();
            }
        };

        let mut documents = Vec::new();
        for value in values {
            let doc_id = value
                .get("doc_id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();
            match serde_json::from_value::<Document>(value) {
                Ok(doc) => documents.push(doc),
                Err(e) => {
                    errors.push(format!("Failed to import document {doc_id}: {e}"));
                }
            }
        }
        documents
    }

    /// Replace the index's persistence directory with the snapshot copy
    /// and reload the in-memory state.
    fn import_vector_db(
        &self,
        import_dir: &Path,
        manifest: &Manifest,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let source = import_dir.join(&manifest.vector_db_path);
        if !source.is_dir() {
            warnings.push("Vector database folder not found".to_string());
            return;
        }

        let target = self.index.dir().to_path_buf();
        if target.exists() {
            if let Err(e) = fs::remove_dir_all(&target) {
                errors.push(format!("Failed to replace vector database: {e}"));
                return;
            }
        }
        if let Err(e) = copy_dir_all(&source, &target) {
            errors.push(format!("Failed to import vector database: {e}"));
            return;
        }
        if let Err(e) = self.index.reload() {
            errors.push(format!("Failed to reload vector database: {e}"));
        }
    }
}

fn load_manifest(import_dir: &Path) -> Result<Manifest> {
    let path = import_dir.join("manifest.json");
    if !path.exists() {
        return Err(Error::Snapshot("Manifest file not found".into()));
    }
    let data = fs::read_to_string(&path)?;
    serde_json::from_str(&data).map_err(|e| Error::Snapshot(format!("Invalid manifest JSON: {e}")))
}

fn failed_result(errors: Vec<String>, warnings: Vec<String>) -> ImportResult {
    ImportResult {
        success: false,
        imported_documents: 0,
        imported_chunks: 0,
        imported_relationships: 0,
        errors,
        warnings,
    }
}

fn cleanup(temp_dir: Option<PathBuf>) {
    if let Some(dir) = temp_dir {
        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "failed to remove temp dir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_index(dir: &TempDir, name: &str) -> Arc<VectorIndex> {
        Arc::new(VectorIndex::create(&dir.path().join(name), 4).unwrap())
    }

    #[test]
    fn missing_manifest_fails() {
        let dir = TempDir::new().unwrap();
        let index = make_index(&dir, "vdb");
        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        let importer = SnapshotImporter::new(index, empty);
        let (result, docs) = importer.import_all();

        assert!(!result.success);
        assert!(docs.is_empty());
        assert!(result.errors.iter().any(|e| e.contains("Manifest")));
    }

    #[test]
    fn missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let index = make_index(&dir, "vdb");
        let importer = SnapshotImporter::new(index, dir.path().join("nope"));
        let (result, _) = importer.import_all();
        assert!(!result.success);
    }

    #[test]
    fn invalid_document_is_skipped_with_error() {
        let dir = TempDir::new().unwrap();
        let index = make_index(&dir, "vdb");
        let snapshot = dir.path().join("snapshot");
        fs::create_dir_all(&snapshot).unwrap();

        fs::write(
            snapshot.join("manifest.json"),
            serde_json::json!({
                "metadata": {
                    "export_date": "0",
                    "version": "1.0",
                    "total_documents": 2,
                    "total_chunks": 0,
                    "total_relationships": 0,
                    "source_folders": [],
                },
                "documents_file": "documents.json",
                "vector_db_path": "vector_db",
            })
            .to_string(),
        )
        .unwrap();

        // One valid document, one broken record.
        fs::write(
            snapshot.join("documents.json"),
            serde_json::json!([
                {
                    "doc_id": "a.md",
                    "file_path": "a.md",
                    "relative_path": "a.md",
                    "source_folder": "/vault",
                    "raw_content": "x",
                    "parsed_content": "x",
                    "status": "active",
                },
                {"doc_id": "broken.md"},
            ])
            .to_string(),
        )
        .unwrap();

        let importer = SnapshotImporter::new(index, snapshot);
        let (result, docs) = importer.import_all();

        assert_eq!(docs.len(), 1);
        assert_eq!(result.imported_documents, 1);
        assert!(result.errors.iter().any(|e| e.contains("broken.md")));
        assert!(!result.success);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("Vector database")));
    }
}
