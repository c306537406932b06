use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::document::{Document, DocumentStatus};

/// Availability of one declared source folder.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub path: String,
    pub exists: bool,
    pub document_count: usize,
}

/// Outcome of a source verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub total_sources: usize,
    pub available_sources: usize,
    pub missing_sources: usize,
    pub frozen_documents: usize,
    pub source_statuses: Vec<SourceStatus>,
}

/// Transitions documents between `active` and `frozen` based on whether
/// their owning source folder is reachable. Verification is idempotent:
/// repeated passes with the same folders produce the same report and
/// statuses.
#[derive(Debug, Default)]
pub struct SourceVerifier;

impl SourceVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify source folders and update document statuses in place.
    pub fn verify<'a, I>(&self, documents: I, source_folders: &[String]) -> VerificationReport
    where
        I: IntoIterator<Item = &'a mut Document>,
    {
        let mut existing: HashSet<&str> = HashSet::new();
        let mut missing: HashSet<&str> = HashSet::new();
        for folder in source_folders {
            if Path::new(folder).exists() {
                existing.insert(folder.as_str());
            } else {
                missing.insert(folder.as_str());
            }
        }

        let mut doc_counts: HashMap<String, usize> = HashMap::new();
        let mut frozen_count = 0usize;

        for doc in documents {
            let Some(folder) = find_document_source(doc, source_folders) else {
                continue;
            };
            *doc_counts.entry(folder.clone()).or_insert(0) += 1;

            if missing.contains(folder.as_str()) {
                doc.status = DocumentStatus::Frozen;
                frozen_count += 1;
            } else if doc.status == DocumentStatus::Frozen && existing.contains(folder.as_str()) {
                doc.status = DocumentStatus::Active;
            }
        }

        let source_statuses: Vec<SourceStatus> = source_folders
            .iter()
            .map(|folder| SourceStatus {
                path: folder.clone(),
                exists: existing.contains(folder.as_str()),
                document_count: doc_counts.get(folder).copied().unwrap_or(0),
            })
            .collect();

        info!(
            total = source_folders.len(),
            available = existing.len(),
            missing = missing.len(),
            frozen = frozen_count,
            "source verification complete"
        );

        VerificationReport {
            total_sources: source_folders.len(),
            available_sources: existing.len(),
            missing_sources: missing.len(),
            frozen_documents: frozen_count,
            source_statuses,
        }
    }

    /// Documents currently marked frozen.
    pub fn frozen<'a>(&self, documents: impl IntoIterator<Item = &'a Document>) -> Vec<&'a Document> {
        documents
            .into_iter()
            .filter(|d| d.status == DocumentStatus::Frozen)
            .collect()
    }

    /// Documents not marked frozen.
    pub fn available<'a>(
        &self,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> Vec<&'a Document> {
        documents
            .into_iter()
            .filter(|d| d.status != DocumentStatus::Frozen)
            .collect()
    }
}

/// Find the declared folder containing the document, preferring the
/// longest prefix match.
fn find_document_source(doc: &Document, source_folders: &[String]) -> Option<String> {
    source_folders
        .iter()
        .filter(|folder| doc.file_path.starts_with(folder))
        .max_by_key(|folder| folder.len())
        .cloned()
}
