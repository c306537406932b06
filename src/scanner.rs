use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Directory segments that are never scanned, regardless of patterns.
const VENDOR_SEGMENTS: &[&str] = &[".obsidian", ".smart-env"];

/// Information about a sighted file.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// File size in bytes.
    pub size: u64,
    /// Modification time as seconds since the Unix epoch.
    pub mtime: f64,
    /// SHA-256 hex digest of the file content.
    pub content_hash: String,
}

/// Kind of change detected for a file between two scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    New,
    Modified,
    Deleted,
    Unchanged,
}

/// A change to a file relative to the scanner's cache.
#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    /// Absolute path to the file.
    pub path: PathBuf,
    /// The kind of change detected.
    pub kind: ChangeKind,
    /// File size in bytes (0 for deleted files).
    pub size: u64,
    /// Modification time as seconds since the Unix epoch (0 for deleted files).
    pub mtime: f64,
    /// SHA-256 hex digest (empty for deleted files).
    pub content_hash: String,
}

/// Scans directories for vault files and detects changes between scans.
///
/// The change cache is scoped to the scanner instance: the first
/// `detect_changes` call reports every file as new, subsequent calls
/// compare content hashes against the cached state.
#[derive(Debug)]
pub struct FileScanner {
    patterns: Vec<String>,
    cache: HashMap<PathBuf, (f64, String)>,
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FileScanner {
    /// Create a new scanner. `patterns` defaults to Markdown plus the
    /// image formats referenced by notes.
    pub fn new(patterns: Option<Vec<String>>) -> Self {
        Self {
            patterns: patterns.unwrap_or_else(|| {
                vec![
                    "*.md".to_string(),
                    "*.jpg".to_string(),
                    "*.jpeg".to_string(),
                    "*.png".to_string(),
                ]
            }),
            cache: HashMap::new(),
        }
    }

    /// Scan a directory for files matching the configured patterns.
    ///
    /// Hidden (dot-prefixed) path segments and vendor directories
    /// (`.obsidian`, `.smart-env`) are skipped. Results are sorted by path.
    pub fn scan_directory(&self, directory: &Path, recursive: bool) -> Result<Vec<FileInfo>> {
        if !directory.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("directory does not exist: {}", directory.display()),
            )));
        }

        let mut walker = WalkBuilder::new(directory);
        walker
            .standard_filters(false)
            .hidden(true)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !VENDOR_SEGMENTS.contains(&name))
                    .unwrap_or(true)
            });
        if !recursive {
            walker.max_depth(Some(1));
        }

        let mut results = Vec::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !self.matches_patterns(path) {
                continue;
            }

            let metadata = std::fs::metadata(path)?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);

            results.push(FileInfo {
                path: path.to_path_buf(),
                size: metadata.len(),
                mtime,
                content_hash: compute_file_hash(path),
            });
        }

        results.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(results)
    }

    /// Detect which files have changed since the last scan of this instance.
    ///
    /// New and modified entries update the cache in place; deletions
    /// remove their cache entries.
    pub fn detect_changes(&mut self, directory: &Path, recursive: bool) -> Result<Vec<FileChange>> {
        let current = self.scan_directory(directory, recursive)?;
        let current_paths: HashMap<PathBuf, &FileInfo> =
            current.iter().map(|f| (f.path.clone(), f)).collect();

        let mut changes = Vec::new();

        // Deletions: cached paths under this directory that are gone from disk.
        let deleted: Vec<PathBuf> = self
            .cache
            .keys()
            .filter(|p| p.starts_with(directory) && !current_paths.contains_key(*p))
            .cloned()
            .collect();
        for path in deleted {
            self.cache.remove(&path);
            changes.push(FileChange {
                path,
                kind: ChangeKind::Deleted,
                size: 0,
                mtime: 0.0,
                content_hash: String::new(),
            });
        }

        for info in &current {
            let kind = match self.cache.get(&info.path) {
                None => {
                    self.cache
                        .insert(info.path.clone(), (info.mtime, info.content_hash.clone()));
                    ChangeKind::New
                }
                Some((_, cached_hash)) if *cached_hash != info.content_hash => {
                    self.cache
                        .insert(info.path.clone(), (info.mtime, info.content_hash.clone()));
                    ChangeKind::Modified
                }
                Some(_) => ChangeKind::Unchanged,
            };

            changes.push(FileChange {
                path: info.path.clone(),
                kind,
                size: info.size,
                mtime: info.mtime,
                content_hash: info.content_hash.clone(),
            });
        }

        Ok(changes)
    }

    /// Purge the change-detection cache.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of entries currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn matches_patterns(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let name = name.to_lowercase();
        self.patterns.iter().any(|pattern| {
            match pattern.strip_prefix('*') {
                Some(suffix) => name.ends_with(&suffix.to_lowercase()),
                None => name == pattern.to_lowercase(),
            }
        })
    }
}

/// Compute a streaming SHA-256 hex digest of a file, reading in 4 KiB blocks.
///
/// An unreadable file hashes to the empty string (logged, not fatal) so a
/// transient permission problem shows up as a content change, not an abort.
pub fn compute_file_hash(path: &Path) -> String {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot open file for hashing");
            return String::new();
        }
    };

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 4096];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "read error while hashing");
                return String::new();
            }
        }
    }
    format!("{:x}", hasher.finalize())
}
