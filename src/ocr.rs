use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::scanner::compute_file_hash;

/// Text recognized from an image. Empty text is a valid result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrText {
    pub text: String,
    /// Recognition confidence in [0, 1].
    pub confidence: f64,
    /// Detected language tag (empty when unknown).
    pub language: String,
}

/// Port for extracting text from images referenced by notes.
///
/// Real OCR engines live behind this trait; the engine only appends
/// whatever text comes back to the note's plain text before chunking.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image_path: &Path) -> Result<OcrText>;
}

impl<T: TextRecognizer + ?Sized> TextRecognizer for std::sync::Arc<T> {
    fn recognize(&self, image_path: &Path) -> Result<OcrText> {
        (**self).recognize(image_path)
    }
}

/// Recognizer that finds no text in anything. The default when no OCR
/// engine is wired in.
#[derive(Debug, Default)]
pub struct NoopRecognizer;

impl TextRecognizer for NoopRecognizer {
    fn recognize(&self, _image_path: &Path) -> Result<OcrText> {
        Ok(OcrText::default())
    }
}

/// Deterministic recognizer for tests: returns a fixed text for every
/// image and counts invocations.
#[derive(Debug)]
pub struct MockRecognizer {
    text: String,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockRecognizer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl TextRecognizer for MockRecognizer {
    fn recognize(&self, _image_path: &Path) -> Result<OcrText> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(OcrText {
            text: self.text.clone(),
            confidence: 0.9,
            language: "zh".into(),
        })
    }
}

/// Wraps a recognizer with a best-effort disk cache, one JSON file per
/// image keyed by the image's content hash. Reads that miss recompute;
/// failed writes are swallowed. A changed image re-runs recognition
/// because the content hash moves.
pub struct CachedRecognizer {
    inner: Box<dyn TextRecognizer>,
    dir: PathBuf,
}

impl CachedRecognizer {
    pub fn new(inner: Box<dyn TextRecognizer>, dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            debug!(dir = %dir.display(), error = %e, "cannot create ocr cache dir");
        }
        Self { inner, dir }
    }

    fn cache_path(&self, image_path: &Path) -> Option<PathBuf> {
        let content_hash = compute_file_hash(image_path);
        if content_hash.is_empty() {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(b"ocr:");
        hasher.update(content_hash.as_bytes());
        Some(self.dir.join(format!("{:x}.json", hasher.finalize())))
    }
}

impl TextRecognizer for CachedRecognizer {
    fn recognize(&self, image_path: &Path) -> Result<OcrText> {
        let cache_path = self.cache_path(image_path);

        if let Some(path) = &cache_path {
            if let Ok(data) = std::fs::read_to_string(path) {
                if let Ok(cached) = serde_json::from_str::<OcrText>(&data) {
                    debug!(image = %image_path.display(), "ocr cache hit");
                    return Ok(cached);
                }
            }
        }

        let result = self.inner.recognize(image_path)?;

        if let Some(path) = &cache_path {
            match serde_json::to_string(&result) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(path, json) {
                        debug!(path = %path.display(), error = %e, "ocr cache write failed");
                    }
                }
                Err(e) => debug!(error = %e, "ocr cache serialize failed"),
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn noop_returns_empty_text() {
        let ocr = NoopRecognizer;
        let result = ocr.recognize(Path::new("whatever.png")).unwrap();
        assert!(result.text.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn mock_returns_fixed_text_and_counts() {
        let ocr = MockRecognizer::new("圖片文字");
        assert_eq!(ocr.call_count(), 0);
        let result = ocr.recognize(Path::new("a.png")).unwrap();
        assert_eq!(result.text, "圖片文字");
        assert_eq!(ocr.call_count(), 1);
    }

    #[test]
    fn cached_recognizer_hits_on_second_call() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("pic.png");
        fs::write(&image, "fake image bytes").unwrap();

        let mock = std::sync::Arc::new(MockRecognizer::new("辨識結果"));
        let cached = CachedRecognizer::new(
            Box::new(std::sync::Arc::clone(&mock)),
            dir.path().join("cache"),
        );

        let first = cached.recognize(&image).unwrap();
        let second = cached.recognize(&image).unwrap();
        assert_eq!(first.text, "辨識結果");
        assert_eq!(second.text, "辨識結果");
        // Second call served from disk, not the inner recognizer.
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn cached_recognizer_recomputes_when_image_changes() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("pic.png");
        fs::write(&image, "version one").unwrap();

        let cached = CachedRecognizer::new(
            Box::new(MockRecognizer::new("text")),
            dir.path().join("cache"),
        );
        cached.recognize(&image).unwrap();

        fs::write(&image, "version two").unwrap();
        let result = cached.recognize(&image).unwrap();
        assert_eq!(result.text, "text");
        // Two distinct cache entries exist, one per content hash.
        let entries = fs::read_dir(dir.path().join("cache")).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn cached_recognizer_survives_unwritable_cache() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("pic.png");
        fs::write(&image, "bytes").unwrap();

        let cached = CachedRecognizer::new(
            Box::new(MockRecognizer::new("ok")),
            PathBuf::from("/nonexistent/ocr-cache"),
        );
        let result = cached.recognize(&image).unwrap();
        assert_eq!(result.text, "ok");
    }
}
