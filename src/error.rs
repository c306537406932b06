use std::path::PathBuf;

/// All errors that can occur in vaultkb.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("parse error in {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    #[error("ocr error: {0}")]
    Ocr(String),

    #[error("index not found: {}", path.display())]
    IndexNotFound { path: PathBuf },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),

    #[error("document not in registry: {doc_id}")]
    DocumentNotFound { doc_id: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn config_variant_formats() {
        let err = Error::Config("bad key".into());
        assert_eq!(err.to_string(), "configuration error: bad key");
    }

    #[test]
    fn io_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: Error = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn parse_variant_formats() {
        let err = Error::Parse {
            path: PathBuf::from("doc.md"),
            message: "bad frontmatter".into(),
        };
        let s = err.to_string();
        assert!(s.contains("doc.md"));
        assert!(s.contains("bad frontmatter"));
    }

    #[test]
    fn embedding_provider_variant_formats() {
        let err = Error::EmbeddingProvider("timeout".into());
        assert_eq!(err.to_string(), "embedding provider error: timeout");
    }

    #[test]
    fn llm_provider_variant_formats() {
        let err = Error::LlmProvider("connection refused".into());
        assert_eq!(err.to_string(), "llm provider error: connection refused");
    }

    #[test]
    fn index_not_found_variant_formats() {
        let err = Error::IndexNotFound {
            path: PathBuf::from("/tmp/idx"),
        };
        assert!(err.to_string().contains("/tmp/idx"));
    }

    #[test]
    fn index_corrupted_variant_formats() {
        let err = Error::IndexCorrupted("bad magic".into());
        assert_eq!(err.to_string(), "index corrupted: bad magic");
    }

    #[test]
    fn snapshot_variant_formats() {
        let err = Error::Snapshot("manifest missing".into());
        assert_eq!(err.to_string(), "snapshot error: manifest missing");
    }

    #[test]
    fn document_not_found_variant_formats() {
        let err = Error::DocumentNotFound {
            doc_id: "notes/a.md".into(),
        };
        assert_eq!(err.to_string(), "document not in registry: notes/a.md");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
