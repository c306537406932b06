pub mod exporter;
pub mod importer;
pub mod verifier;

pub use exporter::{ExportMetadata, ExportStats, Manifest, SnapshotExporter, EXPORT_VERSION};
pub use importer::{ImportResult, SnapshotImporter};
pub use verifier::{SourceStatus, SourceVerifier, VerificationReport};
