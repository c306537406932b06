use std::collections::HashMap;

/// A row stored in the index, with rkyv derives for zero-copy loading.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct StoredRow {
    /// Caller-supplied row id (chunk id during ingestion).
    pub id: String,
    /// The embedding vector. The HNSW holds a copy for search; this one
    /// backs `get` and rebuilds.
    pub vector: Vec<f32>,
    /// The row payload (chunk text).
    pub payload: String,
    /// Metadata as a JSON object string.
    pub metadata_json: String,
    /// Key of this row's vector inside the HNSW.
    pub hnsw_key: u64,
}

/// Serialized metadata region of the index file.
#[derive(Debug, Clone, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct IndexMetadata {
    /// Map from row id to stored row.
    pub rows: HashMap<String, StoredRow>,
    /// Vector dimensionality this index was created with.
    pub dimensions: usize,
    /// Unix timestamp (seconds since epoch) of last save.
    pub last_updated: u64,
}

/// Status snapshot returned by `VectorIndex::status()`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStatus {
    /// Number of rows in the index.
    pub row_count: usize,
    /// Number of vectors in the HNSW.
    pub vector_count: usize,
    /// Vector dimensionality.
    pub dimensions: usize,
    /// Unix timestamp of last save.
    pub last_updated: u64,
    /// Size of the index file on disk in bytes.
    pub file_size: u64,
}

/// A row returned by `VectorIndex::get`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexRow {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A similarity match returned by `VectorIndex::query`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueryMatch {
    pub id: String,
    /// Raw distance from the backend (cosine distance).
    pub distance: f64,
    /// Bounded similarity score in [0, 1].
    pub score: f64,
    pub payload: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Convert a backend distance to a bounded similarity score.
///
/// Cosine distances live in [0, 2] and map to `1 - d/2`. Distances above 2
/// come from unnormalized backends and fall back to `1 / (1 + d/100)`.
pub fn distance_to_score(distance: f64) -> f64 {
    let score = if distance > 2.0 {
        1.0 / (1.0 + distance / 100.0)
    } else {
        1.0 - distance / 2.0
    };
    score.clamp(0.0, 1.0)
}
