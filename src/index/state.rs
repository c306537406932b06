use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::debug;
use usearch::Index as HnswIndex;

use crate::error::{Error, Result};
use crate::index::storage;
use crate::index::types::{
    distance_to_score, IndexMetadata, IndexRow, IndexStatus, QueryMatch, StoredRow,
};

/// Internal mutable state protected by the RwLock.
struct IndexState {
    metadata: IndexMetadata,
    hnsw: HnswIndex,
    id_to_key: HashMap<String, u64>,
    key_to_id: HashMap<u64, String>,
    next_key: u64,
}

/// Persistent vector index over `(id, vector, payload, metadata)` rows.
///
/// Persistence is a directory owned by the backend containing a single
/// `index` file (rkyv metadata + serialized HNSW, written atomically).
/// Thread-safe: mutations take the write lock, queries the read lock.
pub struct VectorIndex {
    dir: PathBuf,
    state: RwLock<IndexState>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn metadata_to_json(metadata: &serde_json::Map<String, serde_json::Value>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

fn metadata_from_json(json: &str) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_str(json).unwrap_or_default()
}

/// All filter fields must equal the row's metadata fields.
fn matches_filter(
    metadata: &serde_json::Map<String, serde_json::Value>,
    filter: &serde_json::Map<String, serde_json::Value>,
) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}

impl VectorIndex {
    fn index_file(dir: &Path) -> PathBuf {
        dir.join("index")
    }

    /// Open an existing index stored under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let (metadata, hnsw) = storage::load_index(&Self::index_file(dir))?;

        let mut id_to_key = HashMap::new();
        let mut key_to_id = HashMap::new();
        let mut next_key = 0u64;
        for (id, row) in &metadata.rows {
            id_to_key.insert(id.clone(), row.hnsw_key);
            key_to_id.insert(row.hnsw_key, id.clone());
            next_key = next_key.max(row.hnsw_key + 1);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(IndexState {
                metadata,
                hnsw,
                id_to_key,
                key_to_id,
                next_key,
            }),
        })
    }

    /// Create a new, empty index under `dir`.
    pub fn create(dir: &Path, dimensions: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let metadata = IndexMetadata {
            rows: HashMap::new(),
            dimensions,
            last_updated: unix_now(),
        };
        let hnsw = storage::create_hnsw(dimensions)?;
        hnsw.reserve(16)
            .map_err(|e| Error::Serialization(format!("usearch reserve: {e}")))?;

        storage::write_index(&Self::index_file(dir), &metadata, &hnsw)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(IndexState {
                metadata,
                hnsw,
                id_to_key: HashMap::new(),
                key_to_id: HashMap::new(),
                next_key: 0,
            }),
        })
    }

    /// Open an existing index or create a new one. An existing index must
    /// have been created with the same dimensionality.
    pub fn open_or_create(dir: &Path, dimensions: usize) -> Result<Self> {
        match Self::open(dir) {
            Ok(index) => {
                let stored = index.dimensions();
                if stored != dimensions {
                    return Err(Error::Config(format!(
                        "index was created with {stored} dimensions but config specifies {dimensions}"
                    )));
                }
                Ok(index)
            }
            Err(Error::IndexNotFound { .. }) => Self::create(dir, dimensions),
            Err(e) => Err(e),
        }
    }

    /// The persistence directory owned by this index.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimensions(&self) -> usize {
        self.state.read().metadata.dimensions
    }

    /// Reload state from disk, discarding the in-memory view. Used after
    /// the persistence directory has been replaced wholesale.
    pub fn reload(&self) -> Result<()> {
        let (metadata, hnsw) = storage::load_index(&Self::index_file(&self.dir))?;

        let mut id_to_key = HashMap::new();
        let mut key_to_id = HashMap::new();
        let mut next_key = 0u64;
        for (id, row) in &metadata.rows {
            id_to_key.insert(id.clone(), row.hnsw_key);
            key_to_id.insert(row.hnsw_key, id.clone());
            next_key = next_key.max(row.hnsw_key + 1);
        }

        let mut state = self.state.write();
        state.metadata = metadata;
        state.hnsw = hnsw;
        state.id_to_key = id_to_key;
        state.key_to_id = key_to_id;
        state.next_key = next_key;
        Ok(())
    }

    /// Persist the index to disk (atomic write-rename).
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.write();
        state.metadata.last_updated = unix_now();
        storage::write_index(&Self::index_file(&self.dir), &state.metadata, &state.hnsw)
    }

    /// Add rows. All slices must have the same length; an existing id is
    /// overwritten.
    pub fn add(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[String],
        metadatas: &[serde_json::Map<String, serde_json::Value>],
    ) -> Result<()> {
        if ids.len() != vectors.len() || ids.len() != payloads.len() || ids.len() != metadatas.len()
        {
            return Err(Error::Index(format!(
                "add: mismatched lengths (ids={}, vectors={}, payloads={}, metadatas={})",
                ids.len(),
                vectors.len(),
                payloads.len(),
                metadatas.len()
            )));
        }
        if ids.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write();
        let dimensions = state.metadata.dimensions;
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(Error::Index(format!(
                    "add: vector has {} dimensions, index expects {dimensions}",
                    vector.len()
                )));
            }
        }

        let needed = state.hnsw.size() + ids.len();
        if state.hnsw.capacity() < needed {
            state
                .hnsw
                .reserve(needed.max(16))
                .map_err(|e| Error::Index(format!("usearch reserve: {e}")))?;
        }

        for i in 0..ids.len() {
            let id = &ids[i];

            // Overwrite: drop the previous vector for this id.
            if let Some(old_key) = state.id_to_key.remove(id) {
                state.key_to_id.remove(&old_key);
                state
                    .hnsw
                    .remove(old_key)
                    .map_err(|e| Error::Index(format!("usearch remove: {e}")))?;
            }

            let key = state.next_key;
            state.next_key += 1;
            state
                .hnsw
                .add(key, &vectors[i])
                .map_err(|e| Error::Index(format!("usearch add: {e}")))?;

            state.id_to_key.insert(id.clone(), key);
            state.key_to_id.insert(key, id.clone());
            state.metadata.rows.insert(
                id.clone(),
                StoredRow {
                    id: id.clone(),
                    vector: vectors[i].clone(),
                    payload: payloads[i].clone(),
                    metadata_json: metadata_to_json(&metadatas[i]),
                    hnsw_key: key,
                },
            );
        }

        debug!(added = ids.len(), total = state.metadata.rows.len(), "rows added");
        Ok(())
    }

    /// Partially update existing rows. Each optional slice, when present,
    /// must match `ids` in length; an unknown id is an error.
    pub fn update(
        &self,
        ids: &[String],
        vectors: Option<&[Vec<f32>]>,
        payloads: Option<&[String]>,
        metadatas: Option<&[serde_json::Map<String, serde_json::Value>]>,
    ) -> Result<()> {
        for (name, len) in [
            ("vectors", vectors.map(|v| v.len())),
            ("payloads", payloads.map(|v| v.len())),
            ("metadatas", metadatas.map(|v| v.len())),
        ] {
            if let Some(len) = len {
                if len != ids.len() {
                    return Err(Error::Index(format!(
                        "update: {name} length {len} does not match ids length {}",
                        ids.len()
                    )));
                }
            }
        }

        let mut state = self.state.write();
        for (i, id) in ids.iter().enumerate() {
            if !state.metadata.rows.contains_key(id) {
                return Err(Error::Index(format!("update: unknown id '{id}'")));
            }

            if let Some(vectors) = vectors {
                let key = state.id_to_key[id];
                state
                    .hnsw
                    .remove(key)
                    .map_err(|e| Error::Index(format!("usearch remove: {e}")))?;
                state
                    .hnsw
                    .add(key, &vectors[i])
                    .map_err(|e| Error::Index(format!("usearch add: {e}")))?;
                if let Some(row) = state.metadata.rows.get_mut(id) {
                    row.vector = vectors[i].clone();
                }
            }
            if let Some(payloads) = payloads {
                if let Some(row) = state.metadata.rows.get_mut(id) {
                    row.payload = payloads[i].clone();
                }
            }
            if let Some(metadatas) = metadatas {
                if let Some(row) = state.metadata.rows.get_mut(id) {
                    row.metadata_json = metadata_to_json(&metadatas[i]);
                }
            }
        }
        Ok(())
    }

    /// Delete rows by id. Unknown ids are ignored.
    pub fn delete(&self, ids: &[String]) -> Result<()> {
        let mut state = self.state.write();
        for id in ids {
            if state.metadata.rows.remove(id).is_some() {
                if let Some(key) = state.id_to_key.remove(id) {
                    state.key_to_id.remove(&key);
                    state
                        .hnsw
                        .remove(key)
                        .map_err(|e| Error::Index(format!("usearch remove: {e}")))?;
                }
            }
        }
        Ok(())
    }

    /// Top-k rows by cosine similarity, ordered by ascending distance.
    ///
    /// With a metadata filter the backend is over-fetched 3x before
    /// filtering, so heavily filtered queries may return fewer than `k`.
    pub fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Vec<QueryMatch>> {
        let state = self.state.read();
        if vector.len() != state.metadata.dimensions {
            return Err(Error::Index(format!(
                "query: vector has {} dimensions, index expects {}",
                vector.len(),
                state.metadata.dimensions
            )));
        }
        if k == 0 || state.metadata.rows.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = if filter.is_some() { k * 3 } else { k };
        let matches = state
            .hnsw
            .search(vector, fetch)
            .map_err(|e| Error::Index(format!("usearch search: {e}")))?;

        let mut results = Vec::new();
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            let Some(id) = state.key_to_id.get(key) else {
                continue;
            };
            let Some(row) = state.metadata.rows.get(id) else {
                continue;
            };

            let metadata = metadata_from_json(&row.metadata_json);
            if let Some(filter) = filter {
                if !matches_filter(&metadata, filter) {
                    continue;
                }
            }

            let distance = *distance as f64;
            results.push(QueryMatch {
                id: id.clone(),
                distance,
                score: distance_to_score(distance),
                payload: row.payload.clone(),
                metadata,
            });

            if results.len() >= k {
                break;
            }
        }

        Ok(results)
    }

    /// Fetch rows by id (request order, missing ids skipped) or by filter
    /// (sorted by id), optionally limited.
    pub fn get(
        &self,
        ids: Option<&[String]>,
        filter: Option<&serde_json::Map<String, serde_json::Value>>,
        limit: Option<usize>,
    ) -> Vec<IndexRow> {
        let state = self.state.read();
        let limit = limit.unwrap_or(usize::MAX);

        let to_row = |row: &StoredRow| IndexRow {
            id: row.id.clone(),
            vector: row.vector.clone(),
            payload: row.payload.clone(),
            metadata: metadata_from_json(&row.metadata_json),
        };

        match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| state.metadata.rows.get(id))
                .map(to_row)
                .filter(|row| filter.map_or(true, |f| matches_filter(&row.metadata, f)))
                .take(limit)
                .collect(),
            None => {
                let mut all: Vec<IndexRow> = state
                    .metadata
                    .rows
                    .values()
                    .map(to_row)
                    .filter(|row| filter.map_or(true, |f| matches_filter(&row.metadata, f)))
                    .collect();
                all.sort_by(|a, b| a.id.cmp(&b.id));
                all.truncate(limit);
                all
            }
        }
    }

    /// Number of rows in the index.
    pub fn count(&self) -> usize {
        self.state.read().metadata.rows.len()
    }

    /// Delete every row and persist the empty index.
    pub fn reset(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            let dimensions = state.metadata.dimensions;
            state.metadata.rows.clear();
            state.id_to_key.clear();
            state.key_to_id.clear();
            state.next_key = 0;
            state.hnsw = storage::create_hnsw(dimensions)?;
            state
                .hnsw
                .reserve(16)
                .map_err(|e| Error::Index(format!("usearch reserve: {e}")))?;
        }
        self.save()
    }

    /// Add rows in batches with generated ids. Returns the ids in input order.
    pub fn add_batch(
        &self,
        vectors: &[Vec<f32>],
        payloads: &[String],
        metadatas: &[serde_json::Map<String, serde_json::Value>],
        batch_size: usize,
    ) -> Result<Vec<String>> {
        if vectors.is_empty() {
            return Ok(Vec::new());
        }
        let batch_size = batch_size.max(1);

        let start = self.state.read().next_key;
        let ids: Vec<String> = (0..vectors.len())
            .map(|i| format!("row-{}", start + i as u64))
            .collect();

        let mut offset = 0;
        while offset < vectors.len() {
            let end = (offset + batch_size).min(vectors.len());
            self.add(
                &ids[offset..end],
                &vectors[offset..end],
                &payloads[offset..end],
                &metadatas[offset..end],
            )?;
            offset = end;
        }

        Ok(ids)
    }

    /// Return a status snapshot.
    pub fn status(&self) -> IndexStatus {
        let state = self.state.read();
        let file_size = std::fs::metadata(Self::index_file(&self.dir))
            .map(|m| m.len())
            .unwrap_or(0);
        IndexStatus {
            row_count: state.metadata.rows.len(),
            vector_count: state.hnsw.size(),
            dimensions: state.metadata.dimensions,
            last_updated: state.metadata.last_updated,
            file_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIMS: usize = 4;

    fn meta(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    fn new_index(dir: &TempDir) -> VectorIndex {
        VectorIndex::create(&dir.path().join("vector_db"), DIMS).unwrap()
    }

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; DIMS];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn create_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_db");
        {
            let index = VectorIndex::create(&path, DIMS).unwrap();
            index
                .add(
                    &["a".into()],
                    &[unit(0)],
                    &["payload-a".into()],
                    &[meta(&[("source_file", "a.md")])],
                )
                .unwrap();
            index.save().unwrap();
        }

        let index = VectorIndex::open(&path).unwrap();
        assert_eq!(index.count(), 1);
        let rows = index.get(Some(&["a".to_string()]), None, None);
        assert_eq!(rows[0].payload, "payload-a");
        assert_eq!(rows[0].metadata.get("source_file").unwrap(), "a.md");
    }

    #[test]
    fn open_or_create_rejects_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_db");
        VectorIndex::create(&path, DIMS).unwrap();
        let result = VectorIndex::open_or_create(&path, DIMS + 1);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn add_rejects_mismatched_lengths() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        let result = index.add(&["a".into()], &[], &[], &[]);
        assert!(matches!(result, Err(Error::Index(_))));
    }

    #[test]
    fn add_rejects_wrong_dimensions() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        let result = index.add(
            &["a".into()],
            &[vec![1.0; DIMS + 1]],
            &["p".into()],
            &[meta(&[])],
        );
        assert!(matches!(result, Err(Error::Index(_))));
    }

    #[test]
    fn duplicate_id_overwrites() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(&["a".into()], &[unit(0)], &["first".into()], &[meta(&[])])
            .unwrap();
        index
            .add(&["a".into()], &[unit(1)], &["second".into()], &[meta(&[])])
            .unwrap();

        assert_eq!(index.count(), 1);
        let rows = index.get(Some(&["a".to_string()]), None, None);
        assert_eq!(rows[0].payload, "second");

        let matches = index.query(&unit(1), 1, None).unwrap();
        assert_eq!(matches[0].id, "a");
        assert!(matches[0].score > 0.99);
    }

    #[test]
    fn query_orders_by_similarity() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(
                &["x".into(), "y".into(), "z".into()],
                &[unit(0), unit(1), vec![0.9, 0.1, 0.0, 0.0]],
                &["px".into(), "py".into(), "pz".into()],
                &[meta(&[]), meta(&[]), meta(&[])],
            )
            .unwrap();

        let matches = index.query(&unit(0), 3, None).unwrap();
        assert_eq!(matches[0].id, "x");
        assert_eq!(matches[1].id, "z");
        assert_eq!(matches[2].id, "y");
        assert!(matches[0].score >= matches[1].score);
        assert!(matches[1].score >= matches[2].score);
    }

    #[test]
    fn query_with_filter() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(
                &["a".into(), "b".into()],
                &[unit(0), vec![0.95, 0.05, 0.0, 0.0]],
                &["pa".into(), "pb".into()],
                &[
                    meta(&[("source_file", "a.md")]),
                    meta(&[("source_file", "b.md")]),
                ],
            )
            .unwrap();

        let filter = meta(&[("source_file", "b.md")]);
        let matches = index.query(&unit(0), 2, Some(&filter)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "b");
    }

    #[test]
    fn query_empty_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        assert!(index.query(&unit(0), 5, None).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_rows_and_ignores_unknown() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(
                &["a".into(), "b".into()],
                &[unit(0), unit(1)],
                &["pa".into(), "pb".into()],
                &[meta(&[]), meta(&[])],
            )
            .unwrap();

        index.delete(&["a".into(), "ghost".into()]).unwrap();
        assert_eq!(index.count(), 1);
        let matches = index.query(&unit(0), 2, None).unwrap();
        assert!(matches.iter().all(|m| m.id != "a"));
    }

    #[test]
    fn update_payload_and_vector() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(&["a".into()], &[unit(0)], &["old".into()], &[meta(&[])])
            .unwrap();

        index
            .update(
                &["a".into()],
                Some(&[unit(1)]),
                Some(&["new".into()]),
                None,
            )
            .unwrap();

        let rows = index.get(Some(&["a".to_string()]), None, None);
        assert_eq!(rows[0].payload, "new");
        let matches = index.query(&unit(1), 1, None).unwrap();
        assert_eq!(matches[0].id, "a");
        assert!(matches[0].score > 0.99);
    }

    #[test]
    fn update_unknown_id_errors() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        let result = index.update(&["ghost".into()], None, Some(&["p".into()]), None);
        assert!(matches!(result, Err(Error::Index(_))));
    }

    #[test]
    fn get_all_sorted_with_limit() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(
                &["b".into(), "a".into(), "c".into()],
                &[unit(0), unit(1), unit(2)],
                &["pb".into(), "pa".into(), "pc".into()],
                &[meta(&[]), meta(&[]), meta(&[])],
            )
            .unwrap();

        let rows = index.get(None, None, Some(2));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "a");
        assert_eq!(rows[1].id, "b");
    }

    #[test]
    fn reset_clears_everything() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(&["a".into()], &[unit(0)], &["p".into()], &[meta(&[])])
            .unwrap();
        index.reset().unwrap();
        assert_eq!(index.count(), 0);
        assert!(index.query(&unit(0), 1, None).unwrap().is_empty());
    }

    #[test]
    fn add_batch_generates_ids() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        let ids = index
            .add_batch(
                &[unit(0), unit(1), unit(2)],
                &["p0".into(), "p1".into(), "p2".into()],
                &[meta(&[]), meta(&[]), meta(&[])],
                2,
            )
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(index.count(), 3);
        let rows = index.get(Some(&ids), None, None);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].payload, "p0");
    }

    #[test]
    fn status_reports_counts() {
        let dir = TempDir::new().unwrap();
        let index = new_index(&dir);
        index
            .add(&["a".into()], &[unit(0)], &["p".into()], &[meta(&[])])
            .unwrap();
        index.save().unwrap();

        let status = index.status();
        assert_eq!(status.row_count, 1);
        assert_eq!(status.vector_count, 1);
        assert_eq!(status.dimensions, DIMS);
        assert!(status.file_size > 0);
        assert!(status.last_updated > 0);
    }
}
