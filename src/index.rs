//! Persistent vector index over nodes.
//!
//! Additive-only: insertion never deduplicates by content (file-level
//! deduplication happens upstream via the ingestion registry) and nodes are
//! never deleted short of a full rebuild. The whole index serializes to one
//! JSON file under the storage directory, written atomically via a temp file
//! rename. A corrupt or unreadable file resets the index to empty rather
//! than failing startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::embedding::cosine_similarity;
use crate::error::PipelineError;
use crate::node::Node;

/// Fixed identifier for the single index this pipeline owns.
pub const INDEX_ID: &str = "vector_index";

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub node: Node,
    pub embedding: Vec<f32>,
}

/// A retrieved node with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VectorIndex {
    index_id: String,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            index_id: INDEX_ID.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Add nodes with their embeddings. Additive only.
    pub fn insert(&mut self, entries: Vec<IndexEntry>) {
        self.entries.extend(entries);
    }

    /// Top-k entries by cosine similarity to the query vector, best first.
    pub fn retrieve(&self, query_vec: &[f32], top_k: usize) -> Vec<ScoredNode> {
        let mut scored: Vec<ScoredNode> = self
            .entries
            .iter()
            .map(|entry| ScoredNode {
                node: entry.node.clone(),
                score: cosine_similarity(query_vec, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        scored
    }

    fn file_path(storage_dir: &Path) -> PathBuf {
        storage_dir.join(INDEX_FILE)
    }

    /// Load the persisted index, or return an empty one when no file exists
    /// or the file cannot be deserialized (logged, not fatal).
    pub fn load(storage_dir: &Path) -> Self {
        let path = Self::file_path(storage_dir);
        if !path.exists() {
            return Self::new();
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read index file, starting empty");
                return Self::new();
            }
        };

        match serde_json::from_str::<VectorIndex>(&content) {
            Ok(index) => index,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "index file corrupt, starting empty");
                Self::new()
            }
        }
    }

    /// Write the full index state to disk. Writes a temp file first and
    /// renames it into place so readers never observe a half-written index.
    pub fn persist(&self, storage_dir: &Path) -> Result<(), PipelineError> {
        let path = Self::file_path(storage_dir);
        let to_persist_err = |e: String| PipelineError::IndexPersist {
            path: path.display().to_string(),
            reason: e,
        };

        std::fs::create_dir_all(storage_dir).map_err(|e| to_persist_err(e.to_string()))?;

        let json = serde_json::to_string(self).map_err(|e| to_persist_err(e.to_string()))?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| to_persist_err(e.to_string()))?;
        std::fs::rename(&tmp_path, &path).map_err(|e| to_persist_err(e.to_string()))?;

        Ok(())
    }
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(page: usize, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            node: Node {
                id: uuid::Uuid::new_v4().to_string(),
                page_num: page,
                file_name: "doc.pdf".to_string(),
                parsed_text: text.to_string(),
                parsed_text_markdown: None,
                image_path: None,
            },
            embedding,
        }
    }

    #[test]
    fn retrieve_orders_by_similarity() {
        let mut index = VectorIndex::new();
        index.insert(vec![
            entry(1, "a", vec![1.0, 0.0]),
            entry(2, "b", vec![0.0, 1.0]),
            entry(3, "c", vec![0.7, 0.7]),
        ]);

        let results = index.retrieve(&[1.0, 0.0], 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].node.page_num, 1);
        assert_eq!(results[1].node.page_num, 3);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn retrieve_on_empty_index_returns_nothing() {
        let index = VectorIndex::new();
        assert!(index.retrieve(&[1.0, 0.0], 9).is_empty());
    }

    #[test]
    fn insert_is_additive() {
        let mut index = VectorIndex::new();
        index.insert(vec![entry(1, "a", vec![1.0])]);
        index.insert(vec![entry(1, "a", vec![1.0])]);
        // Same content twice: no dedup at this layer.
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn persist_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut index = VectorIndex::new();
        index.insert(vec![entry(1, "alpha", vec![0.5, 0.5])]);
        index.persist(tmp.path()).unwrap();

        let loaded = VectorIndex::load(tmp.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries()[0].node.parsed_text, "alpha");
    }

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let index = VectorIndex::load(tmp.path());
        assert!(index.is_empty());
    }

    #[test]
    fn corrupt_file_resets_to_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), "not json at all").unwrap();
        let index = VectorIndex::load(tmp.path());
        assert!(index.is_empty());
    }
}
