//! Ingested-files registry.
//!
//! A plain-text file next to the index, one file path per line, making
//! ingestion idempotent across restarts. The set only grows: paths are never
//! removed short of deleting the storage directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const REGISTRY_FILE: &str = "ingested_files.txt";

pub struct IngestedFilesRegistry {
    path: PathBuf,
}

impl IngestedFilesRegistry {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            path: storage_dir.join(REGISTRY_FILE),
        }
    }

    /// Paths already incorporated into the index. A missing registry file
    /// means nothing has been ingested yet.
    pub fn load(&self) -> std::io::Result<HashSet<String>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Rewrite the registry with the full (old ∪ new) set, sorted for
    /// stable diffs.
    pub fn record(&self, files: &HashSet<String>) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut lines: Vec<&str> = files.iter().map(String::as_str).collect();
        lines.sort_unstable();
        std::fs::write(&self.path, format!("{}\n", lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_set() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = IngestedFilesRegistry::new(tmp.path());
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn record_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = IngestedFilesRegistry::new(tmp.path());

        let mut files = HashSet::new();
        files.insert("/data/a.pdf".to_string());
        files.insert("/data/b.pdf".to_string());
        registry.record(&files).unwrap();

        assert_eq!(registry.load().unwrap(), files);
    }

    #[test]
    fn recording_superset_grows_the_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = IngestedFilesRegistry::new(tmp.path());

        let mut files = HashSet::new();
        files.insert("/data/a.pdf".to_string());
        registry.record(&files).unwrap();

        files.insert("/data/b.pdf".to_string());
        registry.record(&files).unwrap();

        assert_eq!(registry.load().unwrap().len(), 2);
    }
}
