//! On-disk response cache.
//!
//! Short-circuits the whole query pipeline on repeat questions. The key is
//! the literal, unnormalized query string — queries differing by whitespace
//! or case are cache-distinct. Entries expire by TTL only; re-ingestion does
//! not invalidate, so a stale answer can be served until its hour is up.
//! One JSON file per entry, named by the sha256 of the query, written via a
//! temp file rename so concurrent readers never see a partial record.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::warn;

/// The cached result triple for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub response: String,
    pub confidence: f64,
    pub source_files: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    expires_at: i64,
    value: CachedAnswer,
}

pub struct ResponseCache {
    dir: PathBuf,
    ttl_secs: u64,
}

impl ResponseCache {
    pub fn new(dir: PathBuf, ttl_secs: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl_secs })
    }

    fn entry_path(&self, query: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    /// Cached answer for the literal query, if present and unexpired.
    /// Expired entries are removed on read.
    pub fn get(&self, query: &str) -> Option<CachedAnswer> {
        let path = self.entry_path(query);
        let content = std::fs::read_to_string(&path).ok()?;

        let record: CacheRecord = match serde_json::from_str(&content) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "dropping unreadable cache entry");
                let _ = std::fs::remove_file(&path);
                return None;
            }
        };

        if record.expires_at <= Utc::now().timestamp() {
            let _ = std::fs::remove_file(&path);
            return None;
        }

        Some(record.value)
    }

    pub fn set(&self, query: &str, value: &CachedAnswer) {
        let record = CacheRecord {
            expires_at: Utc::now().timestamp() + self.ttl_secs as i64,
            value: value.clone(),
        };

        let path = self.entry_path(query);
        let tmp_path = path.with_extension("json.tmp");

        let write = || -> std::io::Result<()> {
            let json = serde_json::to_string(&record)?;
            std::fs::write(&tmp_path, json)?;
            std::fs::rename(&tmp_path, &path)
        };

        // A failed cache write costs a re-computation, never the query.
        if let Err(e) = write() {
            warn!(path = %path.display(), error = %e, "failed to write cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str) -> CachedAnswer {
        CachedAnswer {
            response: text.to_string(),
            confidence: 0.85,
            source_files: vec!["Page 1 from doc.pdf".to_string()],
        }
    }

    #[test]
    fn round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(tmp.path().to_path_buf(), 3600).unwrap();

        assert!(cache.get("q").is_none());
        cache.set("q", &answer("a"));
        assert_eq!(cache.get("q").unwrap(), answer("a"));
    }

    #[test]
    fn keys_are_literal_query_strings() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(tmp.path().to_path_buf(), 3600).unwrap();

        cache.set("What is X?", &answer("a"));
        assert!(cache.get("what is x?").is_none());
        assert!(cache.get("What is X? ").is_none());
        assert!(cache.get("What is X?").is_some());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(tmp.path().to_path_buf(), 3600).unwrap();
        cache.set("q", &answer("a"));

        // Rewrite the record with an expiry in the past.
        let path = cache.entry_path("q");
        let record = CacheRecord {
            expires_at: Utc::now().timestamp() - 1,
            value: answer("a"),
        };
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        assert!(cache.get("q").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_entry_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(tmp.path().to_path_buf(), 3600).unwrap();
        let path = cache.entry_path("q");
        std::fs::write(&path, "garbage").unwrap();

        assert!(cache.get("q").is_none());
        assert!(!path.exists());
    }
}
