//! Gallery persistence: identity → embedding records.
//!
//! Galleries are small (tens to low-thousands of records), so every
//! operation loads the full record list from disk and mutators rewrite it
//! in full. Concurrent writers from separate processes race
//! last-writer-wins; single-process interactive use is the target scale.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding dimension mismatch: gallery holds {expected}-dim embeddings, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("identity label must not be empty")]
    EmptyIdentity,
    #[error("failed to write gallery file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize gallery: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One stored embedding with its identity label and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub identity: String,
    pub embedding: Vec<f32>,
    /// Source image path. Informational only, never interpreted.
    #[serde(default)]
    pub source_path: Option<String>,
    /// RFC 3339 registration timestamp. Informational only.
    #[serde(default)]
    pub created_at: String,
}

/// Durable gallery of face records, one JSON file on disk.
///
/// The handle is stateless: each operation reads the file fresh, so two
/// handles over the same path observe each other's writes.
pub struct FaceStore {
    path: PathBuf,
}

impl FaceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full gallery in append order.
    ///
    /// A missing, unreadable, or corrupt file is an empty gallery, never an
    /// error. Corruption is logged so it does not pass entirely unnoticed.
    pub fn get_all(&self) -> Vec<FaceRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "gallery file unreadable, treating as empty"
                );
                return Vec::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "gallery file corrupt, treating as empty"
                );
                Vec::new()
            }
        }
    }

    /// Append one record and persist the full gallery.
    ///
    /// All embeddings in a gallery must share one dimensionality; a
    /// mismatch is rejected rather than stored, since a mixed gallery can
    /// only produce garbage similarities later.
    pub fn add(
        &self,
        identity: &str,
        embedding: Vec<f32>,
        source_path: Option<&str>,
    ) -> Result<(), StoreError> {
        if identity.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }

        let mut records = self.get_all();
        if let Some(first) = records.first() {
            if first.embedding.len() != embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected: first.embedding.len(),
                    got: embedding.len(),
                });
            }
        }

        records.push(FaceRecord {
            identity: identity.to_string(),
            embedding,
            source_path: source_path.map(str::to_string),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        self.save(&records)
    }

    /// Distinct identity labels, sorted.
    pub fn identities(&self) -> Vec<String> {
        self.count_by_identity().into_keys().collect()
    }

    /// Record count per identity.
    pub fn count_by_identity(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.get_all() {
            *counts.entry(record.identity).or_insert(0) += 1;
        }
        counts
    }

    /// Delete every record under `identity`, returning the number removed.
    /// The gallery is only rewritten when something was actually removed.
    pub fn remove_identity(&self, identity: &str) -> Result<usize, StoreError> {
        let mut records = self.get_all();
        let before = records.len();
        records.retain(|r| r.identity != identity);
        let removed = before - records.len();
        if removed > 0 {
            self.save(&records)?;
            tracing::info!(identity, removed, "identity removed from gallery");
        }
        Ok(removed)
    }

    /// Empty the gallery and persist the empty state.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.save(&[])
    }

    pub fn count(&self) -> usize {
        self.get_all().len()
    }

    fn save(&self, records: &[FaceRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        let json = serde_json::to_vec_pretty(records)?;
        fs::write(&self.path, json).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(
            path = %self.path.display(),
            count = records.len(),
            "gallery saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> FaceStore {
        FaceStore::new(dir.path().join("gallery.json"))
    }

    #[test]
    fn missing_file_is_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.get_all().is_empty());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn corrupt_file_is_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), b"{not json").unwrap();
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn records_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");

        let store = FaceStore::new(&path);
        store
            .add("alice", vec![1.0, 0.0], Some("photos/alice.jpg"))
            .unwrap();
        store.add("bob", vec![0.0, 1.0], None).unwrap();

        let reloaded = FaceStore::new(&path);
        let records = reloaded.get_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].identity, "alice");
        assert_eq!(records[0].embedding, vec![1.0, 0.0]);
        assert_eq!(records[0].source_path.as_deref(), Some("photos/alice.jpg"));
        assert_eq!(records[1].identity, "bob");
        assert!(records[1].source_path.is_none());
    }

    #[test]
    fn add_preserves_append_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for i in 0..5 {
            store.add(&format!("p{i}"), vec![i as f32, 1.0], None).unwrap();
        }
        let order: Vec<String> = store.get_all().into_iter().map(|r| r.identity).collect();
        assert_eq!(order, ["p0", "p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn add_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("alice", vec![1.0, 0.0], None).unwrap();

        let err = store.add("bob", vec![1.0, 0.0, 0.0], None).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                got: 3
            }
        ));
        // The bad record must not have been persisted.
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn add_rejects_empty_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.add("", vec![1.0], None),
            Err(StoreError::EmptyIdentity)
        ));
    }

    #[test]
    fn remove_identity_deletes_all_matching_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        for _ in 0..3 {
            store.add("x", vec![1.0, 0.0], None).unwrap();
        }
        for _ in 0..2 {
            store.add("y", vec![0.0, 1.0], None).unwrap();
        }

        assert_eq!(store.remove_identity("x").unwrap(), 3);
        let remaining = store.get_all();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.identity == "y"));

        // Removing an absent identity is a no-op that reports zero.
        assert_eq!(store.remove_identity("x").unwrap(), 0);
    }

    #[test]
    fn identities_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("bob", vec![1.0], None).unwrap();
        store.add("alice", vec![1.0], None).unwrap();
        store.add("bob", vec![1.0], None).unwrap();

        assert_eq!(store.identities(), ["alice", "bob"]);
        let counts = store.count_by_identity();
        assert_eq!(counts.get("alice"), Some(&1));
        assert_eq!(counts.get("bob"), Some(&2));
    }

    #[test]
    fn clear_persists_empty_gallery() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add("alice", vec![1.0], None).unwrap();
        store.clear().unwrap();
        assert_eq!(store.count(), 0);
        // The file exists and holds a valid empty list.
        assert!(store.path().exists());
        assert!(FaceStore::new(store.path()).get_all().is_empty());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FaceStore::new(dir.path().join("nested/deep/gallery.json"));
        store.add("alice", vec![1.0], None).unwrap();
        assert_eq!(store.count(), 1);
    }
}
