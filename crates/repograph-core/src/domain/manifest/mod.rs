//! Per-file processing state that drives incremental passes

mod detector;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::graph::SourceKind;

pub use detector::{ChangeDetector, ChangeSet, DiscoveredFile, FileFailure};

/// Last committed processing of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Absolute path
    pub path: String,
    pub kind: SourceKind,
    pub content_hash: String,
    pub processed_at: DateTime<Utc>,
    pub chunk_ids: BTreeSet<String>,
    pub entity_ids: BTreeSet<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, kind: SourceKind, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            content_hash: content_hash.into(),
            processed_at: Utc::now(),
            chunk_ids: BTreeSet::new(),
            entity_ids: BTreeSet::new(),
        }
    }
}

/// Committed manifest of a storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Root directory of the last committed pass
    pub root: Option<String>,
    pub files: BTreeMap<String, FileRecord>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn hash_of(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|r| r.content_hash.as_str())
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.files.insert(record.path.clone(), record);
    }

    pub fn remove(&mut self, path: &str) -> Option<FileRecord> {
        self.files.remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}
