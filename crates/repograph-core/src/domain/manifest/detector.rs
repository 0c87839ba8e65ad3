//! Change detection against the committed manifest
//!
//! Walks the root directory, classifies files as code or documents and
//! compares SHA-256 content hashes with the manifest. Pure: nothing is
//! written here.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::FilesConfig;
use crate::domain::extraction::Language;
use crate::domain::graph::{SourceKind, ids};
use crate::error::{Error, Result};

use super::Manifest;

/// A file in scope for this pass, read and hashed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Absolute path
    pub path: String,
    /// Path relative to the root, `/`-separated
    pub relative_path: String,
    pub kind: SourceKind,
    pub language: Option<Language>,
    pub content_hash: String,
    pub content: String,
}

/// A file that could not be read; its committed state is kept as is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub message: String,
}

/// Result of diffing the directory against the manifest
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Canonical root directory
    pub root: String,
    pub added: Vec<DiscoveredFile>,
    pub modified: Vec<DiscoveredFile>,
    pub deleted: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
    pub failures: Vec<FileFailure>,
}

impl ChangeSet {
    /// Added and modified files, sorted by path
    pub fn to_process(&self) -> impl Iterator<Item = &DiscoveredFile> {
        let mut files: Vec<&DiscoveredFile> = self.added.iter().chain(self.modified.iter()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.into_iter()
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.modified.is_empty() || !self.deleted.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    document_extensions: BTreeSet<String>,
    special_file_names: BTreeSet<String>,
    exclude: GlobSet,
    max_file_bytes: u64,
    code_languages: BTreeSet<Language>,
}

impl ChangeDetector {
    pub fn new(config: &FilesConfig) -> Result<Self> {
        Ok(Self {
            document_extensions: config
                .document_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            special_file_names: config
                .special_file_names
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            exclude: build_globset(&config.exclude)?,
            max_file_bytes: config.max_file_bytes,
            code_languages: Language::ALL.into_iter().collect(),
        })
    }

    /// Restrict code files to languages the parser supports
    pub fn with_code_languages(mut self, languages: impl IntoIterator<Item = Language>) -> Self {
        self.code_languages = languages.into_iter().collect();
        self
    }

    fn is_excluded(&self, relative: &Path) -> bool {
        if self.exclude.is_match(relative) {
            return true;
        }
        relative
            .components()
            .any(|c| self.exclude.is_match(c.as_os_str()))
    }

    /// Classify a path; `None` means out of scope
    pub fn classify(&self, path: &Path) -> Option<(SourceKind, Option<Language>)> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase);

        let is_document = extension
            .as_ref()
            .is_some_and(|e| self.document_extensions.contains(e))
            || stem
                .as_ref()
                .is_some_and(|s| self.special_file_names.contains(s));
        if is_document {
            return Some((SourceKind::Document, None));
        }

        Language::from_path(path)
            .filter(|l| self.code_languages.contains(l))
            .map(|l| (SourceKind::Code, Some(l)))
    }

    /// Diff `root` against `manifest`
    pub fn detect(&self, root: &Path, manifest: &Manifest) -> Result<ChangeSet> {
        if !root.is_dir() {
            return Err(Error::PathNotFound(root.to_path_buf()));
        }
        let root = root
            .canonicalize()
            .map_err(|_| Error::PathNotFound(root.to_path_buf()))?;

        let mut changes = ChangeSet {
            root: root.to_string_lossy().to_string(),
            ..ChangeSet::default()
        };
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut unreadable: Vec<PathBuf> = Vec::new();

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                relative.as_os_str().is_empty() || !self.is_excluded(relative)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    warn!(path = %path, error = %e, "Skipping unreadable directory entry");
                    if let Some(p) = e.path() {
                        unreadable.push(p.to_path_buf());
                    }
                    changes.failures.push(FileFailure {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some((kind, language)) = self.classify(path) else {
                continue;
            };
            let absolute = path.to_string_lossy().to_string();
            let relative = path
                .strip_prefix(&root)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");

            let content = match self.read(path) {
                Ok(content) => content,
                Err(message) => {
                    warn!(path = %absolute, error = %message, "File access failure");
                    seen.insert(absolute.clone());
                    changes.failures.push(FileFailure {
                        path: absolute,
                        message,
                    });
                    continue;
                }
            };

            if kind == SourceKind::Code && content.trim().is_empty() {
                debug!(path = %absolute, "Skipping empty code file");
                continue;
            }

            seen.insert(absolute.clone());
            let content_hash = ids::content_hash(content.as_bytes());
            let file = DiscoveredFile {
                path: absolute.clone(),
                relative_path: relative,
                kind,
                language,
                content_hash,
                content,
            };

            match manifest.hash_of(&absolute) {
                None => changes.added.push(file),
                Some(hash) if hash != file.content_hash => changes.modified.push(file),
                Some(_) => {
                    changes.unchanged.insert(absolute);
                }
            }
        }

        settle_unseen(manifest, &seen, &unreadable, &mut changes);

        debug!(
            root = %changes.root,
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            unchanged = changes.unchanged.len(),
            failures = changes.failures.len(),
            "Change detection complete"
        );
        Ok(changes)
    }

    fn read(&self, path: &Path) -> std::result::Result<String, String> {
        let metadata = std::fs::metadata(path).map_err(|e| e.to_string())?;
        if metadata.len() > self.max_file_bytes {
            return Err(format!(
                "file is {} bytes, limit is {}",
                metadata.len(),
                self.max_file_bytes
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_string())
    }
}

/// Sort manifest entries the walk did not reach into deleted or kept
fn settle_unseen(
    manifest: &Manifest,
    seen: &BTreeSet<String>,
    unreadable: &[PathBuf],
    changes: &mut ChangeSet,
) {
    for path in manifest.paths() {
        if seen.contains(path) {
            continue;
        }
        if is_under_any(path, unreadable) {
            changes.unchanged.insert(path.to_string());
        } else {
            changes.deleted.insert(path.to_string());
        }
    }
}

/// Whether `path` lies at or below one of `prefixes`
///
/// Manifest entries under a directory that could not be walked keep their
/// committed state instead of being reported as deleted.
fn is_under_any(path: &str, prefixes: &[PathBuf]) -> bool {
    let path = Path::new(path);
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::ConfigError(format!("invalid exclude pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::ConfigError(format!("invalid exclude patterns: {}", e)))
}
