//! Error types for Repograph

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::locking::LockError;

/// Result type alias using Repograph's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Repograph error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // User-facing operation errors (E001-E099)
    #[error("Storage '{0}' not found. Run build_or_update against a directory first.")]
    StorageNotFound(String),

    #[error("Storage '{0}' is locked: another build/update pass is already running.")]
    StorageLocked(String),

    #[error("Path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Invalid storage name '{0}'. Use letters, digits, '_', '-' or '.'.")]
    InvalidStorageName(String),

    // Per-item pipeline errors (E100-E199)
    #[error("Cannot read '{path}': {message}")]
    FileAccess { path: String, message: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Transient collaborator failure ({kind}): {message}")]
    TransientCollaborator { kind: String, message: String },

    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    // Commit errors (E200-E299)
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Invalid pass transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // Lock errors (E300-E399)
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Storage setup failed: {0}")]
    StorageSetup(String),

    // Network errors (E500-E599)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Get the error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::StorageNotFound(_) => "E001",
            Self::StorageLocked(_) => "E002",
            Self::PathNotFound(_) => "E003",
            Self::InvalidStorageName(_) => "E004",
            Self::FileAccess { .. } => "E100",
            Self::Extraction(_) => "E101",
            Self::TransientCollaborator { .. } => "E102",
            Self::Collaborator(_) => "E103",
            Self::ConsistencyViolation(_) => "E200",
            Self::InvalidTransition { .. } => "E201",
            Self::Lock(_) => "E300",
            Self::DatabaseError(_) => "E400",
            Self::StorageSetup(_) => "E401",
            Self::NetworkError(_) => "E500",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Io(_) => "E801",
            Self::Serialization(_) => "E802",
        }
    }

    /// Get a suggestion for fixing this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::StorageNotFound(name) => Some(format!(
                "Build the storage first: build_or_update(<directory>, \"{}\")",
                name
            )),
            Self::StorageLocked(_) => Some("Wait for the running pass to finish".to_string()),
            Self::PathNotFound(_) => Some("Check the directory path".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::ConfigError(_) => Some("Check ~/.config/repograph/config.toml".to_string()),
            Self::ConsistencyViolation(_) => {
                Some("The previous committed state is intact; rerun the pass".to_string())
            }
            _ => None,
        }
    }

    /// Whether this error only affects a single item of a pass
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Self::FileAccess { .. }
                | Self::Extraction(_)
                | Self::TransientCollaborator { .. }
                | Self::Collaborator(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::StorageSetup(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::StorageNotFound("storage".into()).code(), "E001");
        assert_eq!(Error::StorageLocked("storage".into()).code(), "E002");
        assert_eq!(Error::ConsistencyViolation("x".into()).code(), "E200");
    }

    #[test]
    fn test_per_item_classification() {
        let err = Error::FileAccess {
            path: "a.rs".into(),
            message: "denied".into(),
        };
        assert!(err.is_per_item());
        assert!(!Error::ConsistencyViolation("dangling".into()).is_per_item());
        assert!(!Error::StorageLocked("storage".into()).is_per_item());
    }

    #[test]
    fn test_messages_name_the_storage() {
        let msg = Error::StorageNotFound("docs".into()).to_string();
        assert!(msg.contains("docs"));
        assert!(Error::StorageNotFound("docs".into()).suggestion().is_some());
    }
}
