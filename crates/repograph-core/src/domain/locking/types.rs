//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the lock file inside a storage directory
pub const LOCK_FILE_NAME: &str = ".lock";

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Lock is already held by a running pass
    #[error("Lock contention: storage '{resource}' is held by process {holder_pid}")]
    Contention { resource: String, holder_pid: u32 },

    /// I/O error during lock operations
    #[error("Lock I/O error: {0}")]
    IoError(String),

    /// Lock file corruption
    #[error("Lock file corrupted: {0}")]
    Corrupted(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Contention { .. } => "E301",
            Self::IoError(_) => "E306",
            Self::Corrupted(_) => "E307",
        }
    }
}

/// Contents of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: Uuid,
    pub storage: String,
    pub holder_pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    /// Create a new lock info for the current process
    pub fn new(storage: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            storage: storage.into(),
            holder_pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    pub fn is_held_by_self(&self) -> bool {
        self.holder_pid == std::process::id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_info_for_current_process() {
        let info = LockInfo::new("storage");
        assert!(info.is_held_by_self());
        assert_eq!(info.storage, "storage");
    }

    #[test]
    fn test_lock_error_codes() {
        let err = LockError::Contention {
            resource: "storage".into(),
            holder_pid: 1,
        };
        assert_eq!(err.code(), "E301");
        assert!(err.to_string().contains("storage"));
    }
}
