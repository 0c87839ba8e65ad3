//! RAII guard for a storage lock

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use super::types::LockInfo;

pub(crate) type Registry = Arc<Mutex<HashMap<String, Uuid>>>;

/// Holds a storage lock; the lock is released when the guard is dropped
#[derive(Debug)]
pub struct StorageLockGuard {
    info: LockInfo,
    lock_file: PathBuf,
    registry: Registry,
    released: bool,
}

impl StorageLockGuard {
    pub(crate) fn new(info: LockInfo, lock_file: PathBuf, registry: Registry) -> Self {
        Self {
            info,
            lock_file,
            registry,
            released: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.info.id
    }

    pub fn storage(&self) -> &str {
        &self.info.storage
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Explicitly release the lock (normally done automatically on drop)
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.registry.lock() {
            Ok(mut active) => {
                if active.get(&self.info.storage) == Some(&self.info.id) {
                    active.remove(&self.info.storage);
                }
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(&self.info.storage);
            }
        }

        // Only remove the file if it is still ours
        let ours = std::fs::read_to_string(&self.lock_file)
            .ok()
            .and_then(|contents| serde_json::from_str::<LockInfo>(&contents).ok())
            .is_some_and(|info| info.id == self.info.id);
        if ours {
            if let Err(e) = std::fs::remove_file(&self.lock_file) {
                warn!(path = %self.lock_file.display(), error = %e, "Failed to remove lock file");
            }
        }
        debug!(storage = %self.info.storage, "Storage lock released");
    }
}

impl Drop for StorageLockGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Display for StorageLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lock[storage:{}]", self.info.storage)
    }
}
