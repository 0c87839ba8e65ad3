//! Storage lock manager

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::guard::{Registry, StorageLockGuard};
use super::types::{LOCK_FILE_NAME, LockError, LockInfo, LockResult};

/// Hands out exclusive, non-waiting locks per storage
#[derive(Debug, Clone, Default)]
pub struct StorageLockManager {
    registry: Registry,
}

impl StorageLockManager {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lock `storage`, whose files live in `storage_dir`; never waits
    pub fn try_acquire(&self, storage: &str, storage_dir: &Path) -> LockResult<StorageLockGuard> {
        let mut active = self
            .registry
            .lock()
            .map_err(|_| LockError::IoError("lock registry poisoned".to_string()))?;

        if active.contains_key(storage) {
            return Err(LockError::Contention {
                resource: storage.to_string(),
                holder_pid: std::process::id(),
            });
        }

        std::fs::create_dir_all(storage_dir).map_err(|e| {
            LockError::IoError(format!("Failed to create storage directory: {}", e))
        })?;
        let lock_file = storage_dir.join(LOCK_FILE_NAME);

        if lock_file.exists() {
            match read_lock_file(&lock_file) {
                Ok(existing) if !existing.is_held_by_self() && is_process_alive(existing.holder_pid) => {
                    return Err(LockError::Contention {
                        resource: storage.to_string(),
                        holder_pid: existing.holder_pid,
                    });
                }
                Ok(existing) => {
                    // Not in the registry, so a leftover from a pass that did not finish
                    info!(storage, holder_pid = existing.holder_pid, "Reclaiming stale storage lock");
                }
                Err(LockError::Corrupted(_)) => {
                    debug!(path = %lock_file.display(), "Overwriting corrupted lock file");
                }
                Err(e) => return Err(e),
            }
            std::fs::remove_file(&lock_file).map_err(|e| {
                LockError::IoError(format!("Failed to remove stale lock file: {}", e))
            })?;
        }

        let info = LockInfo::new(storage);
        write_lock_file(&lock_file, &info)?;

        active.insert(storage.to_string(), info.id);
        debug!(storage, lock_id = %info.id, "Storage lock acquired");

        Ok(StorageLockGuard::new(info, lock_file, self.registry.clone()))
    }

    /// Whether a pass in this process holds `storage`
    pub fn is_locked(&self, storage: &str) -> bool {
        self.registry
            .lock()
            .map(|active| active.contains_key(storage))
            .unwrap_or(false)
    }

    /// Path of the lock file for a storage directory
    pub fn lock_file_path(storage_dir: &Path) -> PathBuf {
        storage_dir.join(LOCK_FILE_NAME)
    }
}

fn write_lock_file(path: &Path, info: &LockInfo) -> LockResult<()> {
    let json = serde_json::to_string_pretty(info)
        .map_err(|e| LockError::IoError(format!("Failed to serialize lock info: {}", e)))?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            // Another process created it between our check and this write
            ErrorKind::AlreadyExists => LockError::Contention {
                resource: info.storage.clone(),
                holder_pid: 0,
            },
            _ => LockError::IoError(format!("Failed to write lock file: {}", e)),
        })?;
    file.write_all(json.as_bytes())
        .map_err(|e| LockError::IoError(format!("Failed to write lock file: {}", e)))?;

    Ok(())
}

fn read_lock_file(path: &Path) -> LockResult<LockInfo> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| LockError::IoError(format!("Failed to read lock file: {}", e)))?;

    serde_json::from_str(&contents)
        .map_err(|e| LockError::Corrupted(format!("Failed to parse lock file: {}", e)))
}

/// Check if a process is still alive
fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let manager = StorageLockManager::new();

        let guard = manager.try_acquire("storage", dir.path()).unwrap();
        assert!(manager.is_locked("storage"));
        assert!(dir.path().join(LOCK_FILE_NAME).exists());
        assert_eq!(guard.storage(), "storage");

        drop(guard);
        assert!(!manager.is_locked("storage"));
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn test_second_acquire_is_contention() {
        let dir = TempDir::new().unwrap();
        let manager = StorageLockManager::new();

        let _guard = manager.try_acquire("storage", dir.path()).unwrap();
        let err = manager.try_acquire("storage", dir.path()).unwrap_err();
        assert!(matches!(err, LockError::Contention { .. }));
    }

    #[test]
    fn test_independent_storages() {
        let dir = TempDir::new().unwrap();
        let manager = StorageLockManager::new();
        let _a = manager.try_acquire("a", &dir.path().join("a")).unwrap();
        let _b = manager.try_acquire("b", &dir.path().join("b")).unwrap();
    }

    #[test]
    fn test_leftover_lock_file_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let leftover = LockInfo::new("storage");
        std::fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_string(&leftover).unwrap(),
        )
        .unwrap();

        let manager = StorageLockManager::new();
        let guard = manager.try_acquire("storage", dir.path()).unwrap();
        assert_ne!(guard.id(), leftover.id);
    }

    #[test]
    fn test_corrupted_lock_file_is_overwritten() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "not json").unwrap();
        let manager = StorageLockManager::new();
        assert!(manager.try_acquire("storage", dir.path()).is_ok());
    }
}
