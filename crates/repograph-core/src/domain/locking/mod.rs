//! Storage locking
//!
//! At most one build/update pass may run against a storage at a time. The
//! lock is held in an in-process registry and mirrored in a lock file next
//! to the storage so other processes see it too.
//!
//! # Example
//!
//! ```ignore
//! let manager = StorageLockManager::new();
//! let guard = manager.try_acquire("docs", &storage_dir)?;
//! // run the pass...
//! drop(guard); // lock file removed
//! ```

pub mod guard;
pub mod manager;
pub mod types;

pub use guard::StorageLockGuard;
pub use manager::StorageLockManager;
pub use types::{LOCK_FILE_NAME, LockError, LockInfo, LockResult};
