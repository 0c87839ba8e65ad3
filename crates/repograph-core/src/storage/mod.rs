//! Storage layer - SQLite
//!
//! One SQLite database per storage name holds the manifest, the graph and
//! the embedding vectors, so a commit updates all three in one transaction.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//!
//! # Usage
//!
//! ```ignore
//! use repograph_core::storage::Database;
//!
//! // In-memory database for tests
//! let db = Database::in_memory().await?;
//!
//! // Database of a named storage
//! let db = Database::open_storage(&root.join("docs")).await?;
//! ```

pub mod database;
pub mod migrations;

pub use database::{DATABASE_FILE_NAME, Database, DatabaseConfig, storage_database_path};
pub use migrations::{CURRENT_VERSION, run_migrations};
