//! Graph store implementations

pub mod sqlite;

pub use sqlite::{SqliteGraphStore, decode_vector, encode_vector};
