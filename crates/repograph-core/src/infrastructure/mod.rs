//! Infrastructure layer
//!
//! Implementations of the domain seams backed by external libraries:
//! the tree-sitter syntax parser and the SQLite graph store.

pub mod parser;
pub mod store;

pub use parser::{MAX_TREE_DEPTH, TreeSitterParser};
pub use store::{SqliteGraphStore, decode_vector, encode_vector};
