//! Incremental build/update passes
//!
//! - `state`: the pass state machine
//! - `orchestrator`: runs diff, extraction, embedding and merge phases
//! - `synchronizer`: checks consistency and commits the delta
//! - `report`: what a pass did

pub mod orchestrator;
pub mod report;
pub mod state;
pub mod synchronizer;

pub use orchestrator::UpdateOrchestrator;
pub use report::{EmbeddingSkip, PassReport};
pub use state::PassState;
pub use synchronizer::StoreSynchronizer;
