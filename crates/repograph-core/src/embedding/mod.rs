//! Embedding collaborators
//!
//! An [`Embedder`] maps a batch of `(id, text)` pairs to parallel vectors.
//! Calls must be idempotent per id, and failures are reported as transient
//! (retry) or permanent (skip and log) through [`CollaboratorError`].

mod hash;
mod http;

use async_trait::async_trait;

use crate::llm::CollaboratorError;

pub use hash::HashEmbedder;
pub use http::HttpEmbedder;

/// One item to embed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingInput {
    pub id: String,
    pub text: String,
}

impl EmbeddingInput {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logging
    fn model_name(&self) -> &str;

    /// Vector dimensionality
    fn dimensions(&self) -> usize;

    /// Embed a batch; the result is parallel to `inputs`
    async fn embed(&self, inputs: &[EmbeddingInput]) -> Result<Vec<Vec<f32>>, CollaboratorError>;
}

/// Check that a batch response is parallel to its request
pub fn check_batch(
    inputs: &[EmbeddingInput],
    vectors: &[Vec<f32>],
    dimensions: usize,
) -> Result<(), CollaboratorError> {
    if inputs.len() != vectors.len() {
        return Err(CollaboratorError::permanent(format!(
            "embedding batch returned {} vectors for {} inputs",
            vectors.len(),
            inputs.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(CollaboratorError::permanent(format!(
            "dimension mismatch: expected {}, got {}",
            dimensions,
            bad.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_batch() {
        let inputs = vec![EmbeddingInput::new("a", "alpha")];
        assert!(check_batch(&inputs, &[vec![0.0, 1.0]], 2).is_ok());
        assert!(check_batch(&inputs, &[], 2).is_err());
        assert!(check_batch(&inputs, &[vec![0.0]], 2).is_err());
    }
}
