use async_trait::async_trait;

use crate::llm::CollaboratorError;

use super::{EmbeddingInput, Embedder};

/// Deterministic, offline embedder
///
/// Produces stable vectors from the bytes of the text, so identical text
/// always yields identical vectors. Useful for tests and air-gapped runs.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimensions: 64 }
    }
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, inputs: &[EmbeddingInput]) -> Result<Vec<Vec<f32>>, CollaboratorError> {
        Ok(inputs
            .iter()
            .map(|input| text_to_vec(&input.text, self.dimensions))
            .collect())
    }
}

fn text_to_vec(text: &str, dims: usize) -> Vec<f32> {
    let mut vec = vec![0.0; dims];
    for (i, b) in text.bytes().enumerate() {
        let idx = (i.wrapping_mul(31) + b as usize) % dims;
        vec[idx] += (b as f32) / 255.0;
    }

    // Normalize
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}
