//! Exact nearest-neighbor search by cosine similarity

use std::cmp::Ordering;

/// Compute cosine similarity between two vectors
///
/// Symmetric: the same pair always yields the same score in either order.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

/// Flat vector index over string ids
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<(String, Vec<f32>)>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, vector: Vec<f32>) {
        self.entries.push((id.into(), vector));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `limit` ids by score, highest first; equal scores order by id
    ///
    /// Entries tied with the last kept score are all kept, so callers that
    /// break ties on something other than id see every tied candidate.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<(String, f32)> {
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .filter(|(_, score)| score.is_finite())
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        if let Some(cutoff) = limit.checked_sub(1).and_then(|i| scored.get(i)).map(|(_, s)| *s) {
            let keep = scored
                .iter()
                .position(|(_, score)| *score < cutoff)
                .unwrap_or(scored.len());
            scored.truncate(keep);
        } else if limit == 0 {
            scored.clear();
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = vec![0.3, -1.2, 4.5, 0.01];
        let b = vec![2.2, 0.7, -0.4, 9.0];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
    }

    #[test]
    fn test_search_orders_by_score_then_id() {
        let mut index = VectorIndex::new();
        index.insert("b", vec![1.0, 0.0]);
        index.insert("a", vec![1.0, 0.0]);
        index.insert("c", vec![0.0, 1.0]);
        let hits = index.search(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "a");
        assert_eq!(hits[1].0, "b");
    }

    #[test]
    fn test_search_keeps_ties_at_cutoff() {
        let mut index = VectorIndex::new();
        index.insert("top", vec![1.0, 0.0]);
        for id in ["d", "c", "b", "a"] {
            index.insert(id, vec![0.6, 0.8]);
        }
        index.insert("far", vec![0.0, 1.0]);

        let hits = index.search(&[1.0, 0.0], 2);
        let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["top", "a", "b", "c", "d"]);
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
    }
}
