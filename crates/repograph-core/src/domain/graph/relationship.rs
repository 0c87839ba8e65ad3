//! Directed, typed edges between entities

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::entity::DESCRIPTION_SEPARATOR;

/// Well-known relation kinds emitted by code extraction
pub mod kinds {
    pub const CONTAINS: &str = "contains";
    pub const CALLS: &str = "calls";
}

/// Identity of a relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
}

impl RelationshipKey {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind: kind.into(),
        }
    }

    pub fn touches(&self, entity_id: &str) -> bool {
        self.source_id == entity_id || self.target_id == entity_id
    }
}

/// Contribution of one source file to a relationship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationFragment {
    pub source_path: String,
    pub text: String,
    pub weight: f32,
}

/// A directed edge; cycles are allowed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_id: String,
    pub target_id: String,
    pub kind: String,
    pub description: String,
    /// Strongest contributed weight
    pub weight: f32,
    pub fragments: Vec<RelationFragment>,
    pub source_paths: BTreeSet<String>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind: kind.into(),
            description: String::new(),
            weight: 0.0,
            fragments: Vec::new(),
            source_paths: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey::new(&self.source_id, &self.target_id, &self.kind)
    }

    pub fn with_fragment(mut self, source_path: &str, text: &str, weight: f32) -> Self {
        self.add_fragment(source_path, text, weight);
        self
    }

    pub fn add_fragment(&mut self, source_path: &str, text: &str, weight: f32) {
        self.source_paths.insert(source_path.to_string());
        let fragment = RelationFragment {
            source_path: source_path.to_string(),
            text: text.trim().to_string(),
            weight,
        };
        if !self.fragments.contains(&fragment) {
            self.fragments.push(fragment);
        }
        self.rebuild();
    }

    /// Drop everything `path` contributed; returns whether any source remains
    pub fn detach_path(&mut self, path: &str) -> bool {
        self.source_paths.remove(path);
        self.fragments.retain(|f| f.source_path != path);
        self.rebuild();
        !self.source_paths.is_empty()
    }

    /// Merge a colliding edge into this one
    pub fn absorb(&mut self, other: &Relationship) {
        for path in &other.source_paths {
            self.source_paths.insert(path.clone());
        }
        for fragment in &other.fragments {
            if !self.fragments.contains(fragment) {
                self.fragments.push(fragment.clone());
            }
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.fragments.sort_by(|a, b| {
            a.source_path
                .cmp(&b.source_path)
                .then_with(|| a.text.cmp(&b.text))
                .then_with(|| a.weight.total_cmp(&b.weight))
        });
        let mut seen: Vec<&str> = Vec::new();
        for fragment in &self.fragments {
            if !fragment.text.is_empty() && !seen.contains(&fragment.text.as_str()) {
                seen.push(&fragment.text);
            }
        }
        self.description = seen.join(DESCRIPTION_SEPARATOR);
        self.weight = self
            .fragments
            .iter()
            .map(|f| f.weight)
            .fold(0.0f32, f32::max);
    }

    pub fn token_estimate(&self) -> usize {
        super::estimate_tokens(&self.kind) + super::estimate_tokens(&self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_is_max_of_fragments() {
        let rel = Relationship::new("a", "b", kinds::CALLS)
            .with_fragment("/r/a.rs", "a calls b", 0.5)
            .with_fragment("/r/b.md", "a uses b", 0.9);
        assert_eq!(rel.weight, 0.9);
        assert_eq!(rel.source_paths.len(), 2);
    }

    #[test]
    fn test_detach_recomputes() {
        let mut rel = Relationship::new("a", "b", kinds::CALLS)
            .with_fragment("/r/a.rs", "a calls b", 0.5)
            .with_fragment("/r/b.md", "a uses b", 0.9);
        assert!(rel.detach_path("/r/b.md"));
        assert_eq!(rel.weight, 0.5);
        assert_eq!(rel.description, "a calls b");
        assert!(!rel.detach_path("/r/a.rs"));
    }

    #[test]
    fn test_key_touches() {
        let key = RelationshipKey::new("a", "b", kinds::CONTAINS);
        assert!(key.touches("a"));
        assert!(key.touches("b"));
        assert!(!key.touches("c"));
    }
}
