//! Graph entities
//!
//! An entity is a named concept: a code declaration or a concept mentioned in
//! documentation. Descriptions are kept as per-source fragments so a file can
//! be detached and re-attached without disturbing what other files
//! contributed.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EntityText;
use crate::domain::merge::normalize_name;

/// Separator between accumulated description fragments
pub const DESCRIPTION_SEPARATOR: &str = "<SEP>";

/// Kind of source a file or chunk comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Code,
    Document,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where an entity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityOrigin {
    Code,
    Document,
    /// A document entity that absorbed at least one code entity
    Merged,
}

impl EntityOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Document => "document",
            Self::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "document" => Some(Self::Document),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }

    /// Document-side entities form the persistent merge candidate pool
    pub fn is_document_side(&self) -> bool {
        matches!(self, Self::Document | Self::Merged)
    }
}

impl From<SourceKind> for EntityOrigin {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Code => Self::Code,
            SourceKind::Document => Self::Document,
        }
    }
}

impl fmt::Display for EntityOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Description text contributed by one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionFragment {
    pub source_path: String,
    pub text: String,
}

/// A node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable id; survives merges as the survivor id
    pub id: String,
    /// Display name as first extracted
    pub name: String,
    /// Normalized name used for matching
    pub canonical_name: String,
    /// Open category tag (class, function, concept, ...)
    pub category: String,
    /// Rendered from `fragments`
    pub description: String,
    pub fragments: Vec<DescriptionFragment>,
    pub source_paths: BTreeSet<String>,
    pub origin: EntityOrigin,
    pub embedding: Option<Vec<f32>>,
    /// When this entity was last written by a commit
    pub committed_at: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
        origin: EntityOrigin,
    ) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            canonical_name: normalize_name(&name),
            name,
            category: category.into(),
            description: String::new(),
            fragments: Vec::new(),
            source_paths: BTreeSet::new(),
            origin,
            embedding: None,
            committed_at: None,
        }
    }

    /// Builder: add a description fragment from a source file
    pub fn with_fragment(mut self, source_path: &str, text: &str) -> Self {
        self.add_fragment(source_path, text);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Record a contribution from `source_path`; identical fragments are kept once
    pub fn add_fragment(&mut self, source_path: &str, text: &str) {
        self.source_paths.insert(source_path.to_string());
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let exists = self
            .fragments
            .iter()
            .any(|f| f.source_path == source_path && f.text == text);
        if !exists {
            self.fragments.push(DescriptionFragment {
                source_path: source_path.to_string(),
                text: text.to_string(),
            });
        }
        self.rebuild_description();
    }

    /// Drop everything `path` contributed; returns whether any source remains
    pub fn detach_path(&mut self, path: &str) -> bool {
        self.source_paths.remove(path);
        self.fragments.retain(|f| f.source_path != path);
        self.rebuild_description();
        !self.source_paths.is_empty()
    }

    /// Take over another entity's fragments and source paths
    pub fn absorb(&mut self, other: &Entity) {
        for path in &other.source_paths {
            self.source_paths.insert(path.clone());
        }
        for fragment in &other.fragments {
            if !self.fragments.contains(fragment) {
                self.fragments.push(fragment.clone());
            }
        }
        self.rebuild_description();
    }

    /// Fragments render ordered by source path, then text, so re-attaching a
    /// file reproduces the same description regardless of attach order
    fn rebuild_description(&mut self) {
        self.fragments.sort_by(|a, b| {
            a.source_path
                .cmp(&b.source_path)
                .then_with(|| a.text.cmp(&b.text))
        });
        let mut seen: Vec<&str> = Vec::new();
        for fragment in &self.fragments {
            if !seen.contains(&fragment.text.as_str()) {
                seen.push(&fragment.text);
            }
        }
        self.description = seen.join(DESCRIPTION_SEPARATOR);
    }

    /// Text handed to the embedder for this entity
    pub fn embedding_text(&self, mode: EntityText) -> String {
        match mode {
            EntityText::Name => self.name.clone(),
            EntityText::NameAndDescription if self.description.is_empty() => self.name.clone(),
            EntityText::NameAndDescription => {
                format!("{}\n{}", self.name, self.description.replace(DESCRIPTION_SEPARATOR, "\n"))
            }
        }
    }

    /// Equality ignoring commit bookkeeping
    pub fn same_content(&self, other: &Entity) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.canonical_name == other.canonical_name
            && self.category == other.category
            && self.description == other.description
            && self.fragments == other.fragments
            && self.source_paths == other.source_paths
            && self.origin == other.origin
            && self.embedding == other.embedding
    }

    /// Rough token count of the rendered entity
    pub fn token_estimate(&self) -> usize {
        super::estimate_tokens(&self.name) + super::estimate_tokens(&self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_normalizes_name() {
        let entity = Entity::new("ent-1", "UserRepository", "class", EntityOrigin::Code);
        assert_eq!(entity.canonical_name, "userrepository");
        assert!(entity.description.is_empty());
    }

    #[test]
    fn test_fragments_deduplicate_and_render() {
        let mut entity = Entity::new("ent-1", "Cache", "concept", EntityOrigin::Document)
            .with_fragment("/r/a.md", "An LRU cache")
            .with_fragment("/r/b.md", "An LRU cache")
            .with_fragment("/r/b.md", "Evicts least recently used");
        entity.add_fragment("/r/a.md", "An LRU cache");

        assert_eq!(entity.fragments.len(), 3);
        assert_eq!(
            entity.description,
            format!("An LRU cache{}Evicts least recently used", DESCRIPTION_SEPARATOR)
        );
        assert_eq!(entity.source_paths.len(), 2);
    }

    #[test]
    fn test_description_independent_of_attach_order() {
        let mut entity = Entity::new("ent-1", "UserRepository", "component", EntityOrigin::Merged)
            .with_fragment("/r/design.md", "Stores user records")
            .with_fragment("/r/user_repository.rs", "struct `UserRepository`");
        let before = entity.description.clone();

        entity.detach_path("/r/design.md");
        entity.add_fragment("/r/design.md", "Stores user records");
        assert_eq!(entity.description, before);
        assert!(entity.description.starts_with("Stores user records"));
    }

    #[test]
    fn test_detach_path_keeps_other_sources() {
        let mut entity = Entity::new("ent-1", "Cache", "concept", EntityOrigin::Merged)
            .with_fragment("/r/a.md", "doc text")
            .with_fragment("/r/cache.rs", "struct text");

        assert!(entity.detach_path("/r/cache.rs"));
        assert_eq!(entity.description, "doc text");
        assert!(!entity.detach_path("/r/a.md"));
    }

    #[test]
    fn test_absorb_unions_paths() {
        let mut doc = Entity::new("ent-d", "UserRepository", "component", EntityOrigin::Document)
            .with_fragment("/r/design.md", "Stores users");
        let code = Entity::new("ent-c", "UserRepository", "class", EntityOrigin::Code)
            .with_fragment("/r/repo.py", "class `UserRepository` defined in repo.py");

        doc.absorb(&code);
        assert!(doc.source_paths.contains("/r/design.md"));
        assert!(doc.source_paths.contains("/r/repo.py"));
        assert!(doc.description.starts_with("Stores users"));
    }

    #[test]
    fn test_embedding_text_modes() {
        let entity = Entity::new("ent-1", "Cache", "concept", EntityOrigin::Document)
            .with_fragment("/r/a.md", "An LRU cache");
        assert_eq!(entity.embedding_text(EntityText::Name), "Cache");
        assert_eq!(
            entity.embedding_text(EntityText::NameAndDescription),
            "Cache\nAn LRU cache"
        );
    }

    #[test]
    fn test_origin_round_trip() {
        for origin in [EntityOrigin::Code, EntityOrigin::Document, EntityOrigin::Merged] {
            assert_eq!(EntityOrigin::parse(origin.as_str()), Some(origin));
        }
        assert!(EntityOrigin::Merged.is_document_side());
        assert!(!EntityOrigin::Code.is_document_side());
    }
}
