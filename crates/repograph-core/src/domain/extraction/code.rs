//! Structural extraction from code
//!
//! Walks the syntax tree of a whole file down to `max_depth` and emits one
//! entity per declaration plus containment and call relations. The depth is
//! threaded through the traversal; anything deeper is ignored.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::graph::relationship::kinds;
use crate::domain::graph::{SourceKind, ids};

use super::syntax::{Language, SyntaxNode, TYPE_CATEGORIES};
use super::{ExtractedEntity, ExtractedRelationship};

/// Longest declaration text kept for summaries
const MAX_SNIPPET_CHARS: usize = 4000;
const MAX_SIGNATURE_CHARS: usize = 160;

#[derive(Debug, Clone, Default)]
pub struct CodeExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

#[derive(Debug, Clone)]
struct Scope {
    id: String,
    name: String,
    qualified: String,
    is_type: bool,
    declared: bool,
}

#[derive(Debug)]
struct Declaration {
    id: String,
    name: String,
    parent: Option<(String, String)>,
}

#[derive(Default)]
struct Collector {
    entities: Vec<ExtractedEntity>,
    declarations: Vec<Declaration>,
    /// (caller id, caller parent id, callee name)
    calls: Vec<(String, Option<String>, String)>,
}

#[derive(Debug, Clone, Copy)]
pub struct CodeExtractor {
    max_depth: usize,
}

impl CodeExtractor {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Extract entities from `root`
    ///
    /// `path` is the absolute path used for ids; `display_path` is what
    /// descriptions mention.
    pub fn extract(
        &self,
        path: &str,
        display_path: &str,
        language: Language,
        source: &str,
        root: &SyntaxNode,
    ) -> CodeExtraction {
        let mut collector = Collector::default();
        let mut scopes = Vec::new();
        self.visit(
            root,
            0,
            path,
            display_path,
            language,
            source,
            &mut scopes,
            &mut collector,
        );
        build_extraction(collector)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        node: &SyntaxNode,
        depth: usize,
        path: &str,
        display_path: &str,
        language: Language,
        source: &str,
        scopes: &mut Vec<Scope>,
        out: &mut Collector,
    ) {
        if depth > self.max_depth {
            return;
        }

        let mut opened = false;

        if let Some(definition) = language.definition_for(&node.kind) {
            let name = node.declared_name(definition.name_field, source);

            if let Some(name) = name {
                let parent = scopes.last();
                let category = match parent {
                    Some(p) if p.is_type && definition.category == "function" => "method",
                    _ => definition.category,
                };
                let qualified = match parent {
                    Some(p) => format!("{}::{}", p.qualified, name),
                    None => name.to_string(),
                };
                let id = ids::code_entity_id(path, &qualified);

                let mut description = format!("{} `{}` defined in {}", category, name, display_path);
                if let Some(p) = parent {
                    description.push_str(&format!(" within `{}`", p.name));
                }
                let signature = signature_of(node.text(source));
                if !signature.is_empty() {
                    description.push_str(&format!(". Signature: {}", signature));
                }

                out.entities.push(ExtractedEntity {
                    id: id.clone(),
                    name: name.to_string(),
                    category: category.to_string(),
                    description,
                    kind: SourceKind::Code,
                    snippet: Some(truncate_chars(node.text(source), MAX_SNIPPET_CHARS)),
                });
                out.declarations.push(Declaration {
                    id: id.clone(),
                    name: name.to_string(),
                    parent: parent.map(|p| (p.id.clone(), p.name.clone())),
                });

                scopes.push(Scope {
                    id,
                    name: name.to_string(),
                    qualified,
                    is_type: TYPE_CATEGORIES.contains(&category),
                    declared: true,
                });
                opened = true;
            }
        } else if let Some(field) = language.scope_for(&node.kind) {
            if let Some(name) = node.child_by_field(field).and_then(|n| n.last_identifier(source)) {
                let qualified = match scopes.last() {
                    Some(p) => format!("{}::{}", p.qualified, name),
                    None => name.to_string(),
                };
                scopes.push(Scope {
                    id: ids::code_entity_id(path, &qualified),
                    name: name.to_string(),
                    qualified,
                    is_type: true,
                    declared: false,
                });
                opened = true;
            }
        }

        if language.is_call(&node.kind) {
            let callee = match language.callee_field() {
                Some(field) => node.child_by_field(field),
                None => node.children.first(),
            }
            .and_then(|f| f.last_identifier(source));
            let caller = scopes.iter().rev().find(|s| s.declared);
            if let (Some(callee), Some(caller)) = (callee, caller) {
                let caller_parent = out
                    .declarations
                    .iter()
                    .find(|d| d.id == caller.id)
                    .and_then(|d| d.parent.as_ref().map(|(id, _)| id.clone()));
                out.calls
                    .push((caller.id.clone(), caller_parent, callee.to_string()));
            }
        }

        for child in &node.children {
            self.visit(
                child,
                depth + 1,
                path,
                display_path,
                language,
                source,
                scopes,
                out,
            );
        }

        if opened {
            scopes.pop();
        }
    }
}

fn build_extraction(collector: Collector) -> CodeExtraction {
    let Collector {
        mut entities,
        declarations,
        calls,
    } = collector;

    // Duplicate qualified names within a file collapse into one entity
    let mut seen = BTreeSet::new();
    entities.retain(|e| seen.insert(e.id.clone()));
    let declared: BTreeSet<&str> = declarations.iter().map(|d| d.id.as_str()).collect();
    let names: BTreeMap<&str, &str> = declarations
        .iter()
        .map(|d| (d.id.as_str(), d.name.as_str()))
        .collect();

    let mut relationships = Vec::new();

    for decl in &declarations {
        if let Some((parent_id, parent_name)) = &decl.parent {
            if declared.contains(parent_id.as_str()) && parent_id != &decl.id {
                relationships.push(ExtractedRelationship {
                    source_id: parent_id.clone(),
                    target_id: decl.id.clone(),
                    kind: kinds::CONTAINS.to_string(),
                    description: format!("`{}` contains `{}`", parent_name, decl.name),
                    weight: 1.0,
                });
            }
        }
    }

    for (caller_id, caller_parent, callee) in &calls {
        let candidates: Vec<&Declaration> =
            declarations.iter().filter(|d| d.name == *callee).collect();
        let target = match candidates.as_slice() {
            [only] => Some(*only),
            many => many
                .iter()
                .find(|d| d.parent.as_ref().map(|(id, _)| id) == caller_parent.as_ref())
                .copied(),
        };
        let Some(target) = target else {
            continue;
        };
        if target.id == *caller_id {
            continue;
        }
        let caller_name = names.get(caller_id.as_str()).copied().unwrap_or_default();
        relationships.push(ExtractedRelationship {
            source_id: caller_id.clone(),
            target_id: target.id.clone(),
            kind: kinds::CALLS.to_string(),
            description: format!("`{}` calls `{}`", caller_name, target.name),
            weight: 1.0,
        });
    }

    let mut seen = BTreeSet::new();
    relationships.retain(|r| seen.insert((r.source_id.clone(), r.target_id.clone(), r.kind.clone())));

    CodeExtraction {
        entities,
        relationships,
    }
}

/// First line of a declaration, without its body opener
fn signature_of(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    let line = line.trim_end_matches('{').trim_end();
    truncate_chars(line, MAX_SIGNATURE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
