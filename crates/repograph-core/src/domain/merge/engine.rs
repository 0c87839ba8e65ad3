//! Cross-source entity merging
//!
//! Every current-pass code entity is compared with the candidate pool: all
//! document-side entities plus the other current-pass code entities. Each
//! code entity accepts at most its single best candidate at or above the
//! threshold. Accepted pairs are grouped with union-find, every group keeps
//! one survivor, and the whole set of merges is applied to a copy of the
//! working graph that replaces it only if every merge succeeds.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MergeConfig;
use crate::domain::graph::{Entity, GraphState};
use crate::error::Result;

use super::index::{VectorIndex, cosine_similarity};
use super::rules::ExclusionRuleSet;

/// Why an entity stayed unmerged; not an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnmergedReason {
    Excluded { rule: String },
    NoEmbedding,
    NoCandidates,
    BelowThreshold { best_score: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged {
        absorbed_id: String,
        survivor_id: String,
    },
    Unmerged {
        entity_id: String,
        name: String,
        reason: UnmergedReason,
    },
}

/// A scored candidate pair considered during one merge phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub entity_id: String,
    pub candidate_id: String,
    pub score: f32,
    pub accepted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub decisions: Vec<MergeDecision>,
    pub outcomes: Vec<MergeOutcome>,
}

impl MergeReport {
    pub fn merged_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MergeOutcome::Merged { .. }))
            .count()
    }

    pub fn merges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            MergeOutcome::Merged {
                absorbed_id,
                survivor_id,
            } => Some((absorbed_id.as_str(), survivor_id.as_str())),
            MergeOutcome::Unmerged { .. } => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MergeEngine {
    enabled: bool,
    threshold: f32,
    neighbors: usize,
    rules: ExclusionRuleSet,
}

impl MergeEngine {
    pub fn new(threshold: f32, neighbors: usize, rules: ExclusionRuleSet) -> Self {
        Self {
            enabled: true,
            threshold,
            neighbors: neighbors.max(1),
            rules,
        }
    }

    pub fn from_config(config: &MergeConfig) -> Result<Self> {
        let mut engine = Self::new(
            config.threshold,
            config.neighbors,
            ExclusionRuleSet::from_config(config)?,
        );
        engine.enabled = config.enabled;
        Ok(engine)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// The threshold is inclusive
    pub fn accepts(&self, score: f32) -> bool {
        score >= self.threshold
    }

    pub fn similarity(a: &Entity, b: &Entity) -> Option<f32> {
        match (&a.embedding, &b.embedding) {
            (Some(x), Some(y)) => Some(cosine_similarity(x, y)),
            _ => None,
        }
    }

    /// Merge duplicates among `current_code` and the document-side pool
    pub fn run(&self, state: &mut GraphState, current_code: &BTreeSet<String>) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        if !self.enabled {
            return Ok(report);
        }

        let mut index = VectorIndex::new();
        let mut queries: Vec<&Entity> = Vec::new();

        for entity in state.entities.values() {
            let is_query = current_code.contains(&entity.id);
            if !is_query && !entity.origin.is_document_side() {
                continue;
            }
            if let Some(rule) = self.rules.matching(&entity.name) {
                if is_query {
                    report.outcomes.push(MergeOutcome::Unmerged {
                        entity_id: entity.id.clone(),
                        name: entity.name.clone(),
                        reason: UnmergedReason::Excluded {
                            rule: rule.name().to_string(),
                        },
                    });
                }
                continue;
            }
            let Some(vector) = &entity.embedding else {
                if is_query {
                    report.outcomes.push(MergeOutcome::Unmerged {
                        entity_id: entity.id.clone(),
                        name: entity.name.clone(),
                        reason: UnmergedReason::NoEmbedding,
                    });
                }
                continue;
            };
            index.insert(entity.id.clone(), vector.clone());
            if is_query {
                queries.push(entity);
            }
        }

        let mut edges: BTreeMap<String, String> = BTreeMap::new();
        for query in &queries {
            let Some(vector) = &query.embedding else {
                continue;
            };
            let hits: Vec<(String, f32)> = index
                .search(vector, self.neighbors + 1)
                .into_iter()
                .filter(|(id, _)| id != &query.id)
                .collect();

            let best = hits
                .iter()
                .filter_map(|(id, score)| state.entities.get(id).map(|e| (e, *score)))
                .max_by(|a, b| rank(a, b));

            let Some((candidate, score)) = best else {
                report.outcomes.push(MergeOutcome::Unmerged {
                    entity_id: query.id.clone(),
                    name: query.name.clone(),
                    reason: UnmergedReason::NoCandidates,
                });
                continue;
            };

            let accepted = self.accepts(score);
            report.decisions.push(MergeDecision {
                entity_id: query.id.clone(),
                candidate_id: candidate.id.clone(),
                score,
                accepted,
            });
            if accepted {
                edges.insert(query.id.clone(), candidate.id.clone());
            } else {
                report.outcomes.push(MergeOutcome::Unmerged {
                    entity_id: query.id.clone(),
                    name: query.name.clone(),
                    reason: UnmergedReason::BelowThreshold { best_score: score },
                });
            }
        }

        let query_count = queries.len();
        let plan = plan_merges(state, &edges);
        if plan.is_empty() {
            debug!(queries = query_count, "No merges accepted");
            return Ok(report);
        }

        let mut working = state.clone();
        for (absorbed, survivor) in &plan {
            working.merge_into(absorbed, survivor)?;
        }
        *state = working;

        for (absorbed, survivor) in plan {
            report.outcomes.push(MergeOutcome::Merged {
                absorbed_id: absorbed,
                survivor_id: survivor,
            });
        }
        info!(
            merged = report.merged_count(),
            queries = query_count,
            "Merge phase applied"
        );
        Ok(report)
    }
}

/// Candidate order: score, then most recently committed (uncommitted counts as newest), then lower id
fn rank(a: &(&Entity, f32), b: &(&Entity, f32)) -> Ordering {
    let recency = |e: &Entity| e.committed_at.map_or((1, None), |t| (0, Some(t)));
    a.1.partial_cmp(&b.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| recency(a.0).cmp(&recency(b.0)))
        .then_with(|| b.0.id.cmp(&a.0.id))
}

/// Group accepted edges and pick one survivor per group
///
/// Returns (absorbed, survivor) pairs sorted by absorbed id.
fn plan_merges(state: &GraphState, edges: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut sets = DisjointSet::default();
    for (from, to) in edges {
        sets.union(from, to);
    }

    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for id in sets.members() {
        let root = sets.find(&id);
        groups.entry(root).or_default().insert(id);
    }

    let mut plan = Vec::new();
    for members in groups.values() {
        if members.len() < 2 {
            continue;
        }
        let document_side = members.iter().find(|id| {
            state
                .entities
                .get(*id)
                .is_some_and(|e| e.origin.is_document_side())
        });
        let Some(survivor) = document_side.or_else(|| members.iter().next()) else {
            continue;
        };
        for member in members {
            if member != survivor {
                plan.push((member.clone(), survivor.clone()));
            }
        }
    }
    plan.sort();
    plan
}

#[derive(Debug, Default)]
struct DisjointSet {
    parent: BTreeMap<String, String>,
}

impl DisjointSet {
    fn find(&mut self, id: &str) -> String {
        let parent = match self.parent.get(id) {
            Some(parent) => parent.clone(),
            None => {
                self.parent.insert(id.to_string(), id.to_string());
                return id.to_string();
            }
        };
        if parent == id {
            return parent;
        }
        let root = self.find(&parent);
        self.parent.insert(id.to_string(), root.clone());
        root
    }

    fn union(&mut self, a: &str, b: &str) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        // Lower id becomes the root so grouping does not depend on edge order
        if ra < rb {
            self.parent.insert(rb, ra);
        } else {
            self.parent.insert(ra, rb);
        }
    }

    fn members(&self) -> Vec<String> {
        self.parent.keys().cloned().collect()
    }
}
