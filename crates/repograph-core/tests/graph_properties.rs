//! Graph-level guarantees of incremental passes: idempotence, deletion
//! cascade, merge symmetry, threshold boundary and exclusion.

mod common;

use std::sync::Arc;

use common::{FixedEmbedder, Harness, ScriptedModel, entity_named, near, snapshot, unit};
use repograph_core::DEFAULT_STORAGE;
use repograph_core::config::Config;
use repograph_core::domain::graph::{Entity, EntityOrigin};
use repograph_core::domain::merge::{MergeEngine, MergeOutcome, UnmergedReason, cosine_similarity};

const CODE: &str = "user_repository.rs";
const DOC: &str = "design.md";
const LEDGER: &str = "ledger.rs";

fn user_repository_repo(h: &Harness) {
    h.write(CODE, "pub struct UserRepository;\n");
    h.write(DOC, "# Design\n\nThe UserRepository component stores user records.\n");
}

fn user_repository_model() -> ScriptedModel {
    ScriptedModel::new().entity(
        "UserRepository component",
        "UserRepository component",
        "component",
        "Stores user records",
    )
}

fn user_repository_embedder(cos: f32) -> FixedEmbedder {
    FixedEmbedder::new()
        .with("UserRepository", unit(0))
        .with("UserRepository component", near(0, cos))
}

async fn merged_count_at(threshold: f32, cos: f32) -> usize {
    let h = Harness::new();
    user_repository_repo(&h);
    let mut config = h.config();
    config.merge.threshold = threshold;
    let graph = h.graph(
        config,
        Arc::new(user_repository_model()),
        Arc::new(user_repository_embedder(cos)),
    );
    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    report.merged_count()
}

#[tokio::test]
async fn test_user_repository_merges_with_document_mention() {
    let h = Harness::new();
    user_repository_repo(&h);
    let graph = h.graph(
        h.config(),
        Arc::new(user_repository_model()),
        Arc::new(user_repository_embedder(0.97)),
    );

    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.merged_count(), 1);

    let state = h.state(DEFAULT_STORAGE).await;
    let (code_path, doc_path) = (h.abs(CODE), h.abs(DOC));
    let merged: Vec<&Entity> = state
        .entities
        .values()
        .filter(|e| e.source_paths.contains(&code_path) && e.source_paths.contains(&doc_path))
        .collect();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].origin, EntityOrigin::Merged);
    assert!(merged[0].description.contains("Stores user records"));
    assert!(merged[0].description.contains("UserRepository"));

    assert!(entity_named(&state, "UserRepository").is_empty());
    assert_eq!(state.retired.len(), 1);
    assert_eq!(state.retired.values().next(), Some(&merged[0].id));
}

#[tokio::test]
async fn test_threshold_boundary_is_inclusive() {
    let cos = 0.96;
    let score = cosine_similarity(&unit(0), &near(0, cos));

    assert_eq!(merged_count_at(score, cos).await, 1);

    let just_above = f32::from_bits(score.to_bits() + 1);
    assert!(just_above > score);
    assert_eq!(merged_count_at(just_above, cos).await, 0);
}

#[test]
fn test_similarity_is_symmetric() {
    let pairs = [
        (unit(0), near(0, 0.97)),
        (near(2, 0.31), unit(3)),
        (vec![0.3; common::DIMENSIONS], near(0, 0.5)),
    ];
    for (a, b) in &pairs {
        assert_eq!(cosine_similarity(a, b), cosine_similarity(b, a));

        let ea = Entity::new("ent-a", "Alpha", "class", EntityOrigin::Code).with_embedding(a.clone());
        let eb = Entity::new("ent-b", "Beta", "concept", EntityOrigin::Document).with_embedding(b.clone());
        assert_eq!(MergeEngine::similarity(&ea, &eb), MergeEngine::similarity(&eb, &ea));
    }
}

#[tokio::test]
async fn test_merge_outcome_independent_of_concurrency() {
    let h = Harness::new();
    user_repository_repo(&h);
    h.write("order_book.rs", "pub struct OrderBook;\n");
    h.write("trading.md", "The OrderBook ledger matches trades.\n");
    h.write(LEDGER, "pub struct InvoiceLedger;\n");

    let model = || {
        user_repository_model().entity(
            "OrderBook ledger",
            "OrderBook ledger",
            "component",
            "Matches trades",
        )
    };
    let embedder = || {
        user_repository_embedder(0.97)
            .with("OrderBook", unit(2))
            .with("OrderBook ledger", near(2, 0.98))
    };

    let mut serial_config = h.config();
    serial_config.pipeline.parallel_num = 1;
    serial_config.pipeline.embedding_batch_size = 1;
    let mut parallel_config = h.config();
    parallel_config.pipeline.parallel_num = 8;
    parallel_config.pipeline.embedding_batch_size = 32;

    let serial = h.graph(serial_config, Arc::new(model()), Arc::new(embedder()));
    let parallel = h.graph(parallel_config, Arc::new(model()), Arc::new(embedder()));

    let a = serial.build_or_update(h.repo.path(), "serial").await.unwrap();
    let b = parallel.build_or_update(h.repo.path(), "parallel").await.unwrap();
    assert_eq!(a.merged_count(), 2);
    assert_eq!(b.merged_count(), 2);

    let serial_state = h.state("serial").await;
    let parallel_state = h.state("parallel").await;
    assert_eq!(snapshot(&serial_state), snapshot(&parallel_state));
    assert_eq!(serial_state.retired, parallel_state.retired);
    assert_eq!(entity_named(&serial_state, "InvoiceLedger").len(), 1);
}

#[tokio::test]
async fn test_second_pass_without_changes_is_a_no_op() {
    let h = Harness::new();
    user_repository_repo(&h);
    h.write(LEDGER, "pub struct InvoiceLedger;\n");
    let embedder = Arc::new(user_repository_embedder(0.97));
    let graph = h.graph(h.config(), Arc::new(user_repository_model()), embedder.clone());

    let first = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(first.committed);
    let before = h.state(DEFAULT_STORAGE).await;
    let calls = embedder.calls();

    let second = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(!second.committed);
    assert_eq!(second.unchanged, 3);
    assert_eq!(second.added + second.modified + second.deleted, 0);
    assert_eq!(second.merged_count(), 0);

    let after = h.state(DEFAULT_STORAGE).await;
    assert_eq!(before, after);
    assert_eq!(embedder.calls(), calls);
}

#[tokio::test]
async fn test_deleting_files_cascades() {
    let h = Harness::new();
    user_repository_repo(&h);
    h.write(LEDGER, "pub struct InvoiceLedger;\n");
    let graph = h.graph(
        h.config(),
        Arc::new(user_repository_model()),
        Arc::new(user_repository_embedder(0.97)),
    );
    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    let before = h.state(DEFAULT_STORAGE).await;
    let survivor_id = before.retired.values().next().cloned().unwrap();

    h.remove(CODE);
    h.remove(LEDGER);
    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.deleted, 2);

    let state = h.state(DEFAULT_STORAGE).await;
    assert!(entity_named(&state, "InvoiceLedger").is_empty());

    let survivor = state.entities.get(&survivor_id).unwrap();
    assert_eq!(survivor.source_paths.len(), 1);
    assert!(survivor.source_paths.contains(&h.abs(DOC)));
    assert_eq!(survivor.description, "Stores user records");

    let (code_path, ledger_path) = (h.abs(CODE), h.abs(LEDGER));
    assert!(state.chunks.values().all(|c| c.path != code_path && c.path != ledger_path));
    assert!(
        state
            .entities
            .values()
            .all(|e| !e.source_paths.contains(&code_path) && !e.source_paths.contains(&ledger_path))
    );
}

#[tokio::test]
async fn test_modified_file_with_same_entities_keeps_ids_and_descriptions() {
    let h = Harness::new();
    user_repository_repo(&h);
    let graph = h.graph(
        h.config(),
        Arc::new(user_repository_model()),
        Arc::new(user_repository_embedder(0.97)),
    );
    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    let before = h.state(DEFAULT_STORAGE).await;

    let edits = [
        (CODE, "// Storage layer\n\npub struct UserRepository;\n"),
        (DOC, "# Design\n\nThe UserRepository component stores user records.\n\n"),
    ];
    for (file, content) in edits {
        h.write(file, content);
        let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
        assert!(report.committed, "{file}");
        assert_eq!(report.modified, 1, "{file}");
        assert_eq!(report.merged_count(), 0, "{file}");
        assert_eq!(report.entities_upserted, 0, "{file}");

        let after = h.state(DEFAULT_STORAGE).await;
        assert_eq!(snapshot(&before), snapshot(&after), "{file}");
        assert_eq!(before.retired, after.retired, "{file}");
    }
}

#[tokio::test]
async fn test_excluded_name_is_never_a_merge_candidate() {
    async fn run(config: impl FnOnce(&mut Config)) -> (usize, Vec<MergeOutcome>) {
        let h = Harness::new();
        h.write("legacy.rs", "pub struct LegacyStore;\n");
        h.write("records.md", "The StoreOfRecord keeps old rows.\n");
        let mut cfg = h.config();
        config(&mut cfg);
        let graph = h.graph(
            cfg,
            Arc::new(ScriptedModel::new().entity("StoreOfRecord", "StoreOfRecord", "component", "Keeps old rows")),
            Arc::new(
                FixedEmbedder::new()
                    .with("LegacyStore", unit(0))
                    .with("StoreOfRecord", near(0, 0.99)),
            ),
        );
        let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
        (report.merged_count(), report.merge_outcomes)
    }

    let (merged, _) = run(|_| {}).await;
    assert_eq!(merged, 1);

    let (merged, outcomes) = run(|c| c.merge.custom_patterns = vec!["legacy*".to_string()]).await;
    assert_eq!(merged, 0);
    assert!(outcomes.iter().any(|o| matches!(
        o,
        MergeOutcome::Unmerged { name, reason: UnmergedReason::Excluded { rule }, .. }
            if name == "LegacyStore" && rule == "custom_pattern"
    )));
}

#[tokio::test]
async fn test_generic_names_are_never_merged() {
    let h = Harness::new();
    h.write("a.rs", "pub fn get() -> u32 {\n    1\n}\n");
    h.write("b.rs", "pub fn get() -> u32 {\n    2\n}\n");
    let graph = h.graph(
        h.config(),
        Arc::new(ScriptedModel::new()),
        Arc::new(FixedEmbedder::new().with("get", unit(0))),
    );

    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert_eq!(report.merged_count(), 0);
    let excluded = report
        .merge_outcomes
        .iter()
        .filter(|o| matches!(
            o,
            MergeOutcome::Unmerged { reason: UnmergedReason::Excluded { rule }, .. } if rule == "generic_term"
        ))
        .count();
    assert_eq!(excluded, 2);

    let state = h.state(DEFAULT_STORAGE).await;
    let gets = entity_named(&state, "get");
    assert_eq!(gets.len(), 2);
    assert_ne!(gets[0].id, gets[1].id);
    assert!(gets.iter().all(|e| e.origin == EntityOrigin::Code));
    assert!(state.retired.is_empty());
}
