//! Repograph Core Integration Tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FixedEmbedder, Harness, SCRIPTED_ANSWER, ScriptedModel, entity_named, near, unit};
use repograph_core::prelude::*;

fn model() -> ScriptedModel {
    ScriptedModel::new().entity(
        "UserRepository component",
        "UserRepository component",
        "component",
        "Stores user records",
    )
}

fn embedder() -> FixedEmbedder {
    FixedEmbedder::new()
        .with("UserRepository", unit(0))
        .with("UserRepository component", near(0, 0.97))
}

fn small_repo(h: &Harness) {
    h.write("src/user_repository.rs", "pub struct UserRepository;\n\npub fn load_user() {}\n");
    h.write("docs/design.md", "# Design\n\nThe UserRepository component stores user records.\n");
    h.write("README", "Repository overview.\n");
}

#[tokio::test]
async fn test_build_then_query() {
    let h = Harness::new();
    small_repo(&h);
    let model = Arc::new(model());
    let graph = h.graph(h.config(), model.clone(), Arc::new(embedder()));

    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.state, PassState::Idle);
    assert_eq!(report.added, 3);
    assert_eq!(report.failure_count(), 0);

    let answer = graph.query("Where are users stored?", DEFAULT_STORAGE).await.unwrap();
    assert_eq!(answer.text, SCRIPTED_ANSWER);
    assert!(!answer.entities.is_empty());
    assert!(!answer.chunks.is_empty());
    assert_eq!(model.answers(), 1);
}

#[tokio::test]
async fn test_analysis_model_answers_queries() {
    let h = Harness::new();
    small_repo(&h);
    let extraction = Arc::new(model());
    let analysis = Arc::new(ScriptedModel::new());
    let graph = h
        .graph(h.config(), extraction.clone(), Arc::new(embedder()))
        .with_analysis_model(analysis.clone());

    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    graph.query("Where are users stored?", DEFAULT_STORAGE).await.unwrap();
    graph.plan("Add an email column", DEFAULT_STORAGE).await.unwrap();

    assert_eq!(analysis.answers(), 2);
    assert_eq!(extraction.answers(), 0);
    let state = h.state(DEFAULT_STORAGE).await;
    assert_eq!(entity_named(&state, "UserRepository component").len(), 1);
}

#[tokio::test]
async fn test_plan_cites_graph_items() {
    let h = Harness::new();
    small_repo(&h);
    let model = Arc::new(model());
    let graph = h.graph(h.config(), model.clone(), Arc::new(embedder()));
    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();

    let answer = graph
        .plan("Add an email column to users", DEFAULT_STORAGE)
        .await
        .unwrap();
    assert_eq!(answer.text, SCRIPTED_ANSWER);
    assert!(answer.entities.iter().any(|e| e.name == "UserRepository component"));
}

#[tokio::test]
async fn test_query_before_any_pass() {
    let h = Harness::new();
    let graph = h.graph(h.config(), Arc::new(model()), Arc::new(embedder()));

    let err = graph.query("anything?", DEFAULT_STORAGE).await.unwrap_err();
    assert!(matches!(err, Error::StorageNotFound(ref name) if name == DEFAULT_STORAGE));
    let err = graph.plan("change it", "other").await.unwrap_err();
    assert!(matches!(err, Error::StorageNotFound(_)));
}

#[tokio::test]
async fn test_empty_question_is_rejected() {
    let h = Harness::new();
    small_repo(&h);
    let graph = h.graph(h.config(), Arc::new(model()), Arc::new(embedder()));
    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();

    let err = graph.query("   ", DEFAULT_STORAGE).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_missing_directory() {
    let h = Harness::new();
    let graph = h.graph(h.config(), Arc::new(model()), Arc::new(embedder()));

    let err = graph
        .build_or_update(&h.repo.path().join("nope"), DEFAULT_STORAGE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PathNotFound(_)));
    assert_eq!(err.code(), "E003");
}

#[tokio::test]
async fn test_invalid_storage_name() {
    let h = Harness::new();
    small_repo(&h);
    let graph = h.graph(h.config(), Arc::new(model()), Arc::new(embedder()));

    let err = graph.build_or_update(h.repo.path(), "../escape").await.unwrap_err();
    assert!(matches!(err, Error::InvalidStorageName(_)));
}

#[tokio::test]
async fn test_concurrent_pass_on_same_storage_is_rejected() {
    let h = Harness::new();
    small_repo(&h);
    let slow = Arc::new(model().with_delay(Duration::from_millis(200)));
    let graph = h.graph(h.config(), slow, Arc::new(embedder()));

    let (first, second) = tokio::join!(
        graph.build_or_update(h.repo.path(), DEFAULT_STORAGE),
        graph.build_or_update(h.repo.path(), DEFAULT_STORAGE),
    );
    let (done, rejected) = match (first, second) {
        (Ok(report), Err(err)) | (Err(err), Ok(report)) => (report, err),
        (first, second) => panic!("expected one pass to be rejected: {first:?} / {second:?}"),
    };
    assert!(done.committed);
    assert!(matches!(rejected, Error::StorageLocked(ref name) if name == DEFAULT_STORAGE));

    // Released once the first pass finished
    let third = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(!third.committed);
    assert!(!h.storage_dir(DEFAULT_STORAGE).join(".lock").exists());
}

#[tokio::test]
async fn test_separate_storages_run_concurrently() {
    let h = Harness::new();
    small_repo(&h);
    let graph = h.graph(
        h.config(),
        Arc::new(model().with_delay(Duration::from_millis(50))),
        Arc::new(embedder()),
    );

    let (a, b) = tokio::join!(
        graph.build_or_update(h.repo.path(), "alpha"),
        graph.build_or_update(h.repo.path(), "beta"),
    );
    assert!(a.unwrap().committed);
    assert!(b.unwrap().committed);
}

#[tokio::test]
async fn test_oversized_file_is_skipped_not_fatal() {
    let h = Harness::new();
    h.write("small.rs", "pub struct UserRepository;\n");
    h.write("big.md", &"UserRepository component. ".repeat(20));
    let mut config = h.config();
    config.files.max_file_bytes = 64;
    let graph = h.graph(config, Arc::new(model()), Arc::new(embedder()));

    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.file_failures.len(), 1);
    assert!(report.file_failures[0].path.ends_with("big.md"));

    let state = h.state(DEFAULT_STORAGE).await;
    assert_eq!(entity_named(&state, "UserRepository").len(), 1);
}

#[tokio::test]
async fn test_failed_chunk_extraction_is_recorded() {
    let h = Harness::new();
    small_repo(&h);
    h.write("docs/broken.md", "This chunk makes the extractor fail.\n");
    let failing = Arc::new(model().failing_on("extractor fail"));
    let graph = h.graph(h.config(), failing, Arc::new(embedder()));

    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.chunk_failures.len(), 1);
    assert!(report.chunk_failures[0].path.ends_with("broken.md"));
    assert_eq!(report.merged_count(), 1);

    // The failed file is still committed; its chunk stays searchable
    let state = h.state(DEFAULT_STORAGE).await;
    assert!(state.chunks.values().any(|c| c.path.ends_with("broken.md")));
}

#[tokio::test]
async fn test_stats_follow_commits() {
    let h = Harness::new();
    small_repo(&h);
    let graph = h.graph(h.config(), Arc::new(model()), Arc::new(embedder()));
    assert!(matches!(graph.stats(DEFAULT_STORAGE).await, Err(Error::StorageNotFound(_))));

    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    let stats = graph.stats(DEFAULT_STORAGE).await.unwrap();
    assert_eq!(stats.files, 3);
    // The merged UserRepository plus load_user
    assert_eq!(stats.entities, 2);
    assert_eq!(stats.retired, 1);
    assert!(stats.chunks >= 3);
    assert!(stats.last_commit_at.is_some());

    h.remove("docs/design.md");
    let report = graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    assert_eq!(report.deleted, 1);
    let stats = graph.stats(DEFAULT_STORAGE).await.unwrap();
    assert_eq!(stats.files, 2);
}

#[tokio::test]
async fn test_moving_root_replaces_scope() {
    let h = Harness::new();
    small_repo(&h);
    let other = tempfile::TempDir::new().unwrap();
    std::fs::write(other.path().join("ledger.rs"), "pub struct InvoiceLedger;\n").unwrap();
    let graph = h.graph(h.config(), Arc::new(model()), Arc::new(embedder()));

    graph.build_or_update(h.repo.path(), DEFAULT_STORAGE).await.unwrap();
    let report = graph.build_or_update(other.path(), DEFAULT_STORAGE).await.unwrap();
    assert!(report.committed);
    assert_eq!(report.added, 1);
    assert_eq!(report.deleted, 3);

    let state = h.state(DEFAULT_STORAGE).await;
    assert_eq!(entity_named(&state, "InvoiceLedger").len(), 1);
    assert!(entity_named(&state, "UserRepository component").is_empty());
}
