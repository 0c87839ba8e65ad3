//! Update orchestrator
//!
//! Runs one incremental pass over a directory. Every phase before
//! COMMITTING works on an in-memory copy of the committed graph; the
//! difference against the committed snapshot is handed to the
//! [`StoreSynchronizer`] in one piece. Extraction and embedding fan out with
//! bounded concurrency and join before merging starts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, EntityText};
use crate::domain::extraction::{
    ChunkExtraction, ChunkFailure, Chunker, CodeExtractor, CodeSummarizer, DocumentExtractor,
    FileContribution, Language, SyntaxParser,
};
use crate::domain::graph::{CommitDelta, GraphState, GraphStore, SourceKind};
use crate::domain::manifest::{ChangeDetector, DiscoveredFile, FileRecord, Manifest};
use crate::domain::merge::MergeEngine;
use crate::embedding::{Embedder, EmbeddingInput, check_batch};
use crate::error::{Error, Result};
use crate::llm::{CollaboratorError, LanguageModel, RateLimiter};

use super::report::{EmbeddingSkip, PassReport};
use super::state::PassState;
use super::synchronizer::StoreSynchronizer;

/// Drives DIFFING through COMMITTING for one storage
pub struct UpdateOrchestrator {
    detector: ChangeDetector,
    chunker: Chunker,
    code_extractor: CodeExtractor,
    document_extractor: DocumentExtractor,
    summarizer: Option<CodeSummarizer>,
    parser: Arc<dyn SyntaxParser>,
    embedder: Arc<dyn Embedder>,
    limiter: Arc<RateLimiter>,
    merge_engine: MergeEngine,
    entity_text: EntityText,
    parallel_num: usize,
    batch_size: usize,
}

impl UpdateOrchestrator {
    pub fn new(
        config: &Config,
        parser: Arc<dyn SyntaxParser>,
        model: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let languages: Vec<Language> = Language::ALL
            .into_iter()
            .filter(|l| parser.supports(*l))
            .collect();
        let summarizer = config
            .extraction
            .summarize_code
            .then(|| CodeSummarizer::new(model.clone(), limiter.clone()));

        Ok(Self {
            detector: ChangeDetector::new(&config.files)?.with_code_languages(languages),
            chunker: Chunker::new(config.pipeline.chunk_max_tokens)?,
            code_extractor: CodeExtractor::new(config.pipeline.max_depth),
            document_extractor: DocumentExtractor::new(
                model,
                limiter.clone(),
                config.extraction.entity_categories.clone(),
            ),
            summarizer,
            parser,
            embedder,
            limiter,
            merge_engine: MergeEngine::from_config(&config.merge)?,
            entity_text: config.merge.embedding_input,
            parallel_num: config.pipeline.parallel_num.max(1),
            batch_size: config.pipeline.embedding_batch_size.max(1),
        })
    }

    /// Run one pass over `root` and commit it through `synchronizer`
    pub async fn run(
        &self,
        root: &Path,
        storage: &str,
        store: &dyn GraphStore,
        synchronizer: &StoreSynchronizer,
    ) -> Result<PassReport> {
        let pass_id = Uuid::new_v4();
        let span = info_span!("pass", pass_id = %pass_id, storage = %storage);

        async move {
            let mut report = PassReport::new(pass_id, storage);
            let mut state = PassState::Idle;

            match self
                .execute(&mut state, &mut report, root, store, synchronizer)
                .await
            {
                Ok(()) => {
                    report.finish(state);
                    info!(
                        added = report.added,
                        modified = report.modified,
                        deleted = report.deleted,
                        merged = report.merged_count(),
                        failures = report.failure_count(),
                        duration_ms = report.duration_ms().unwrap_or_default(),
                        "Pass finished"
                    );
                    Ok(report)
                }
                Err(err) => {
                    let failed_in = state;
                    if let Ok(next) = state.transition(PassState::Failed) {
                        state = next;
                    }
                    report.finish(state);
                    tracing::error!(phase = %failed_in, error = %err, "Pass failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        state: &mut PassState,
        report: &mut PassReport,
        root: &Path,
        store: &dyn GraphStore,
        synchronizer: &StoreSynchronizer,
    ) -> Result<()> {
        advance(state, PassState::Diffing)?;
        let manifest = store.load_manifest().await?;
        let baseline = store.load_state().await?;

        let detector = self.detector.clone();
        let scan_root = root.to_path_buf();
        let scan_manifest = manifest.clone();
        let changes = tokio::task::spawn_blocking(move || detector.detect(&scan_root, &scan_manifest))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        report.record_changes(&changes);
        for failure in &changes.failures {
            warn!(path = %failure.path, error = %failure.message, "File skipped");
        }

        let same_root = manifest.root.as_deref() == Some(changes.root.as_str());
        if !changes.has_changes() && same_root {
            advance(state, PassState::Idle)?;
            info!(unchanged = changes.unchanged.len(), "Nothing to update");
            return Ok(());
        }

        advance(state, PassState::Extracting)?;
        let mut working = baseline.clone();
        for path in &changes.deleted {
            working.detach_file(path);
        }
        let files: Vec<&DiscoveredFile> = changes.to_process().collect();
        for file in &files {
            working.detach_file(&file.path);
        }

        let mut contributions: Vec<FileContribution> = stream::iter(files.iter().copied())
            .map(|file| self.extract_file(file))
            .buffer_unordered(self.parallel_num)
            .collect()
            .await;
        contributions.sort_by(|a, b| a.path.cmp(&b.path));

        let mut current_code = BTreeSet::new();
        for contribution in &contributions {
            report
                .chunk_failures
                .extend(contribution.chunk_failures.iter().cloned());
            let outcome = working.attach_file(contribution);
            if outcome.dropped_relationships > 0 {
                debug!(
                    path = %contribution.path,
                    dropped = outcome.dropped_relationships,
                    "Relationships without endpoints dropped"
                );
            }
            current_code.extend(outcome.code_entities);
        }

        advance(state, PassState::Embedding)?;
        let pending_entities = working.reuse_entity_embeddings(&baseline, self.entity_text);
        let pending_chunks = working.reuse_chunk_embeddings(&baseline);
        debug!(
            entities = pending_entities.len(),
            chunks = pending_chunks.len(),
            "Embedding pending items"
        );

        let (vectors, skips) = self.embed_items(pending_entities).await;
        for (id, vector) in vectors {
            if let Some(entity) = working.entities.get_mut(&id) {
                entity.embedding = Some(vector);
            }
        }
        report.embedding_skips.extend(skips);

        let (vectors, skips) = self.embed_items(pending_chunks).await;
        for (id, vector) in vectors {
            if let Some(chunk) = working.chunks.get_mut(&id) {
                chunk.embedding = Some(vector);
            }
        }
        report.embedding_skips.extend(skips);

        advance(state, PassState::Merging)?;
        let merge = self.merge_engine.run(&mut working, &current_code)?;
        let survivors: BTreeSet<String> = merge.merges().map(|(_, s)| s.to_string()).collect();
        self.refresh_embeddings(&mut working, &survivors, report).await;
        report.merge_outcomes = merge.outcomes;

        advance(state, PassState::Committing)?;
        let mut delta = CommitDelta::new(report.pass_id, &changes.root);
        delta.graph = working.diff(&baseline);
        delta.manifest_deletes = changes.deleted.iter().cloned().collect();
        delta.manifest_upserts = manifest_updates(&manifest, &working, &files, &changes.deleted);
        report.record_delta(&delta.graph);

        synchronizer.commit(&working, &delta).await?;
        report.committed = true;

        advance(state, PassState::Idle)?;
        Ok(())
    }

    async fn extract_file(&self, file: &DiscoveredFile) -> FileContribution {
        let mut contribution = FileContribution::new(&file.path, file.kind, &file.content_hash);
        match (file.kind, file.language) {
            (SourceKind::Code, Some(language)) => {
                self.extract_code(file, language, &mut contribution).await
            }
            _ => self.extract_document(file, &mut contribution).await,
        }
        debug!(
            path = %file.path,
            chunks = contribution.chunks.len(),
            entities = contribution.entities.len(),
            "File extracted"
        );
        contribution
    }

    async fn extract_code(
        &self,
        file: &DiscoveredFile,
        language: Language,
        contribution: &mut FileContribution,
    ) {
        let parser = self.parser.clone();
        let source = file.content.clone();
        let parsed = tokio::task::spawn_blocking(move || parser.parse(language, &source))
            .await
            .unwrap_or_else(|e| Err(Error::Extraction(format!("parser task failed: {}", e))));

        let root = match parsed {
            Ok(root) => root,
            Err(err) => {
                warn!(path = %file.path, error = %err, "Parse failed, chunking without syntax tree");
                contribution.chunks = self.chunker.chunk_code(&file.path, &file.content, None);
                contribution.chunk_failures = contribution
                    .chunks
                    .iter()
                    .map(|chunk| ChunkFailure {
                        chunk_id: chunk.id.clone(),
                        path: file.path.clone(),
                        message: err.to_string(),
                    })
                    .collect();
                return;
            }
        };

        contribution.chunks = self.chunker.chunk_code(&file.path, &file.content, Some(&root));
        let extraction = self.code_extractor.extract(
            &file.path,
            &file.relative_path,
            language,
            &file.content,
            &root,
        );
        let mut entities = extraction.entities;

        if let Some(summarizer) = &self.summarizer {
            let summaries: Vec<(usize, Result<String>)> = stream::iter(entities.iter().enumerate())
                .map(|(i, entity)| async move {
                    (i, summarizer.summarize(entity, &file.relative_path).await)
                })
                .buffer_unordered(self.parallel_num)
                .collect()
                .await;
            for (i, summary) in summaries {
                match summary {
                    Ok(text) => entities[i].description = text,
                    Err(err) => warn!(
                        path = %file.path,
                        entity = %entities[i].name,
                        error = %err,
                        "Code summary failed, keeping structural description"
                    ),
                }
            }
        }

        contribution.entities = entities;
        contribution.relationships = extraction.relationships;
    }

    async fn extract_document(&self, file: &DiscoveredFile, contribution: &mut FileContribution) {
        contribution.chunks = self.chunker.chunk_document(&file.path, &file.content);

        let mut results: Vec<(usize, Result<ChunkExtraction>)> =
            stream::iter(contribution.chunks.iter().enumerate())
                .map(|(i, chunk)| async move { (i, self.document_extractor.extract(chunk).await) })
                .buffer_unordered(self.parallel_num)
                .collect()
                .await;
        results.sort_by_key(|(i, _)| *i);

        for (i, result) in results {
            match result {
                Ok(extraction) => {
                    contribution.entities.extend(extraction.entities);
                    contribution.relationships.extend(extraction.relationships);
                }
                Err(err) => {
                    let chunk_id = contribution.chunks[i].id.clone();
                    warn!(path = %file.path, chunk_id = %chunk_id, error = %err, "Chunk extraction skipped");
                    contribution.chunk_failures.push(ChunkFailure {
                        chunk_id,
                        path: file.path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    /// Embed `(id, text)` pairs in batches; failed items are skipped, not fatal
    async fn embed_items(
        &self,
        items: Vec<(String, String)>,
    ) -> (Vec<(String, Vec<f32>)>, Vec<EmbeddingSkip>) {
        if items.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let inputs: Vec<EmbeddingInput> = items
            .into_iter()
            .map(|(id, text)| EmbeddingInput::new(id, text))
            .collect();
        let batches: Vec<Vec<EmbeddingInput>> =
            inputs.chunks(self.batch_size).map(<[_]>::to_vec).collect();

        let results: Vec<(Vec<(String, Vec<f32>)>, Vec<EmbeddingSkip>)> = stream::iter(batches)
            .map(|batch| self.embed_batch(batch))
            .buffer_unordered(self.parallel_num)
            .collect()
            .await;

        let mut vectors = Vec::new();
        let mut skips = Vec::new();
        for (done, skipped) in results {
            vectors.extend(done);
            skips.extend(skipped);
        }
        vectors.sort_by(|a, b| a.0.cmp(&b.0));
        skips.sort_by(|a, b| a.id.cmp(&b.id));
        (vectors, skips)
    }

    /// One batch call; on failure fall back to item-by-item so only bad items drop
    async fn embed_batch(
        &self,
        batch: Vec<EmbeddingInput>,
    ) -> (Vec<(String, Vec<f32>)>, Vec<EmbeddingSkip>) {
        let err = match self.embed_checked(&batch).await {
            Ok(vectors) => {
                let ids = batch.into_iter().map(|input| input.id);
                return (ids.zip(vectors).collect(), Vec::new());
            }
            Err(err) => err,
        };

        if batch.len() == 1 {
            return (Vec::new(), vec![skip(&batch[0], &err)]);
        }

        warn!(batch = batch.len(), error = %err, "Embedding batch failed, retrying items individually");
        let mut done = Vec::new();
        let mut skipped = Vec::new();
        for input in batch {
            match self.embed_checked(std::slice::from_ref(&input)).await {
                Ok(mut vectors) => {
                    if let Some(vector) = vectors.pop() {
                        done.push((input.id, vector));
                    }
                }
                Err(err) => skipped.push(skip(&input, &err)),
            }
        }
        (done, skipped)
    }

    async fn embed_checked(&self, inputs: &[EmbeddingInput]) -> std::result::Result<Vec<Vec<f32>>, CollaboratorError> {
        let vectors = self
            .limiter
            .with_retry("embedding", || self.embedder.embed(inputs))
            .await?;
        check_batch(inputs, &vectors, self.embedder.dimensions())?;
        Ok(vectors)
    }

    /// Re-embed merge survivors so their vectors match their merged text
    ///
    /// A survivor whose refresh fails keeps its previous vector.
    async fn refresh_embeddings(
        &self,
        working: &mut GraphState,
        survivors: &BTreeSet<String>,
        report: &mut PassReport,
    ) {
        let items: Vec<(String, String)> = survivors
            .iter()
            .filter_map(|id| {
                working
                    .entities
                    .get(id)
                    .map(|e| (id.clone(), e.embedding_text(self.entity_text)))
            })
            .collect();
        let (vectors, skips) = self.embed_items(items).await;
        for (id, vector) in vectors {
            if let Some(entity) = working.entities.get_mut(&id) {
                entity.embedding = Some(vector);
            }
        }
        report.embedding_skips.extend(skips);
    }
}

fn advance(state: &mut PassState, next: PassState) -> Result<()> {
    *state = state.transition(next)?;
    debug!(phase = %next, "Pass phase");
    Ok(())
}

fn skip(input: &EmbeddingInput, err: &CollaboratorError) -> EmbeddingSkip {
    warn!(id = %input.id, error = %err, "Embedding skipped");
    EmbeddingSkip {
        id: input.id.clone(),
        message: err.to_string(),
    }
}

/// Manifest rows to write: every processed file, plus any committed file
/// whose chunk or entity set moved because of a merge or deletion
fn manifest_updates(
    manifest: &Manifest,
    working: &GraphState,
    processed: &[&DiscoveredFile],
    deleted: &BTreeSet<String>,
) -> Vec<FileRecord> {
    let mut entities_by_path: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for entity in working.entities.values() {
        for path in &entity.source_paths {
            entities_by_path
                .entry(path.as_str())
                .or_default()
                .insert(entity.id.clone());
        }
    }
    let mut chunks_by_path: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for chunk in working.chunks.values() {
        chunks_by_path
            .entry(chunk.path.as_str())
            .or_default()
            .insert(chunk.id.clone());
    }

    let mut records = Vec::new();
    let mut seen = BTreeSet::new();
    for file in processed {
        let mut record = FileRecord::new(&file.path, file.kind, &file.content_hash);
        record.chunk_ids = chunks_by_path.get(file.path.as_str()).cloned().unwrap_or_default();
        record.entity_ids = entities_by_path.get(file.path.as_str()).cloned().unwrap_or_default();
        seen.insert(file.path.as_str());
        records.push(record);
    }

    for (path, record) in &manifest.files {
        if deleted.contains(path) || seen.contains(path.as_str()) {
            continue;
        }
        let chunk_ids = chunks_by_path.get(path.as_str()).cloned().unwrap_or_default();
        let entity_ids = entities_by_path.get(path.as_str()).cloned().unwrap_or_default();
        if chunk_ids != record.chunk_ids || entity_ids != record.entity_ids {
            let mut updated = record.clone();
            updated.chunk_ids = chunk_ids;
            updated.entity_ids = entity_ids;
            records.push(updated);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::{Chunk, Entity, EntityOrigin, Span};

    fn discovered(path: &str, kind: SourceKind) -> DiscoveredFile {
        DiscoveredFile {
            path: path.to_string(),
            relative_path: path.trim_start_matches("/r/").to_string(),
            kind,
            language: None,
            content_hash: "h".to_string(),
            content: String::new(),
        }
    }

    #[test]
    fn test_manifest_updates_follow_merged_entities() {
        let mut working = GraphState::new();
        let survivor = Entity::new("ent-doc", "UserRepository", "component", EntityOrigin::Merged)
            .with_fragment("/r/design.md", "Stores users")
            .with_fragment("/r/repo.py", "class `UserRepository` defined in repo.py");
        working.entities.insert(survivor.id.clone(), survivor);
        let chunk = Chunk::new(
            "/r/repo.py",
            Span {
                start_byte: 0,
                end_byte: 4,
                start_line: 1,
                end_line: 1,
            },
            SourceKind::Code,
            "code",
        );
        working.chunks.insert(chunk.id.clone(), chunk.clone());

        let mut manifest = Manifest::new();
        let mut design = FileRecord::new("/r/design.md", SourceKind::Document, "d");
        design.entity_ids.insert("ent-doc".into());
        manifest.insert(design);
        let mut stale = FileRecord::new("/r/old.md", SourceKind::Document, "o");
        stale.entity_ids.insert("ent-old".into());
        manifest.insert(stale);

        let repo = discovered("/r/repo.py", SourceKind::Code);
        let deleted: BTreeSet<String> = ["/r/old.md".to_string()].into();
        let records = manifest_updates(&manifest, &working, &[&repo], &deleted);

        assert_eq!(records.len(), 1, "unchanged design.md and deleted old.md are not rewritten");
        assert_eq!(records[0].path, "/r/repo.py");
        assert!(records[0].entity_ids.contains("ent-doc"));
        assert!(records[0].chunk_ids.contains(&chunk.id));
    }

    #[test]
    fn test_advance_rejects_skips() {
        let mut state = PassState::Idle;
        advance(&mut state, PassState::Diffing).unwrap();
        assert!(advance(&mut state, PassState::Committing).is_err());
        assert_eq!(state, PassState::Diffing);
    }
}
