//! SQLite implementation of the GraphStore
//!
//! Manifest, graph and vectors share one database, so a pass commits in a
//! single transaction. Vector search loads the stored embeddings and ranks
//! them in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::domain::graph::{
    Chunk, CommitDelta, DescriptionFragment, Entity, EntityOrigin, GraphState, GraphStore,
    RelationFragment, Relationship, ScoredChunk, ScoredEntity, SourceKind, Span, StoreStats,
};
use crate::domain::manifest::{FileRecord, Manifest};
use crate::domain::merge::VectorIndex;
use crate::error::{Error, Result};
use crate::storage::{Database, storage_database_path};

/// Max bound parameters per `IN (...)` query
const IN_BATCH: usize = 400;

/// SQLite implementation of the graph store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Wrap a migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the store of a storage directory
    pub async fn open(storage_dir: &Path) -> Result<Self> {
        let db = Database::open_storage(storage_dir).await?;
        Ok(Self::new(db.pool().clone()))
    }

    /// Whether a database file exists for the storage directory
    pub fn exists(storage_dir: &Path) -> bool {
        storage_database_path(storage_dir).is_file()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_entities(&self) -> Result<Vec<Entity>> {
        let rows: Vec<EntityRow> = sqlx::query_as("SELECT * FROM entities ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(EntityRow::into_entity).collect()
    }

    async fn load_relationships(&self) -> Result<Vec<Relationship>> {
        let rows: Vec<RelationshipRow> = sqlx::query_as(
            "SELECT * FROM relationships ORDER BY source_id, target_id, kind",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(RelationshipRow::into_relationship)
            .collect()
    }

    async fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let rows: Vec<ChunkRow> = sqlx::query_as("SELECT * FROM chunks ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ChunkRow::into_chunk).collect()
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(ids.len());
        for batch in ids.chunks(IN_BATCH) {
            let sql = format!(
                "SELECT * FROM chunks WHERE id IN ({})",
                placeholders(batch.len())
            );
            let mut query = sqlx::query_as::<_, ChunkRow>(&sql);
            for id in batch {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                chunks.push(row.into_chunk()?);
            }
        }
        Ok(chunks)
    }

    async fn count(&self, table: &str) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn is_initialized(&self) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM storage_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn load_manifest(&self) -> Result<Manifest> {
        let mut manifest = Manifest::new();

        let root: Option<(String,)> = sqlx::query_as("SELECT root FROM storage_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        manifest.root = root.map(|(r,)| r);

        let rows: Vec<FileRow> = sqlx::query_as("SELECT * FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            manifest.insert(row.into_record()?);
        }
        Ok(manifest)
    }

    async fn load_state(&self) -> Result<GraphState> {
        let mut state = GraphState::new();
        for entity in self.load_entities().await? {
            state.entities.insert(entity.id.clone(), entity);
        }
        for rel in self.load_relationships().await? {
            state.relationships.insert(rel.key(), rel);
        }
        for chunk in self.load_chunks().await? {
            state.chunks.insert(chunk.id.clone(), chunk);
        }

        let retired: Vec<(String, String)> =
            sqlx::query_as("SELECT id, survivor_id FROM retired_entities")
                .fetch_all(&self.pool)
                .await?;
        state.retired = retired.into_iter().collect::<BTreeMap<_, _>>();

        debug!(
            entities = state.entities.len(),
            relationships = state.relationships.len(),
            chunks = state.chunks.len(),
            "Graph state loaded"
        );
        Ok(state)
    }

    async fn commit(&self, delta: &CommitDelta) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        apply_delta(&mut tx, delta).await?;
        tx.commit().await?;

        info!(
            pass_id = %delta.pass_id,
            entities_upserted = delta.graph.upsert_entities.len(),
            entities_deleted = delta.graph.delete_entities.len(),
            chunks_upserted = delta.graph.upsert_chunks.len(),
            files_upserted = delta.manifest_upserts.len(),
            files_deleted = delta.manifest_deletes.len(),
            "Pass committed"
        );
        Ok(())
    }

    async fn search_entities(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredEntity>> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT id, embedding FROM entities WHERE embedding IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut index = VectorIndex::new();
        for (id, bytes) in rows {
            index.insert(id, decode_vector(&bytes));
        }
        let ranked = index.search(query, limit);

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut by_id: BTreeMap<String, Entity> = self
            .get_entities(&ids)
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| by_id.remove(&id).map(|entity| ScoredEntity { entity, score }))
            .collect())
    }

    async fn search_chunks(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredChunk>> {
        let rows: Vec<(String, Vec<u8>)> =
            sqlx::query_as("SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        if rows.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut index = VectorIndex::new();
        for (id, bytes) in rows {
            index.insert(id, decode_vector(&bytes));
        }
        let ranked = index.search(query, limit);

        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        let mut by_id: BTreeMap<String, Chunk> = self
            .get_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| by_id.remove(&id).map(|chunk| ScoredChunk { chunk, score }))
            .collect())
    }

    async fn relationships_for(&self, entity_ids: &[String]) -> Result<Vec<Relationship>> {
        let mut found: BTreeMap<(String, String, String), Relationship> = BTreeMap::new();
        for batch in entity_ids.chunks(IN_BATCH / 2) {
            let marks = placeholders(batch.len());
            let sql = format!(
                "SELECT * FROM relationships WHERE source_id IN ({marks}) OR target_id IN ({marks})"
            );
            let mut query = sqlx::query_as::<_, RelationshipRow>(&sql);
            for id in batch.iter().chain(batch.iter()) {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                let rel = row.into_relationship()?;
                found.insert(
                    (rel.source_id.clone(), rel.target_id.clone(), rel.kind.clone()),
                    rel,
                );
            }
        }
        Ok(found.into_values().collect())
    }

    async fn get_entities(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let mut entities = Vec::with_capacity(ids.len());
        for batch in ids.chunks(IN_BATCH) {
            let sql = format!(
                "SELECT * FROM entities WHERE id IN ({}) ORDER BY id",
                placeholders(batch.len())
            );
            let mut query = sqlx::query_as::<_, EntityRow>(&sql);
            for id in batch {
                query = query.bind(id);
            }
            for row in query.fetch_all(&self.pool).await? {
                entities.push(row.into_entity()?);
            }
        }
        Ok(entities)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let last: Option<(String,)> =
            sqlx::query_as("SELECT last_commit_at FROM storage_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(StoreStats {
            files: self.count("files").await?,
            chunks: self.count("chunks").await?,
            entities: self.count("entities").await?,
            relationships: self.count("relationships").await?,
            retired: self.count("retired_entities").await?,
            last_commit_at: last.and_then(|(ts,)| parse_timestamp(&ts)),
        })
    }
}

/// Write one pass inside an open transaction
///
/// Deletions run first so a file that is replaced never trips the chunk
/// foreign key. Upserts are keyed by stable id.
async fn apply_delta(tx: &mut Transaction<'_, Sqlite>, delta: &CommitDelta) -> Result<()> {
    let committed_at = delta.committed_at.to_rfc3339();
    let graph = &delta.graph;

    for key in &graph.delete_relationships {
        sqlx::query("DELETE FROM relationships WHERE source_id = ? AND target_id = ? AND kind = ?")
            .bind(&key.source_id)
            .bind(&key.target_id)
            .bind(&key.kind)
            .execute(&mut **tx)
            .await?;
    }

    for id in &graph.delete_chunks {
        sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }

    for path in &delta.manifest_deletes {
        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&mut **tx)
            .await?;
    }

    for id in &graph.delete_entities {
        sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;
    }

    for record in &delta.manifest_upserts {
        let chunk_ids = serde_json::to_string(&record.chunk_ids)?;
        let entity_ids = serde_json::to_string(&record.entity_ids)?;
        sqlx::query(
            r#"
            INSERT INTO files (path, kind, content_hash, processed_at, chunk_ids, entity_ids)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                kind = excluded.kind,
                content_hash = excluded.content_hash,
                processed_at = excluded.processed_at,
                chunk_ids = excluded.chunk_ids,
                entity_ids = excluded.entity_ids
            "#,
        )
        .bind(&record.path)
        .bind(record.kind.as_str())
        .bind(&record.content_hash)
        .bind(record.processed_at.to_rfc3339())
        .bind(&chunk_ids)
        .bind(&entity_ids)
        .execute(&mut **tx)
        .await?;
    }

    for entity in &graph.upsert_entities {
        let fragments = serde_json::to_string(&entity.fragments)?;
        let source_paths = serde_json::to_string(&entity.source_paths)?;
        let embedding = entity.embedding.as_deref().map(encode_vector);
        let dimensions = entity.embedding.as_ref().map(|v| v.len() as i64);
        sqlx::query(
            r#"
            INSERT INTO entities (
                id, name, canonical_name, category, description, fragments,
                source_paths, origin, embedding, embedding_dim, committed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                canonical_name = excluded.canonical_name,
                category = excluded.category,
                description = excluded.description,
                fragments = excluded.fragments,
                source_paths = excluded.source_paths,
                origin = excluded.origin,
                embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim,
                committed_at = excluded.committed_at
            "#,
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.canonical_name)
        .bind(&entity.category)
        .bind(&entity.description)
        .bind(&fragments)
        .bind(&source_paths)
        .bind(entity.origin.as_str())
        .bind(embedding)
        .bind(dimensions)
        .bind(&committed_at)
        .execute(&mut **tx)
        .await?;
    }

    for rel in &graph.upsert_relationships {
        let fragments = serde_json::to_string(&rel.fragments)?;
        let source_paths = serde_json::to_string(&rel.source_paths)?;
        sqlx::query(
            r#"
            INSERT INTO relationships (
                source_id, target_id, kind, description, weight, fragments, source_paths
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, target_id, kind) DO UPDATE SET
                description = excluded.description,
                weight = excluded.weight,
                fragments = excluded.fragments,
                source_paths = excluded.source_paths
            "#,
        )
        .bind(&rel.source_id)
        .bind(&rel.target_id)
        .bind(&rel.kind)
        .bind(&rel.description)
        .bind(rel.weight as f64)
        .bind(&fragments)
        .bind(&source_paths)
        .execute(&mut **tx)
        .await?;
    }

    for chunk in &graph.upsert_chunks {
        let embedding = chunk.embedding.as_deref().map(encode_vector);
        let dimensions = chunk.embedding.as_ref().map(|v| v.len() as i64);
        sqlx::query(
            r#"
            INSERT INTO chunks (
                id, path, start_byte, end_byte, start_line, end_line,
                origin, content, content_hash, embedding, embedding_dim
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.path)
        .bind(chunk.span.start_byte as i64)
        .bind(chunk.span.end_byte as i64)
        .bind(chunk.span.start_line as i64)
        .bind(chunk.span.end_line as i64)
        .bind(chunk.origin.as_str())
        .bind(&chunk.content)
        .bind(&chunk.content_hash)
        .bind(embedding)
        .bind(dimensions)
        .execute(&mut **tx)
        .await?;
    }

    for (retired, survivor) in &graph.retired {
        sqlx::query(
            r#"
            INSERT INTO retired_entities (id, survivor_id, retired_at)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET survivor_id = excluded.survivor_id
            "#,
        )
        .bind(retired)
        .bind(survivor)
        .bind(&committed_at)
        .execute(&mut **tx)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO storage_meta (id, root, last_pass_id, last_commit_at)
        VALUES (1, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            root = excluded.root,
            last_pass_id = excluded.last_pass_id,
            last_commit_at = excluded.last_commit_at
        "#,
    )
    .bind(&delta.root)
    .bind(delta.pass_id.to_string())
    .bind(&committed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Little-endian f32 encoding for BLOB columns
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn corrupt(what: &str, id: &str, detail: impl std::fmt::Display) -> Error {
    Error::ConsistencyViolation(format!("Stored {} '{}' is unreadable: {}", what, id, detail))
}

// ========== Row Types ==========

#[derive(Debug, FromRow)]
struct FileRow {
    path: String,
    kind: String,
    content_hash: String,
    processed_at: String,
    chunk_ids: String,
    entity_ids: String,
}

impl FileRow {
    fn into_record(self) -> Result<FileRecord> {
        let kind = SourceKind::parse(&self.kind)
            .ok_or_else(|| corrupt("file", &self.path, format!("kind '{}'", self.kind)))?;
        let chunk_ids: BTreeSet<String> = serde_json::from_str(&self.chunk_ids)?;
        let entity_ids: BTreeSet<String> = serde_json::from_str(&self.entity_ids)?;

        Ok(FileRecord {
            processed_at: parse_timestamp(&self.processed_at).unwrap_or_else(Utc::now),
            path: self.path,
            kind,
            content_hash: self.content_hash,
            chunk_ids,
            entity_ids,
        })
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    id: String,
    name: String,
    canonical_name: String,
    category: String,
    description: String,
    fragments: String,
    source_paths: String,
    origin: String,
    embedding: Option<Vec<u8>>,
    #[allow(dead_code)]
    embedding_dim: Option<i64>,
    committed_at: Option<String>,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        let origin = EntityOrigin::parse(&self.origin)
            .ok_or_else(|| corrupt("entity", &self.id, format!("origin '{}'", self.origin)))?;
        let fragments: Vec<DescriptionFragment> = serde_json::from_str(&self.fragments)?;
        let source_paths: BTreeSet<String> = serde_json::from_str(&self.source_paths)?;

        Ok(Entity {
            id: self.id,
            name: self.name,
            canonical_name: self.canonical_name,
            category: self.category,
            description: self.description,
            fragments,
            source_paths,
            origin,
            embedding: self.embedding.as_deref().map(decode_vector),
            committed_at: self.committed_at.as_deref().and_then(parse_timestamp),
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationshipRow {
    source_id: String,
    target_id: String,
    kind: String,
    description: String,
    weight: f64,
    fragments: String,
    source_paths: String,
}

impl RelationshipRow {
    fn into_relationship(self) -> Result<Relationship> {
        let fragments: Vec<RelationFragment> = serde_json::from_str(&self.fragments)?;
        let source_paths: BTreeSet<String> = serde_json::from_str(&self.source_paths)?;

        Ok(Relationship {
            source_id: self.source_id,
            target_id: self.target_id,
            kind: self.kind,
            description: self.description,
            weight: self.weight as f32,
            fragments,
            source_paths,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChunkRow {
    id: String,
    path: String,
    start_byte: i64,
    end_byte: i64,
    start_line: i64,
    end_line: i64,
    origin: String,
    content: String,
    content_hash: String,
    embedding: Option<Vec<u8>>,
    #[allow(dead_code)]
    embedding_dim: Option<i64>,
}

impl ChunkRow {
    fn into_chunk(self) -> Result<Chunk> {
        let origin = SourceKind::parse(&self.origin)
            .ok_or_else(|| corrupt("chunk", &self.id, format!("origin '{}'", self.origin)))?;

        Ok(Chunk {
            id: self.id,
            path: self.path,
            span: Span {
                start_byte: self.start_byte.max(0) as usize,
                end_byte: self.end_byte.max(0) as usize,
                start_line: self.start_line.max(0) as usize,
                end_line: self.end_line.max(0) as usize,
            },
            origin,
            content: self.content,
            content_hash: self.content_hash,
            embedding: self.embedding.as_deref().map(decode_vector),
        })
    }
}
