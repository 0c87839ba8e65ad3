//! Database migrations
//!
//! Schema versioning for a storage's graph database. Migrations are applied
//! in order and recorded in `_migrations`.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 2;

/// SQL to create the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
"#;

/// Migration v1: manifest, graph and chunk tables
const MIGRATION_V1: &str = r#"
    -- Manifest: one row per successfully processed file
    CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        kind TEXT NOT NULL CHECK (kind IN ('code', 'document')),
        content_hash TEXT NOT NULL,
        processed_at TEXT NOT NULL,
        chunk_ids TEXT NOT NULL DEFAULT '[]',
        entity_ids TEXT NOT NULL DEFAULT '[]'
    );

    -- Chunks are owned by exactly one file
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        path TEXT NOT NULL REFERENCES files(path) ON DELETE CASCADE,
        start_byte INTEGER NOT NULL,
        end_byte INTEGER NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        origin TEXT NOT NULL CHECK (origin IN ('code', 'document')),
        content TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        embedding BLOB,
        embedding_dim INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        canonical_name TEXT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        fragments TEXT NOT NULL DEFAULT '[]',
        source_paths TEXT NOT NULL DEFAULT '[]',
        origin TEXT NOT NULL CHECK (origin IN ('code', 'document', 'merged')),
        embedding BLOB,
        embedding_dim INTEGER,
        committed_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_entities_canonical ON entities(canonical_name);
    CREATE INDEX IF NOT EXISTS idx_entities_origin ON entities(origin);

    -- Endpoints are checked before commit rather than by foreign keys, so a
    -- dangling edge surfaces as a consistency error instead of a cascade
    CREATE TABLE IF NOT EXISTS relationships (
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        weight REAL NOT NULL DEFAULT 0,
        fragments TEXT NOT NULL DEFAULT '[]',
        source_paths TEXT NOT NULL DEFAULT '[]',
        PRIMARY KEY (source_id, target_id, kind)
    );

    CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id);
"#;

/// Migration v2: merge retirements and storage metadata
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS retired_entities (
        id TEXT PRIMARY KEY,
        survivor_id TEXT NOT NULL,
        retired_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE INDEX IF NOT EXISTS idx_retired_survivor ON retired_entities(survivor_id);

    -- Single row; present only once a pass has been committed
    CREATE TABLE IF NOT EXISTS storage_meta (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        root TEXT NOT NULL,
        last_pass_id TEXT NOT NULL,
        last_commit_at TEXT NOT NULL
    );
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::debug!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Manifest and graph tables");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Retirements and storage metadata");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}
