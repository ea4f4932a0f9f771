use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the catalog schema. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL DEFAULT '',
            department TEXT NOT NULL DEFAULT '',
            profile TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS packages (
            id TEXT PRIMARY KEY,
            source_archive_name TEXT NOT NULL,
            total_bytes INTEGER NOT NULL,
            entry_count INTEGER NOT NULL,
            uploaded_by TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No foreign keys: deleting an asset leaves references pointing at it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audio_assets (
            id TEXT PRIMARY KEY,
            package_id TEXT NOT NULL,
            original_name TEXT NOT NULL,
            internal_path TEXT NOT NULL,
            folder TEXT,
            byte_size INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            added_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_assets (
            id TEXT PRIMARY KEY,
            package_id TEXT NOT NULL,
            original_name TEXT NOT NULL,
            internal_path TEXT NOT NULL,
            folder TEXT,
            title TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            added_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS asset_references (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            source_kind TEXT NOT NULL DEFAULT 'document',
            target_id TEXT NOT NULL,
            target_kind TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            CHECK (source_kind = 'document'),
            CHECK (target_kind IN ('audio', 'document'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audio_package ON audio_assets(package_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_package ON document_assets(package_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_references_source ON asset_references(source_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_packages_created_at ON packages(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
