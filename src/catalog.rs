//! SQLite-backed catalog of packages, assets and references.
//!
//! Wraps a [`SqlitePool`] and the storage root. The storage root is needed
//! because deleting an audio asset also removes its file.
//!
//! Deletion is per asset only. References are never cascaded: removing an
//! asset leaves any reference rows that point to it in place.

use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::link::LinkTarget;
use crate::models::{
    timestamp_to_utc, AssetKind, AudioAsset, AudioRole, DocumentAsset, Package, PackageContents,
    Reference, SearchResults,
};
use crate::policy::PackageFolder;

/// URL prefix the storage root is served under.
pub const STORAGE_URL_PREFIX: &str = "/storage";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Public URL of a file stored at `storage_path` below the storage root.
pub fn storage_url(storage_path: &str) -> String {
    let encoded: Vec<String> = storage_path
        .split('/')
        .map(|seg| utf8_percent_encode(seg, PATH_SEGMENT).to_string())
        .collect();
    format!("{}/{}", STORAGE_URL_PREFIX, encoded.join("/"))
}

/// Audio asset to be recorded with a new package.
#[derive(Debug, Clone)]
pub struct NewAudio {
    pub original_name: String,
    pub internal_path: String,
    pub folder: Option<PackageFolder>,
    pub byte_size: u64,
    pub mime_type: String,
    pub storage_path: String,
}

/// Document asset to be recorded with a new package.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub original_name: String,
    pub internal_path: String,
    pub folder: Option<PackageFolder>,
    pub title: String,
    pub raw_text: String,
}

#[derive(Debug, Clone)]
pub struct NewPackage {
    pub id: String,
    pub source_archive_name: String,
    pub total_bytes: u64,
    pub entry_count: u64,
    pub uploaded_by: String,
    pub audio: Vec<NewAudio>,
    pub documents: Vec<NewDocument>,
}

/// Rows written for a new package, in insertion order.
#[derive(Debug, Clone)]
pub struct RecordedPackage {
    pub package: Package,
    pub audio: Vec<AudioAsset>,
    pub documents: Vec<DocumentAsset>,
}

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
    storage_root: PathBuf,
}

const AUDIO_COLUMNS: &str = "id, package_id, original_name, internal_path, folder, byte_size, mime_type, storage_path, added_at";
const DOCUMENT_COLUMNS: &str =
    "id, package_id, original_name, internal_path, folder, title, raw_text, added_at";
const PACKAGE_COLUMNS: &str =
    "id, source_archive_name, total_bytes, entry_count, uploaded_by, created_at";
const REFERENCE_COLUMNS: &str =
    "id, source_id, source_kind, target_id, target_kind, created_at";

impl Catalog {
    pub fn new(pool: SqlitePool, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            storage_root: storage_root.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    // ============ Packages ============

    /// Insert a package and all of its assets in one transaction.
    pub async fn record_package(&self, new: &NewPackage) -> Result<RecordedPackage> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO packages (id, source_archive_name, total_bytes, entry_count, uploaded_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.id)
        .bind(&new.source_archive_name)
        .bind(new.total_bytes as i64)
        .bind(new.entry_count as i64)
        .bind(&new.uploaded_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut audio = Vec::with_capacity(new.audio.len());
        for a in &new.audio {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO audio_assets (id, package_id, original_name, internal_path, folder, byte_size, mime_type, storage_path, added_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&new.id)
            .bind(&a.original_name)
            .bind(&a.internal_path)
            .bind(a.folder.map(PackageFolder::as_str))
            .bind(a.byte_size as i64)
            .bind(&a.mime_type)
            .bind(&a.storage_path)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            audio.push(AudioAsset {
                id,
                package_id: new.id.clone(),
                original_name: a.original_name.clone(),
                internal_path: a.internal_path.clone(),
                folder: a.folder,
                role: AudioRole::for_folder(a.folder),
                byte_size: a.byte_size as i64,
                mime_type: a.mime_type.clone(),
                url: storage_url(&a.storage_path),
                storage_relative_path: a.storage_path.clone(),
                added_at: timestamp_to_utc(now),
            });
        }

        let mut documents = Vec::with_capacity(new.documents.len());
        for d in &new.documents {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO document_assets (id, package_id, original_name, internal_path, folder, title, raw_text, added_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&new.id)
            .bind(&d.original_name)
            .bind(&d.internal_path)
            .bind(d.folder.map(PackageFolder::as_str))
            .bind(&d.title)
            .bind(&d.raw_text)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            documents.push(DocumentAsset {
                id,
                package_id: new.id.clone(),
                original_name: d.original_name.clone(),
                internal_path: d.internal_path.clone(),
                folder: d.folder,
                title: d.title.clone(),
                raw_text: d.raw_text.clone(),
                added_at: timestamp_to_utc(now),
            });
        }

        tx.commit().await?;

        Ok(RecordedPackage {
            package: Package {
                id: new.id.clone(),
                source_archive_name: new.source_archive_name.clone(),
                total_bytes: new.total_bytes as i64,
                entry_count: new.entry_count as i64,
                uploaded_by: new.uploaded_by.clone(),
                created_at: timestamp_to_utc(now),
            },
            audio,
            documents,
        })
    }

    /// Most recent first.
    pub async fn list_packages(&self) -> Result<Vec<Package>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM packages ORDER BY created_at DESC, rowid DESC",
            PACKAGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(package_from_row).collect())
    }

    pub async fn get_package(&self, id: &str) -> Result<Option<Package>> {
        let row = sqlx::query(&format!("SELECT {} FROM packages WHERE id = ?", PACKAGE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(package_from_row))
    }

    /// A package with its assets (in extraction order) and the references
    /// originating from its documents.
    pub async fn package_contents(&self, id: &str) -> Result<Option<PackageContents>> {
        let Some(package) = self.get_package(id).await? else {
            return Ok(None);
        };

        let audio_files = sqlx::query(&format!(
            "SELECT {} FROM audio_assets WHERE package_id = ? ORDER BY rowid ASC",
            AUDIO_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(audio_from_row)
        .collect();

        let documents = sqlx::query(&format!(
            "SELECT {} FROM document_assets WHERE package_id = ? ORDER BY rowid ASC",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(document_from_row)
        .collect();

        let references = sqlx::query(
            r#"
            SELECT r.id, r.source_id, r.source_kind, r.target_id, r.target_kind, r.created_at
            FROM asset_references r
            JOIN document_assets d ON d.id = r.source_id
            WHERE d.package_id = ?
            ORDER BY r.rowid ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(reference_from_row)
        .collect();

        Ok(Some(PackageContents {
            package,
            audio_files,
            documents,
            references,
        }))
    }

    // ============ Audio ============

    /// Most recent first.
    pub async fn list_audio(&self) -> Result<Vec<AudioAsset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audio_assets ORDER BY added_at DESC, rowid DESC",
            AUDIO_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(audio_from_row).collect())
    }

    pub async fn get_audio(&self, id: &str) -> Result<Option<AudioAsset>> {
        let row = sqlx::query(&format!("SELECT {} FROM audio_assets WHERE id = ?", AUDIO_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(audio_from_row))
    }

    /// Remove the backing file, then the row. Returns `false` if no such asset.
    pub async fn delete_audio(&self, id: &str) -> Result<bool> {
        let Some(audio) = self.get_audio(id).await? else {
            return Ok(false);
        };

        let physical = self.storage_root.join(&audio.storage_relative_path);
        match std::fs::remove_file(&physical) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove audio file: {}", physical.display())
                })
            }
        }

        sqlx::query("DELETE FROM audio_assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(audio = %id, path = %physical.display(), "audio asset deleted");
        Ok(true)
    }

    // ============ Documents ============

    pub async fn list_documents(&self) -> Result<Vec<DocumentAsset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM document_assets ORDER BY added_at DESC, rowid DESC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(document_from_row).collect())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<DocumentAsset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM document_assets WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    /// Remove the row only; the extracted file stays in the package directory.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM document_assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        if deleted {
            tracing::info!(document = %id, "document asset deleted");
        }
        Ok(deleted)
    }

    // ============ Search ============

    /// Case-insensitive substring search. Audio matches on file name;
    /// documents on file name, title or body. A blank term returns everything;
    /// otherwise the term is matched as given, surrounding spaces included.
    pub async fn search(&self, term: &str) -> Result<SearchResults> {
        if term.trim().is_empty() {
            return Ok(SearchResults {
                audio_files: self.list_audio().await?,
                documents: self.list_documents().await?,
            });
        }

        let audio_files = sqlx::query(&format!(
            "SELECT {} FROM audio_assets WHERE instr(lower(original_name), lower(?1)) > 0 ORDER BY added_at DESC, rowid DESC",
            AUDIO_COLUMNS
        ))
        .bind(term)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(audio_from_row)
        .collect();

        let documents = sqlx::query(&format!(
            r#"
            SELECT {} FROM document_assets
            WHERE instr(lower(original_name), lower(?1)) > 0
               OR instr(lower(title), lower(?1)) > 0
               OR instr(lower(raw_text), lower(?1)) > 0
            ORDER BY added_at DESC, rowid DESC
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(term)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(document_from_row)
        .collect();

        Ok(SearchResults {
            audio_files,
            documents,
        })
    }

    // ============ References ============

    /// Insert every reference found in one document, in a single transaction.
    pub async fn insert_references(
        &self,
        source_id: &str,
        targets: &[LinkTarget],
    ) -> Result<Vec<Reference>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(targets.len());

        for target in targets {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO asset_references (id, source_id, source_kind, target_id, target_kind, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(source_id)
            .bind(AssetKind::Document.as_str())
            .bind(&target.id)
            .bind(target.kind.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            out.push(Reference {
                id,
                source_id: source_id.to_string(),
                source_kind: AssetKind::Document,
                target_id: target.id.clone(),
                target_kind: target.kind,
                created_at: timestamp_to_utc(now),
            });
        }

        tx.commit().await?;
        Ok(out)
    }

    pub async fn references_from(&self, source_id: &str) -> Result<Vec<Reference>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM asset_references WHERE source_id = ? ORDER BY rowid ASC",
            REFERENCE_COLUMNS
        ))
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(reference_from_row).collect())
    }
}

fn package_from_row(row: &SqliteRow) -> Package {
    Package {
        id: row.get("id"),
        source_archive_name: row.get("source_archive_name"),
        total_bytes: row.get("total_bytes"),
        entry_count: row.get("entry_count"),
        uploaded_by: row.get("uploaded_by"),
        created_at: timestamp_to_utc(row.get("created_at")),
    }
}

fn audio_from_row(row: &SqliteRow) -> AudioAsset {
    let folder = row
        .get::<Option<String>, _>("folder")
        .as_deref()
        .and_then(PackageFolder::parse);
    let storage_path: String = row.get("storage_path");
    AudioAsset {
        id: row.get("id"),
        package_id: row.get("package_id"),
        original_name: row.get("original_name"),
        internal_path: row.get("internal_path"),
        folder,
        role: AudioRole::for_folder(folder),
        byte_size: row.get("byte_size"),
        mime_type: row.get("mime_type"),
        url: storage_url(&storage_path),
        storage_relative_path: storage_path,
        added_at: timestamp_to_utc(row.get("added_at")),
    }
}

fn document_from_row(row: &SqliteRow) -> DocumentAsset {
    DocumentAsset {
        id: row.get("id"),
        package_id: row.get("package_id"),
        original_name: row.get("original_name"),
        internal_path: row.get("internal_path"),
        folder: row
            .get::<Option<String>, _>("folder")
            .as_deref()
            .and_then(PackageFolder::parse),
        title: row.get("title"),
        raw_text: row.get("raw_text"),
        added_at: timestamp_to_utc(row.get("added_at")),
    }
}

fn reference_from_row(row: &SqliteRow) -> Reference {
    let source_kind: String = row.get("source_kind");
    let target_kind: String = row.get("target_kind");
    Reference {
        id: row.get("id"),
        source_id: row.get("source_id"),
        source_kind: AssetKind::parse(&source_kind).unwrap_or(AssetKind::Document),
        target_id: row.get("target_id"),
        target_kind: AssetKind::parse(&target_kind).unwrap_or(AssetKind::Document),
        created_at: timestamp_to_utc(row.get("created_at")),
    }
}
