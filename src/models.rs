//! Catalog records.
//!
//! These types mirror the rows stored in SQLite and are serialized as-is
//! by the HTTP API.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::policy::PackageFolder;

/// One uploaded and extracted `.mag` archive.
#[derive(Debug, Clone, Serialize)]
pub struct Package {
    /// Random hex id, also the package directory name.
    pub id: String,
    pub source_archive_name: String,
    pub total_bytes: i64,
    pub entry_count: i64,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

/// Whether an audio track is the package narration or an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRole {
    Primary,
    Attachment,
}

impl AudioRole {
    pub fn for_folder(folder: Option<PackageFolder>) -> Self {
        match folder {
            Some(PackageFolder::Narration) => AudioRole::Primary,
            _ => AudioRole::Attachment,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioAsset {
    pub id: String,
    pub package_id: String,
    pub original_name: String,
    pub internal_path: String,
    pub folder: Option<PackageFolder>,
    pub role: AudioRole,
    pub byte_size: i64,
    pub mime_type: String,
    /// Path below the storage root, forward slashes.
    pub storage_relative_path: String,
    pub url: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentAsset {
    pub id: String,
    pub package_id: String,
    pub original_name: String,
    pub internal_path: String,
    pub folder: Option<PackageFolder>,
    pub title: String,
    pub raw_text: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Audio,
    Document,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Audio => "audio",
            AssetKind::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(AssetKind::Audio),
            "document" => Some(AssetKind::Document),
            _ => None,
        }
    }
}

/// Directed edge from a document to an asset it mentions.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub id: String,
    pub source_id: String,
    pub source_kind: AssetKind,
    pub target_id: String,
    pub target_kind: AssetKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub code: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub profile: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A package together with everything extracted from it.
#[derive(Debug, Clone, Serialize)]
pub struct PackageContents {
    pub package: Package,
    pub audio_files: Vec<AudioAsset>,
    pub documents: Vec<DocumentAsset>,
    pub references: Vec<Reference>,
}

/// Result of a catalog search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub audio_files: Vec<AudioAsset>,
    pub documents: Vec<DocumentAsset>,
}

pub fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}
