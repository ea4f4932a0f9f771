//! Upload pipeline orchestration.
//!
//! Wires the stages together for one archive:
//! validate → extract → classify → record in catalog → link references.
//!
//! Validation and extraction are synchronous filesystem work and run on the
//! blocking pool. The package and its assets are recorded in one
//! transaction; if that fails, the extracted directory is removed so that
//! no orphaned package survives. Reference linking happens afterwards, one
//! transaction per document.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::catalog::{Catalog, NewAudio, NewDocument, NewPackage};
use crate::classify::{self, Inventory};
use crate::config::{Config, PACKAGES_DIR_NAME};
use crate::db;
use crate::error::PackageError;
use crate::extract::{self, ExtractedPackage};
use crate::link::{self, AssetRef};
use crate::models::PackageContents;
use crate::policy;

/// Uploader recorded for packages ingested from the command line.
pub const CLI_UPLOADER: &str = "cli";

/// An archive waiting to be processed.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Name supplied by the client; only used for the extension check and
    /// recorded as `source_archive_name`.
    pub file_name: String,
    /// Where the archive bytes currently live.
    pub path: PathBuf,
}

/// Run the whole pipeline for one archive.
///
/// Typed failures from validation and extraction are returned as a
/// [`PackageError`] inside the `anyhow::Error`, so callers can downcast to
/// pick a response.
pub async fn process_upload(
    config: &Config,
    catalog: &Catalog,
    upload: Upload,
    uploaded_by: &str,
) -> Result<PackageContents> {
    if let Err(e) = check_upload(&upload) {
        tracing::warn!(archive = %upload.file_name, error = %e, "upload rejected");
        return Err(e.into());
    }

    let packages_dir = config.storage.packages_dir();
    let limits = config.limits.extract_limits();
    let archive_path = upload.path.clone();

    let (extracted, inventory) = tokio::task::spawn_blocking(
        move || -> Result<(ExtractedPackage, Inventory)> {
            let extracted = extract::extract_package(&archive_path, &packages_dir, &limits)?;
            match classify::classify_package(&extracted.root) {
                Ok(inventory) => Ok((extracted, inventory)),
                Err(e) => {
                    remove_package_dir(&extracted.root);
                    Err(e.context("Failed to classify extracted package"))
                }
            }
        },
    )
    .await
    .context("extraction task failed")?
    .inspect_err(|e| {
        tracing::warn!(archive = %upload.file_name, error = %e, "upload rejected");
    })?;

    for name in &extracted.skipped {
        tracing::info!(package = %extracted.id, entry = %name, "entry skipped");
    }

    let new = new_package(&upload.file_name, uploaded_by, &extracted, &inventory);
    let recorded = match catalog.record_package(&new).await {
        Ok(r) => r,
        Err(e) => {
            remove_package_dir(&extracted.root);
            return Err(e.context("Failed to record package"));
        }
    };

    tracing::info!(
        package = %recorded.package.id,
        archive = %upload.file_name,
        audio = recorded.audio.len(),
        documents = recorded.documents.len(),
        bytes = recorded.package.total_bytes,
        "package recorded"
    );

    let audio_refs: Vec<AssetRef<'_>> = recorded
        .audio
        .iter()
        .map(|a| AssetRef {
            id: &a.id,
            file_name: &a.original_name,
        })
        .collect();
    let document_refs: Vec<AssetRef<'_>> = recorded
        .documents
        .iter()
        .map(|d| AssetRef {
            id: &d.id,
            file_name: &d.original_name,
        })
        .collect();

    let mut references = Vec::new();
    for doc in &recorded.documents {
        let targets = link::link_document(&doc.id, &doc.raw_text, &audio_refs, &document_refs);
        let inserted = catalog
            .insert_references(&doc.id, &targets)
            .await
            .with_context(|| format!("Failed to record references for {}", doc.original_name))?;
        if !inserted.is_empty() {
            tracing::debug!(document = %doc.id, count = inserted.len(), "references recorded");
        }
        references.extend(inserted);
    }

    Ok(PackageContents {
        package: recorded.package,
        audio_files: recorded.audio,
        documents: recorded.documents,
        references,
    })
}

fn check_upload(upload: &Upload) -> Result<(), PackageError> {
    if !policy::is_package_upload_name(&upload.file_name) {
        return Err(PackageError::UnsupportedUpload(upload.file_name.clone()));
    }
    let len = std::fs::metadata(&upload.path)
        .map_err(|e| PackageError::storage(&upload.path, e))?
        .len();
    if len == 0 {
        return Err(PackageError::EmptyUpload);
    }
    Ok(())
}

fn new_package(
    archive_name: &str,
    uploaded_by: &str,
    extracted: &ExtractedPackage,
    inventory: &Inventory,
) -> NewPackage {
    let storage_path =
        |internal: &str| format!("{}/{}/{}", PACKAGES_DIR_NAME, extracted.id, internal);

    NewPackage {
        id: extracted.id.clone(),
        source_archive_name: archive_name.to_string(),
        total_bytes: extracted.total_bytes,
        entry_count: extracted.files.len() as u64,
        uploaded_by: uploaded_by.to_string(),
        audio: inventory
            .audio
            .iter()
            .map(|a| NewAudio {
                original_name: a.file_name.clone(),
                internal_path: a.internal_path.clone(),
                folder: a.folder,
                byte_size: a.byte_size,
                mime_type: policy::audio_mime_type(&a.file_name).to_string(),
                storage_path: storage_path(&a.internal_path),
            })
            .collect(),
        documents: inventory
            .documents
            .iter()
            .map(|d| NewDocument {
                original_name: d.file_name.clone(),
                internal_path: d.internal_path.clone(),
                folder: d.folder,
                title: d.title.clone(),
                raw_text: d.text.clone(),
            })
            .collect(),
    }
}

fn remove_package_dir(root: &Path) {
    match std::fs::remove_dir_all(root) {
        Ok(()) => tracing::info!(path = %root.display(), "removed unrecorded package"),
        Err(e) => {
            tracing::warn!(path = %root.display(), error = %e, "failed to remove unrecorded package")
        }
    }
}

/// `mag ingest <archive>`: process a local archive and print a summary.
pub async fn run_ingest(config: &Config, archive: &Path, uploaded_by: &str) -> Result<()> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file path: {}", archive.display()))?;

    let pool = db::connect(config).await?;
    let catalog = Catalog::new(pool, config.storage.root.clone());

    let contents = process_upload(
        config,
        &catalog,
        Upload {
            file_name,
            path: archive.to_path_buf(),
        },
        uploaded_by,
    )
    .await?;

    println!("ingest {}", archive.display());
    println!("  package: {}", contents.package.id);
    println!("  files extracted: {}", contents.package.entry_count);
    println!("  bytes extracted: {}", contents.package.total_bytes);
    println!("  audio: {}", contents.audio_files.len());
    println!("  documents: {}", contents.documents.len());
    println!("  references: {}", contents.references.len());
    println!("ok");

    catalog.pool().close().await;
    Ok(())
}
