//! Catalog commands: `packages`, `links` and `delete`.

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db;
use crate::models::AssetKind;

async fn open_catalog(config: &Config) -> Result<Catalog> {
    let pool = db::connect(config).await?;
    Ok(Catalog::new(pool, config.storage.root.clone()))
}

/// `mag packages`: list packages, most recent first.
pub async fn run_list_packages(config: &Config) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let packages = catalog.list_packages().await?;

    if packages.is_empty() {
        println!("No packages.");
    }
    for p in &packages {
        println!("{}  {}", p.id, p.source_archive_name);
        println!(
            "    added: {}  by: {}",
            p.created_at.format("%Y-%m-%d %H:%M:%S"),
            p.uploaded_by
        );
        println!("    files: {}  bytes: {}", p.entry_count, p.total_bytes);
    }

    catalog.pool().close().await;
    Ok(())
}

/// `mag links <source-id>`: references recorded for a document.
pub async fn run_links(config: &Config, source_id: &str) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let refs = catalog.references_from(source_id).await?;

    if refs.is_empty() {
        println!("No references.");
    }
    for r in &refs {
        let name = match r.target_kind {
            AssetKind::Audio => catalog.get_audio(&r.target_id).await?.map(|a| a.original_name),
            AssetKind::Document => catalog
                .get_document(&r.target_id)
                .await?
                .map(|d| d.original_name),
        };
        println!(
            "{} -> {} {} ({})",
            r.source_id,
            r.target_kind.as_str(),
            r.target_id,
            name.as_deref().unwrap_or("missing")
        );
    }

    catalog.pool().close().await;
    Ok(())
}

/// `mag delete audio|document <id>`.
pub async fn run_delete(config: &Config, kind: AssetKind, id: &str) -> Result<()> {
    let catalog = open_catalog(config).await?;
    let deleted = match kind {
        AssetKind::Audio => catalog.delete_audio(id).await?,
        AssetKind::Document => catalog.delete_document(id).await?,
    };
    catalog.pool().close().await;

    if !deleted {
        anyhow::bail!("{} not found: {}", kind.as_str(), id);
    }
    println!("Deleted {} {}", kind.as_str(), id);
    Ok(())
}
