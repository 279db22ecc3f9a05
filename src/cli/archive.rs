use anyhow::{Context, Result};
use std::path::Path;

use cardbox::config::CardboxConfig;

/// Bundle the card graph and media directory into a zip archive.
pub async fn export_archive(config: &CardboxConfig, file: &Path) -> Result<()> {
    let store = super::open_store(config).await?;
    let pb = super::spinner("writing archive");
    let result = store.export_archive(file).await;
    pb.finish_and_clear();
    let media_files = result.with_context(|| format!("failed to write {}", file.display()))?;

    let stats = store.stats().await;
    println!(
        "Archived {} cards, {} links and {} media files to {}",
        stats.total_cards,
        stats.links,
        media_files,
        file.display()
    );
    Ok(())
}

/// Replace the stored card graph with an archive and restore its media.
pub async fn import_archive(config: &CardboxConfig, file: &Path) -> Result<()> {
    let store = super::open_store(config).await?;
    let pb = super::spinner("reading archive");
    let result = store.import_archive(file).await;
    pb.finish_and_clear();
    let media_files = result.with_context(|| format!("failed to import {}", file.display()))?;

    let stats = store.stats().await;
    println!(
        "Restored {} cards, {} links and {} media files into {}",
        stats.total_cards,
        stats.links,
        media_files,
        config.resolved_media_dir().display()
    );
    Ok(())
}
