use anyhow::{Context, Result};
use std::path::Path;

use cardbox::config::CardboxConfig;
use cardbox::snapshot::crypto;

/// Replace the stored card graph with a snapshot file. Sealed files are
/// recognized by their header and need a password.
pub async fn import(config: &CardboxConfig, file: &Path, password: Option<&str>) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read import file: {}", file.display()))?;
    let store = super::open_store(config).await?;

    if crypto::is_sealed(&data) {
        let password = password.context("snapshot is encrypted; pass --password")?;
        let pb = super::spinner("deriving key and decrypting");
        let result = store.import_encrypted(file, password).await;
        pb.finish_and_clear();
        result.context("failed to import encrypted snapshot")?;
    } else {
        let json = String::from_utf8(data).context("snapshot is not valid UTF-8")?;
        store
            .load_json(&json)
            .await
            .context("failed to import snapshot")?;
    }

    let stats = store.stats().await;
    println!(
        "Imported {} cards, {} links and {} user decks.",
        stats.total_cards, stats.links, stats.user_decks
    );
    Ok(())
}
