use anyhow::{Context, Result};
use std::path::Path;

use cardbox::config::CardboxConfig;

/// Export the card graph as JSON to stdout or a file, or as a password-sealed
/// file when a password is given.
pub async fn export(
    config: &CardboxConfig,
    output: Option<&Path>,
    password: Option<&str>,
) -> Result<()> {
    let store = super::open_store(config).await?;
    let stats = store.stats().await;

    match (output, password) {
        (Some(path), Some(password)) => {
            let pb = super::spinner("deriving key and encrypting");
            let result = store.export_encrypted(path, password).await;
            pb.finish_and_clear();
            result.with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Encrypted snapshot written to {}", path.display());
        }
        (None, Some(_)) => {
            anyhow::bail!("an encrypted export needs --output");
        }
        (Some(path), None) => {
            let json = store.to_json().await?;
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Snapshot written to {}", path.display());
        }
        (None, None) => {
            println!("{}", store.to_json().await?);
        }
    }

    eprintln!(
        "Exported {} cards and {} links.",
        stats.total_cards, stats.links
    );
    Ok(())
}
