pub mod archive;
pub mod export;
pub mod import;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use cardbox::ai::local::local_capabilities;
use cardbox::cards::CardStore;
use cardbox::config::CardboxConfig;
use cardbox::db::SqliteRecordStore;

/// Open the record-store-backed card store at the configured database path,
/// with the local summarizer and embedder attached.
pub async fn open_store(config: &CardboxConfig) -> Result<CardStore> {
    let db_path = config.resolved_db_path();
    let records = SqliteRecordStore::open(&db_path)
        .with_context(|| format!("failed to open card database at {}", db_path.display()))?;
    CardStore::builder(config.clone())
        .ai(local_capabilities())
        .record_store(Arc::new(records))
        .open()
        .await
}

/// Spinner on stderr for operations without a known length.
pub(crate) fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
