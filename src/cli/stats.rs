use anyhow::Result;

use cardbox::config::CardboxConfig;

/// Display card statistics in the terminal.
pub async fn stats(config: &CardboxConfig) -> Result<()> {
    let store = super::open_store(config).await?;
    let stats = store.stats().await;

    println!("Card Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total cards:         {}", stats.total_cards);
    println!("  Embedded:            {}", stats.embedded_cards);
    println!("  Summarized:          {}", stats.summarized_cards);
    println!("  Opened at least once: {}", stats.opened_cards);
    println!();

    println!("By Type:");
    for (card_type, count) in &stats.by_type {
        println!("  {:<12} {}", card_type, count);
    }
    println!();

    println!("Decks:                 {} user, {} smart", stats.user_decks, stats.smart_decks);
    println!("Links:                 {} ({} cards linked)", stats.links, stats.linked_cards);
    println!("Distinct tags:         {}", stats.distinct_tags);
    println!("LSH buckets:           {}", stats.lsh_buckets);
    if let Some(dims) = stats.embedding_dimensions {
        println!("Embedding dimensions:  {}", dims);
    }
    println!("Database:              {}", config.resolved_db_path().display());

    Ok(())
}
