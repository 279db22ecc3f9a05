use anyhow::Result;

use cardbox::cards::{Card, SearchHit};
use cardbox::config::CardboxConfig;

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Text,
    Semantic,
    Tag,
}

/// Run a search from the terminal.
pub async fn search(
    config: &CardboxConfig,
    query: &str,
    mode: SearchMode,
    limit: Option<usize>,
) -> Result<()> {
    let store = super::open_store(config).await?;
    let limit = limit.unwrap_or(config.search.default_limit);

    let hits: Vec<SearchHit> = match mode {
        SearchMode::Text => store.search_by_text(query, limit).await?,
        SearchMode::Semantic => store.search_by_semantic(query, limit).await?,
        SearchMode::Tag => store
            .search_by_tag(query)
            .await
            .into_iter()
            .take(limit)
            .map(|card| SearchHit { card, score: 1.0 })
            .collect(),
    };

    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {}. [{}] {} {} (score: {:.4})",
            i + 1,
            hit.card.card_type,
            hit.card.id,
            hit.card.title,
            hit.score,
        );
        if !hit.card.tags.is_empty() {
            let tags: Vec<&str> = hit.card.tags.iter().map(String::as_str).collect();
            println!("     tags: {}", tags.join(", "));
        }
        println!("     {}", preview(&hit.card));
        println!();
    }

    Ok(())
}

fn preview(card: &Card) -> String {
    let text = card
        .summary
        .as_deref()
        .or(card.content.as_deref())
        .unwrap_or(&card.description)
        .replace('\n', " ");
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        text
    }
}
