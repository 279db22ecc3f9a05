//! Aggregate counts over the card graph.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::cards::smart::is_smart_deck;
use crate::cards::state::State;
use crate::cards::types::CardType;

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_cards: usize,
    pub by_type: BTreeMap<String, usize>,
    pub embedded_cards: usize,
    pub summarized_cards: usize,
    pub user_decks: usize,
    pub smart_decks: usize,
    pub links: usize,
    /// Cards with at least one incoming or outgoing link.
    pub linked_cards: usize,
    pub distinct_tags: usize,
    pub lsh_buckets: usize,
    /// Vector size fixed by the first embedding, if any.
    pub embedding_dimensions: Option<usize>,
    pub opened_cards: usize,
}

impl State {
    pub fn stats(&self) -> StoreStats {
        let mut by_type: BTreeMap<String, usize> = CardType::all()
            .iter()
            .map(|t| (t.as_str().to_string(), 0))
            .collect();
        let mut embedded_cards = 0;
        let mut summarized_cards = 0;
        let mut linked_cards = 0;
        for (id, card) in &self.cards {
            if self.indexes.adjacency.degree(id) > 0 {
                linked_cards += 1;
            }
            *by_type.entry(card.card_type.as_str().to_string()).or_default() += 1;
            if card.embedding.is_some() {
                embedded_cards += 1;
            }
            if card.summary.is_some() {
                summarized_cards += 1;
            }
        }
        let smart_decks = self.decks.keys().filter(|n| is_smart_deck(n)).count();

        StoreStats {
            total_cards: self.cards.len(),
            by_type,
            embedded_cards,
            summarized_cards,
            user_decks: self.decks.len() - smart_decks,
            smart_decks,
            links: self.links.len(),
            linked_cards,
            distinct_tags: self.indexes.tags.len(),
            lsh_buckets: self.indexes.semantic.bucket_count(),
            embedding_dimensions: self.indexes.semantic.dimensions(),
            opened_cards: self.usage.values().filter(|u| u.count > 0).count(),
        }
    }
}
