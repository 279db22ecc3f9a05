//! Tag, text and semantic lookups over the in-memory graph.

use serde::Serialize;
use std::collections::HashSet;

use crate::cards::state::State;
use crate::cards::types::{normalize_label, Card};
use crate::error::Result;
use crate::index::cosine_similarity;

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub card: Card,
    /// Relevance score. Text hits carry the index's score (0 for plain
    /// substring matches); semantic hits carry cosine similarity.
    pub score: f32,
}

impl State {
    /// Cards currently carrying `tag`, in insertion order.
    pub fn search_by_tag(&self, tag: &str) -> Vec<Card> {
        let Some(tag) = normalize_label(tag) else {
            return Vec::new();
        };
        let Some(ids) = self.indexes.tags.ids(&tag) else {
            return Vec::new();
        };
        // Filtering through `order` drops any id whose card is gone.
        self.cards_in_order()
            .filter(|card| ids.contains(&card.id))
            .cloned()
            .collect()
    }

    /// Fuzzy full-text search, followed by plain substring matches the index
    /// did not rank. Rebuilds the text index first if it is stale.
    pub fn search_by_text(&mut self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let State {
            indexes,
            order,
            cards,
            ..
        } = self;
        indexes
            .text
            .ensure_fresh(order.iter().filter_map(|id| cards.get(id)))?;
        let ranked = indexes.text.search(&needle, limit)?;

        let mut seen = HashSet::new();
        let mut hits = Vec::with_capacity(ranked.len());
        for (id, score) in ranked {
            if let Some(card) = cards.get(&id) {
                if seen.insert(id) {
                    hits.push(SearchHit {
                        card: card.clone(),
                        score,
                    });
                }
            }
        }
        for card in order.iter().filter_map(|id| cards.get(id)) {
            if hits.len() >= limit {
                break;
            }
            if seen.contains(&card.id) {
                continue;
            }
            let matches = card.search_text.contains(&needle)
                || card.tags.iter().any(|t| t.contains(&needle));
            if matches {
                seen.insert(card.id.clone());
                hits.push(SearchHit {
                    card: card.clone(),
                    score: 0.0,
                });
            }
        }
        hits.truncate(limit);
        Ok(hits)
    }

    /// Score only the cards sharing the query vector's LSH bucket, best first.
    /// Empty when the index is uninitialized or the bucket holds no signal.
    pub fn semantic_hits(&self, query: &[f32], limit: usize) -> Vec<SearchHit> {
        let Some(key) = self.indexes.semantic.hash(query) else {
            return Vec::new();
        };
        let Some(bucket) = self.indexes.semantic.bucket(&key) else {
            return Vec::new();
        };
        let positions = self.positions();
        let mut hits: Vec<SearchHit> = bucket
            .iter()
            .filter_map(|id| self.cards.get(id))
            .filter_map(|card| {
                let embedding = card.embedding.as_deref()?;
                let score = cosine_similarity(query, embedding);
                (score != 0.0).then(|| SearchHit {
                    card: card.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score.total_cmp(&a.score).then_with(|| {
                let pa = positions.get(a.card.id.as_str()).copied().unwrap_or(usize::MAX);
                let pb = positions.get(b.card.id.as_str()).copied().unwrap_or(usize::MAX);
                pa.cmp(&pb)
            })
        });
        hits.truncate(limit);
        hits
    }
}
