//! Card-id → link-id adjacency, covering both endpoints of every link.

use std::collections::{BTreeSet, HashMap};

use crate::cards::types::Link;

#[derive(Debug, Default)]
pub struct LinkAdjacency {
    edges: HashMap<String, BTreeSet<String>>,
}

impl LinkAdjacency {
    pub fn add(&mut self, link: &Link) {
        for end in [&link.from, &link.to] {
            self.edges
                .entry(end.clone())
                .or_default()
                .insert(link.id.clone());
        }
    }

    pub fn remove(&mut self, link: &Link) {
        for end in [&link.from, &link.to] {
            if let Some(ids) = self.edges.get_mut(end) {
                ids.remove(&link.id);
                if ids.is_empty() {
                    self.edges.remove(end);
                }
            }
        }
    }

    /// Link ids touching `card_id`.
    pub fn links_of(&self, card_id: &str) -> Vec<String> {
        self.edges
            .get(card_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn degree(&self, card_id: &str) -> usize {
        self.edges.get(card_id).map_or(0, BTreeSet::len)
    }
}
