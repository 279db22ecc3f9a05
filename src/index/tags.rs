//! Tag → card-id index, maintained incrementally.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct TagIndex {
    buckets: BTreeMap<String, BTreeSet<String>>,
}

impl TagIndex {
    pub fn add_card(&mut self, card_id: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            self.buckets
                .entry(tag.clone())
                .or_default()
                .insert(card_id.to_string());
        }
    }

    pub fn remove_card(&mut self, card_id: &str, tags: &BTreeSet<String>) {
        for tag in tags {
            self.detach(tag, card_id);
        }
    }

    /// Apply the difference between a card's old and new tag sets.
    pub fn update(&mut self, card_id: &str, old: &BTreeSet<String>, new: &BTreeSet<String>) {
        for gone in old.difference(new) {
            self.detach(gone, card_id);
        }
        for added in new.difference(old) {
            self.buckets
                .entry(added.clone())
                .or_default()
                .insert(card_id.to_string());
        }
    }

    /// Card ids carrying `tag` (already normalized).
    pub fn ids(&self, tag: &str) -> Option<&BTreeSet<String>> {
        self.buckets.get(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.buckets.iter()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn detach(&mut self, tag: &str, card_id: &str) {
        if let Some(ids) = self.buckets.get_mut(tag) {
            ids.remove(card_id);
            if ids.is_empty() {
                self.buckets.remove(tag);
            }
        }
    }
}
