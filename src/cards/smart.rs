//! System-managed decks derived from creation time, usage and tag counts.
//!
//! Recomputation is a set reconciliation: for each smart deck the desired
//! member set is computed, diffed against the current members, and only the
//! delta is applied. A deck or card is announced as updated only when its
//! membership actually changed.

use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::cards::state::{ChangeSet, State};
use crate::cards::types::Deck;

pub const RECENT: &str = "recent";
pub const FREQUENT: &str = "frequent";
pub const UNSEEN: &str = "unseen";
pub const STALE: &str = "stale";
pub const TAG_DECK_PREFIX: &str = "tag:";

/// Whether `name` (already normalized) belongs to a system-managed deck.
pub fn is_smart_deck(name: &str) -> bool {
    matches!(name, RECENT | FREQUENT | UNSEEN | STALE) || name.starts_with(TAG_DECK_PREFIX)
}

pub fn tag_deck_name(tag: &str) -> String {
    format!("{TAG_DECK_PREFIX}{tag}")
}

impl State {
    /// Bring every smart deck in line with the current cards and usage.
    pub(crate) fn refresh_smart_decks(&mut self, now: DateTime<Utc>, cs: &mut ChangeSet) {
        let recent_cutoff = now - Duration::days(self.smart.recent_days);
        let stale_cutoff = now - Duration::days(self.smart.stale_days);

        let mut recent = BTreeSet::new();
        let mut unseen = BTreeSet::new();
        let mut stale = BTreeSet::new();
        for card in self.cards_in_order() {
            let usage = self.usage.get(&card.id).copied().unwrap_or_default();
            if card.created_at >= recent_cutoff {
                recent.insert(card.id.clone());
            }
            if usage.count == 0 {
                unseen.insert(card.id.clone());
            }
            if usage.last_opened.map_or(true, |t| t < stale_cutoff) {
                stale.insert(card.id.clone());
            }
        }
        let frequent = self.most_used(self.smart.frequent_size);

        self.reconcile_deck(RECENT, recent, cs);
        self.reconcile_deck(FREQUENT, frequent, cs);
        self.reconcile_deck(UNSEEN, unseen, cs);
        self.reconcile_deck(STALE, stale, cs);

        let min_cards = self.smart.tag_deck_min_cards.max(1);
        let wanted: BTreeMap<String, BTreeSet<String>> = self
            .indexes
            .tags
            .iter()
            .filter(|(_, ids)| ids.len() >= min_cards)
            .map(|(tag, ids)| (tag_deck_name(tag), ids.clone()))
            .collect();
        let obsolete: Vec<String> = self
            .decks
            .keys()
            .filter(|name| name.starts_with(TAG_DECK_PREFIX) && !wanted.contains_key(*name))
            .cloned()
            .collect();
        for name in obsolete {
            self.drop_deck(&name, cs);
        }
        for (name, ids) in wanted {
            self.reconcile_deck(&name, ids, cs);
        }
    }

    /// The `n` most-opened cards; ties keep insertion order.
    fn most_used(&self, n: usize) -> BTreeSet<String> {
        let mut ranked: Vec<(&String, u32)> = self
            .order
            .iter()
            .filter(|id| self.cards.contains_key(*id))
            .map(|id| (id, self.usage.get(id).map_or(0, |u| u.count)))
            .collect();
        ranked.sort_by_key(|(_, count)| Reverse(*count));
        ranked
            .into_iter()
            .take(n)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn reconcile_deck(&mut self, name: &str, desired: BTreeSet<String>, cs: &mut ChangeSet) {
        let created = !self.decks.contains_key(name);
        let deck = self
            .decks
            .entry(name.to_string())
            .or_insert_with(|| Deck::new(name));
        let removed: Vec<String> = deck.cards.difference(&desired).cloned().collect();
        let added: Vec<String> = desired.difference(&deck.cards).cloned().collect();
        if !created && removed.is_empty() && added.is_empty() {
            return;
        }
        deck.cards = desired;

        for id in &removed {
            if let Some(card) = self.cards.get_mut(id) {
                card.decks.remove(name);
                cs.card_updated(id);
            }
        }
        for id in &added {
            if let Some(card) = self.cards.get_mut(id) {
                card.decks.insert(name.to_string());
                cs.card_updated(id);
            }
        }
        cs.deck_updated(name);
        tracing::debug!(
            deck = %name,
            added = added.len(),
            removed = removed.len(),
            "smart deck reconciled"
        );
    }
}
