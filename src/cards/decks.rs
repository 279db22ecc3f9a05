//! User deck operations. Membership is always recorded on both sides: in the
//! deck's card set and in each card's deck set.

use crate::cards::smart::is_smart_deck;
use crate::cards::state::{ChangeSet, State};
use crate::cards::types::{normalize_label, Card, Deck};
use crate::error::{Result, StoreError};

/// Normalize a user-supplied deck name, rejecting empty and reserved names.
pub fn user_deck_name(raw: &str) -> Result<String> {
    let name = normalize_label(raw)
        .ok_or_else(|| StoreError::Invalid("deck name must not be empty".into()))?;
    if is_smart_deck(&name) {
        return Err(StoreError::ReservedDeck(name));
    }
    Ok(name)
}

impl State {
    /// Returns `false` when the deck already existed.
    pub fn create_deck(&mut self, name: &str, cs: &mut ChangeSet) -> Result<bool> {
        let name = user_deck_name(name)?;
        if self.decks.contains_key(&name) {
            return Ok(false);
        }
        self.decks.insert(name.clone(), Deck::new(name.as_str()));
        cs.deck_updated(&name);
        tracing::info!(deck = %name, "deck created");
        Ok(true)
    }

    /// Add a card to a deck, creating the deck on first use. Returns `false`
    /// for an unknown card.
    pub fn add_card_to_deck(&mut self, name: &str, card_id: &str, cs: &mut ChangeSet) -> Result<bool> {
        let name = user_deck_name(name)?;
        if !self.cards.contains_key(card_id) {
            return Ok(false);
        }
        if self.join_deck(card_id, &name, cs) {
            cs.card_updated(card_id);
        }
        Ok(true)
    }

    /// Returns whether the card was a member.
    pub fn remove_card_from_deck(
        &mut self,
        name: &str,
        card_id: &str,
        cs: &mut ChangeSet,
    ) -> Result<bool> {
        let name = user_deck_name(name)?;
        let removed = self.leave_deck(card_id, &name, cs);
        if removed {
            cs.card_updated(card_id);
        }
        Ok(removed)
    }

    /// Delete a user deck and detach every member card.
    pub fn remove_deck(&mut self, name: &str, cs: &mut ChangeSet) -> Result<bool> {
        let name = user_deck_name(name)?;
        if !self.decks.contains_key(&name) {
            return Ok(false);
        }
        self.drop_deck(&name, cs);
        Ok(true)
    }

    pub fn deck(&self, name: &str) -> Option<&Deck> {
        normalize_label(name).and_then(|n| self.decks.get(&n))
    }

    pub fn decks(&self) -> impl Iterator<Item = &Deck> + '_ {
        self.decks.values()
    }

    /// Member cards of a deck in insertion order.
    pub fn deck_cards(&self, name: &str) -> Vec<Card> {
        let Some(deck) = self.deck(name) else {
            return Vec::new();
        };
        self.cards_in_order()
            .filter(|card| deck.cards.contains(&card.id))
            .cloned()
            .collect()
    }

    /// Link a card and a deck in both directions. Emits a deck event when
    /// membership changed; the caller announces the card.
    pub(crate) fn join_deck(&mut self, card_id: &str, name: &str, cs: &mut ChangeSet) -> bool {
        let Some(card) = self.cards.get_mut(card_id) else {
            return false;
        };
        let deck = self
            .decks
            .entry(name.to_string())
            .or_insert_with(|| Deck::new(name));
        let joined = deck.cards.insert(card_id.to_string());
        let tagged = card.decks.insert(name.to_string());
        if joined || tagged {
            cs.deck_updated(name);
        }
        joined || tagged
    }

    pub(crate) fn leave_deck(&mut self, card_id: &str, name: &str, cs: &mut ChangeSet) -> bool {
        let left = self
            .decks
            .get_mut(name)
            .is_some_and(|deck| deck.cards.remove(card_id));
        let untagged = self
            .cards
            .get_mut(card_id)
            .is_some_and(|card| card.decks.remove(name));
        if left {
            cs.deck_updated(name);
        }
        left || untagged
    }

    /// Remove a deck of any kind, detaching its members.
    pub(crate) fn drop_deck(&mut self, name: &str, cs: &mut ChangeSet) {
        let Some(deck) = self.decks.remove(name) else {
            return;
        };
        for id in &deck.cards {
            if let Some(card) = self.cards.get_mut(id) {
                if card.decks.remove(name) {
                    cs.card_updated(id);
                }
            }
        }
        cs.deck_removed(name);
        tracing::info!(deck = %name, members = deck.cards.len(), "deck removed");
    }
}
