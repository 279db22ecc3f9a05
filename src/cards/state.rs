//! The in-memory entity graph and its card-level mutations.
//!
//! [`State`] owns cards, decks, links, usage statistics and every secondary
//! index. All methods are synchronous and run under the store's single lock;
//! each mutation records what it changed into a [`ChangeSet`] which the store
//! persists and publishes once the method returns.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::cards::events::StoreEvent;
use crate::cards::smart::is_smart_deck;
use crate::cards::types::{
    normalize_labels, Card, CardInput, CardPatch, Deck, Link, UsageStats,
};
use crate::config::{CardboxConfig, SmartDeckConfig};
use crate::enrich::{heuristic, EnrichmentOutcome};
use crate::error::{Result, StoreError};
use crate::index::Indexes;

/// Everything one mutation touched: events to publish and records to persist.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub(crate) events: Vec<StoreEvent>,
    pub(crate) saved_cards: Vec<String>,
    pub(crate) deleted_cards: Vec<String>,
    pub(crate) saved_links: Vec<String>,
    pub(crate) deleted_links: Vec<String>,
    pub(crate) touched_usage: Vec<String>,
}

impl ChangeSet {
    pub fn card_created(&mut self, id: &str) {
        self.events.push(StoreEvent::CardCreated {
            card_id: id.to_string(),
        });
        self.save_card(id);
    }

    pub fn card_updated(&mut self, id: &str) {
        self.events.push(StoreEvent::CardUpdated {
            card_id: id.to_string(),
        });
        self.save_card(id);
    }

    pub fn card_processed(&mut self, id: &str) {
        self.events.push(StoreEvent::CardProcessed {
            card_id: id.to_string(),
        });
        self.save_card(id);
    }

    pub fn card_removed(&mut self, id: &str) {
        self.events.push(StoreEvent::CardRemoved {
            card_id: id.to_string(),
        });
        self.deleted_cards.push(id.to_string());
    }

    pub fn deck_updated(&mut self, name: &str) {
        self.events.push(StoreEvent::DeckUpdated {
            name: name.to_string(),
        });
    }

    pub fn deck_removed(&mut self, name: &str) {
        self.events.push(StoreEvent::DeckRemoved {
            name: name.to_string(),
        });
    }

    pub fn link_created(&mut self, id: &str) {
        self.events.push(StoreEvent::LinkCreated {
            link_id: id.to_string(),
        });
        self.saved_links.push(id.to_string());
    }

    pub fn link_updated(&mut self, id: &str) {
        self.events.push(StoreEvent::LinkUpdated {
            link_id: id.to_string(),
        });
        self.saved_links.push(id.to_string());
    }

    pub fn link_removed(&mut self, id: &str) {
        self.events.push(StoreEvent::LinkRemoved {
            link_id: id.to_string(),
        });
        self.deleted_links.push(id.to_string());
    }

    pub fn usage_touched(&mut self, id: &str) {
        self.touched_usage.push(id.to_string());
    }

    pub fn push_event(&mut self, event: StoreEvent) {
        self.events.push(event);
    }

    /// Persist a card without announcing a change.
    pub fn save_card(&mut self, id: &str) {
        self.saved_cards.push(id.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.saved_cards.is_empty()
            && self.deleted_cards.is_empty()
            && self.saved_links.is_empty()
            && self.deleted_links.is_empty()
            && self.touched_usage.is_empty()
    }
}

#[derive(Debug)]
pub struct State {
    pub(crate) cards: HashMap<String, Card>,
    /// Card ids in insertion order.
    pub(crate) order: Vec<String>,
    pub(crate) decks: BTreeMap<String, Deck>,
    pub(crate) links: HashMap<String, Link>,
    pub(crate) usage: HashMap<String, UsageStats>,
    pub(crate) indexes: Indexes,
    next_card_id: u64,
    next_link_id: u64,
    pub(crate) smart: SmartDeckConfig,
    lsh_planes: usize,
    lsh_seed: Option<u64>,
}

impl State {
    pub fn new(config: &CardboxConfig) -> Self {
        Self::with_settings(
            config.smart_decks.clone(),
            config.search.lsh_planes,
            config.search.lsh_seed,
        )
    }

    fn with_settings(smart: SmartDeckConfig, lsh_planes: usize, lsh_seed: Option<u64>) -> Self {
        Self {
            cards: HashMap::new(),
            order: Vec::new(),
            decks: BTreeMap::new(),
            links: HashMap::new(),
            usage: HashMap::new(),
            indexes: Indexes::new(lsh_planes, lsh_seed),
            next_card_id: 1,
            next_link_id: 1,
            smart,
            lsh_planes,
            lsh_seed,
        }
    }

    /// A fresh, empty graph with the same settings.
    pub fn empty_like(&self) -> Self {
        Self::with_settings(self.smart.clone(), self.lsh_planes, self.lsh_seed)
    }

    pub fn card(&self, id: &str) -> Option<&Card> {
        self.cards.get(id)
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    pub fn cards_in_order(&self) -> impl Iterator<Item = &Card> + '_ {
        self.order.iter().filter_map(|id| self.cards.get(id))
    }

    pub fn usage(&self, id: &str) -> Option<UsageStats> {
        self.usage.get(id).copied()
    }

    /// Advance the auto-id counter past a numeric id supplied from outside.
    pub(crate) fn observe_card_id(&mut self, id: &str) {
        if let Ok(n) = id.parse::<u64>() {
            self.next_card_id = self.next_card_id.max(n.saturating_add(1));
        }
    }

    pub(crate) fn observe_link_id(&mut self, id: &str) {
        if let Ok(n) = id.parse::<u64>() {
            self.next_link_id = self.next_link_id.max(n.saturating_add(1));
        }
    }

    fn allocate_card_id(&mut self, explicit: Option<String>) -> Result<String> {
        if let Some(raw) = explicit {
            let id = raw.trim().to_string();
            if id.is_empty() {
                return Err(StoreError::Invalid("card id must not be empty".into()));
            }
            if self.cards.contains_key(&id) {
                return Err(StoreError::DuplicateId(id));
            }
            self.observe_card_id(&id);
            return Ok(id);
        }
        loop {
            let id = self.next_card_id.to_string();
            self.next_card_id += 1;
            if !self.cards.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    pub(crate) fn allocate_link_id(&mut self) -> String {
        loop {
            let id = self.next_link_id.to_string();
            self.next_link_id += 1;
            if !self.links.contains_key(&id) {
                return id;
            }
        }
    }

    /// Insert a new card. Validation happens before any state is touched.
    pub fn create_card(
        &mut self,
        input: CardInput,
        heuristics: bool,
        now: DateTime<Utc>,
        cs: &mut ChangeSet,
    ) -> Result<String> {
        let decks = normalize_labels(&input.decks);
        if let Some(reserved) = decks.iter().find(|d| is_smart_deck(d)) {
            return Err(StoreError::ReservedDeck(reserved.clone()));
        }
        let id = self.allocate_card_id(input.id)?;

        let mut card = Card {
            id: id.clone(),
            title: input.title,
            content: non_blank(input.content),
            source: non_blank(input.source),
            card_type: input.card_type,
            tags: normalize_labels(&input.tags),
            decks: BTreeSet::new(),
            description: input.description.unwrap_or_default(),
            created_at: input.created_at.unwrap_or(now),
            summary: None,
            illustration: None,
            embedding: input.embedding.filter(|v| !v.is_empty()),
            search_text: String::new(),
        };
        card.refresh_search_text();
        if heuristics {
            heuristic::apply(&mut card);
        }

        self.indexes.insert_card(&card);
        self.order.push(id.clone());
        self.cards.insert(id.clone(), card);
        cs.card_created(&id);

        for name in &decks {
            self.join_deck(&id, name, cs);
        }
        self.refresh_smart_decks(now, cs);

        tracing::info!(card_id = %id, decks = decks.len(), "card created");
        Ok(id)
    }

    /// Apply a partial update. Returns `None` for an unknown id, otherwise
    /// whether the text that feeds enrichment changed.
    pub fn update_card(
        &mut self,
        id: &str,
        patch: CardPatch,
        heuristics: bool,
        now: DateTime<Utc>,
        cs: &mut ChangeSet,
    ) -> Result<Option<bool>> {
        let new_decks = patch.decks.as_ref().map(|d| normalize_labels(d));
        if let Some(reserved) = new_decks
            .iter()
            .flatten()
            .find(|d| is_smart_deck(d))
        {
            return Err(StoreError::ReservedDeck(reserved.clone()));
        }
        let Some(card) = self.cards.get_mut(id) else {
            return Ok(None);
        };
        let before = card.clone();
        let touches_text = patch.touches_text();
        let tags_set = patch.tags.is_some();
        let description_set = patch.description.is_some();

        if let Some(title) = patch.title {
            card.title = title;
        }
        if let Some(content) = patch.content {
            card.content = non_blank(Some(content));
        }
        if let Some(source) = patch.source {
            card.source = non_blank(Some(source));
        }
        if let Some(card_type) = patch.card_type {
            card.card_type = card_type;
        }
        if let Some(tags) = patch.tags {
            card.tags = normalize_labels(&tags);
        }
        if let Some(description) = patch.description {
            card.description = description;
        }
        if let Some(summary) = patch.summary {
            card.summary = non_blank(Some(summary));
        }
        if let Some(illustration) = patch.illustration {
            card.illustration = non_blank(Some(illustration));
        }

        let text_changed = touches_text
            && (card.title != before.title
                || card.content != before.content
                || card.description != before.description
                || card.source != before.source);
        match patch.embedding {
            Some(vector) => card.embedding = Some(vector).filter(|v| !v.is_empty()),
            // Embeddings do not survive a change of the text they were computed from.
            None if text_changed => card.embedding = None,
            None => {}
        }
        card.refresh_search_text();
        if heuristics {
            heuristic::fill(card, !tags_set, !description_set);
        }

        self.indexes.tags.update(id, &before.tags, &card.tags);
        if card.embedding != before.embedding {
            match &card.embedding {
                Some(vector) => self.indexes.semantic.insert(id, vector),
                None => {
                    self.indexes.semantic.remove(id);
                }
            }
        }
        if card.search_text != before.search_text || card.tags != before.tags {
            self.indexes.text.mark_dirty();
        }
        let current_user_decks: BTreeSet<String> = card
            .decks
            .iter()
            .filter(|d| !is_smart_deck(d))
            .cloned()
            .collect();
        cs.card_updated(id);

        if let Some(wanted) = new_decks {
            for gone in current_user_decks.difference(&wanted) {
                self.leave_deck(id, gone, cs);
            }
            for joined in wanted.difference(&current_user_decks) {
                self.join_deck(id, joined, cs);
            }
        }
        self.refresh_smart_decks(now, cs);

        tracing::info!(card_id = %id, text_changed, "card updated");
        Ok(Some(text_changed))
    }

    /// Delete a card, its deck memberships and every link touching it.
    pub fn remove_card(&mut self, id: &str, now: DateTime<Utc>, cs: &mut ChangeSet) -> bool {
        let Some(card) = self.cards.remove(id) else {
            return false;
        };
        self.order.retain(|c| c != id);
        self.indexes.remove_card(&card);
        cs.card_removed(id);

        for name in &card.decks {
            if let Some(deck) = self.decks.get_mut(name) {
                if deck.cards.remove(id) {
                    cs.deck_updated(name);
                }
            }
        }
        let touching = self.indexes.adjacency.links_of(id);
        for link_id in &touching {
            if let Some(link) = self.links.remove(link_id) {
                self.indexes.remove_link(&link);
                cs.link_removed(link_id);
            }
        }
        self.usage.remove(id);
        self.refresh_smart_decks(now, cs);

        tracing::info!(card_id = %id, links_removed = touching.len(), "card removed");
        true
    }

    /// Count one open of a card at `when`.
    pub fn record_usage(
        &mut self,
        id: &str,
        when: DateTime<Utc>,
        now: DateTime<Utc>,
        cs: &mut ChangeSet,
    ) -> bool {
        if !self.cards.contains_key(id) {
            return false;
        }
        let stats = self.usage.entry(id.to_string()).or_default();
        stats.count = stats.count.saturating_add(1);
        stats.last_opened = Some(stats.last_opened.map_or(when, |prev| prev.max(when)));
        let count = stats.count;
        cs.usage_touched(id);
        self.refresh_smart_decks(now, cs);
        tracing::debug!(card_id = %id, count, "card usage recorded");
        true
    }

    /// Attach settled enrichment results. The caller has already checked that
    /// the card still exists and that its text matches what was dispatched.
    pub(crate) fn apply_enrichment(
        &mut self,
        id: &str,
        outcome: EnrichmentOutcome,
        cs: &mut ChangeSet,
    ) -> bool {
        let Some(card) = self.cards.get_mut(id) else {
            return false;
        };
        match outcome.embedding {
            Some(Ok(vector)) if card.embedding.is_none() => {
                self.indexes.semantic.insert(id, &vector);
                card.embedding = Some(vector);
            }
            Some(Ok(_)) | None => {}
            Some(Err(e)) => {
                tracing::warn!(card_id = %id, error = %e, "embedding failed");
                cs.push_event(StoreEvent::enrichment_error(id, format!("embedding: {e}")));
            }
        }
        match outcome.summary {
            Some(Ok(summary)) => card.summary = non_blank(Some(summary)),
            Some(Err(e)) => {
                tracing::warn!(card_id = %id, error = %e, "summary failed");
                cs.push_event(StoreEvent::enrichment_error(id, format!("summary: {e}")));
            }
            None => {}
        }
        match outcome.illustration {
            Some(Ok(reference)) => card.illustration = non_blank(Some(reference)),
            Some(Err(e)) => {
                tracing::warn!(card_id = %id, error = %e, "illustration failed");
                cs.push_event(StoreEvent::enrichment_error(id, format!("illustration: {e}")));
            }
            None => {}
        }
        cs.card_processed(id);
        true
    }

    /// Rebuild every secondary index from the current cards and links.
    pub(crate) fn rebuild_indexes(&mut self) {
        self.indexes = Indexes::rebuild(
            self.lsh_planes,
            self.lsh_seed,
            self.order.iter().filter_map(|id| self.cards.get(id)),
            self.links.values(),
        );
    }

    /// Position of each card id in insertion order.
    pub(crate) fn positions(&self) -> HashMap<&str, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }
}

/// `None` for absent or whitespace-only strings.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
