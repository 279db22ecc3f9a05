//! The async store handle.
//!
//! [`CardStore`] wraps the in-memory [`State`] in one async mutex. Each public
//! mutation runs a synchronous [`State`] method, then persists the resulting
//! [`ChangeSet`] and publishes its events before releasing the lock, so
//! subscribers observe events in mutation order. Enrichment runs outside the
//! lock and re-enters it only to apply settled results.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::ai::{AiCapabilities, Suggestion, SuggestionProvider};
use crate::cards::events::{EventBus, StoreEvent};
use crate::cards::search::SearchHit;
use crate::cards::state::{ChangeSet, State};
use crate::cards::stats::StoreStats;
use crate::cards::types::{
    normalize_labels, Card, CardInput, CardPatch, CardType, Deck, Link, UsageStats,
};
use crate::config::{CardboxConfig, EnrichMode};
use crate::db::RecordStore;
use crate::enrich::{Enricher, EnrichmentOutcome};
use crate::error::{Result, StoreError};

/// Semantic hits handed to the chat model as context.
const CHAT_CONTEXT_CARDS: usize = 5;
/// Most common tags of a deck used to ask for suggestions.
const DECK_SUGGESTION_TAGS: usize = 5;

pub(crate) struct Inner {
    pub(crate) state: Mutex<State>,
    pub(crate) events: EventBus,
    pub(crate) enricher: Enricher,
    pub(crate) suggestions: Option<Arc<dyn SuggestionProvider>>,
    pub(crate) records: Option<Arc<dyn RecordStore>>,
    pub(crate) config: CardboxConfig,
}

/// Cheaply cloneable handle to a card store.
#[derive(Clone)]
pub struct CardStore {
    pub(crate) inner: Arc<Inner>,
}

pub struct CardStoreBuilder {
    config: CardboxConfig,
    ai: AiCapabilities,
    suggestions: Option<Arc<dyn SuggestionProvider>>,
    records: Option<Arc<dyn RecordStore>>,
}

impl CardStoreBuilder {
    pub fn ai(mut self, ai: AiCapabilities) -> Self {
        self.ai = ai;
        self
    }

    pub fn suggestions(mut self, provider: Arc<dyn SuggestionProvider>) -> Self {
        self.suggestions = Some(provider);
        self
    }

    /// Persist every mutation incrementally to `records`.
    pub fn record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    /// An empty store. Nothing is loaded from the record store.
    pub fn build(self) -> CardStore {
        let enricher = Enricher::new(self.ai, &self.config.enrichment);
        CardStore {
            inner: Arc::new(Inner {
                state: Mutex::new(State::new(&self.config)),
                events: EventBus::default(),
                enricher,
                suggestions: self.suggestions,
                records: self.records,
                config: self.config,
            }),
        }
    }

    /// Build the store and load the full graph from the record store.
    pub async fn open(self) -> anyhow::Result<CardStore> {
        let store = self.build();
        if let Some(records) = store.inner.records.clone() {
            let snapshot = crate::snapshot::load_records(records.as_ref()).await?;
            let mut state = store.inner.state.lock().await;
            let (loaded, dropped_links) = State::from_snapshot(&state, snapshot, Utc::now())?;
            *state = loaded;
            tracing::info!(
                cards = state.card_count(),
                links = state.links.len(),
                dropped_links,
                "card graph loaded from record store"
            );
        }
        Ok(store)
    }
}

impl CardStore {
    pub fn builder(config: CardboxConfig) -> CardStoreBuilder {
        CardStoreBuilder {
            config,
            ai: AiCapabilities::none(),
            suggestions: None,
            records: None,
        }
    }

    /// An in-memory store without AI capabilities or persistence.
    pub fn new(config: CardboxConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CardboxConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> &AiCapabilities {
        self.inner.enricher.capabilities()
    }

    /// Receive every event published after this call. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    fn enrichment_enabled(&self) -> bool {
        self.inner.config.enrichment.enabled
    }

    /// Run one synchronous mutation under the lock, then persist and publish
    /// what it changed. An error leaves nothing to persist.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut State, &mut ChangeSet) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.inner.state.lock().await;
        let mut cs = ChangeSet::default();
        let out = f(&mut state, &mut cs)?;
        self.commit(&state, cs).await;
        Ok(out)
    }

    /// Persist a change set, then publish its events followed by any
    /// persistence failures. Called with the state lock held.
    pub(crate) async fn commit(&self, state: &State, cs: ChangeSet) {
        let mut failures = Vec::new();
        if let Some(records) = &self.inner.records {
            persist(records.as_ref(), state, &cs, &mut failures).await;
        }
        for event in cs.events {
            self.inner.events.emit(event);
        }
        for event in failures {
            self.inner.events.emit(event);
        }
    }

    // ── cards ────────────────────────────────────────────────────────

    /// Create a card. In inline mode the returned card already carries its
    /// enrichment; in background mode enrichment completes later and is
    /// announced by `CardProcessed`.
    pub async fn create_card(&self, input: CardInput) -> Result<Card> {
        let heuristics = self.enrichment_enabled();
        let card = self
            .mutate(|state, cs| {
                let id = state.create_card(input, heuristics, Utc::now(), cs)?;
                card_after_write(state, &id)
            })
            .await?;
        Ok(self.after_write(card, true).await)
    }

    /// Apply a partial update. `None` for an unknown card. The full
    /// enrichment pass runs again only when the card's text changed; a
    /// metadata-only update still requests a missing embedding.
    pub async fn update_card(&self, id: &str, patch: CardPatch) -> Result<Option<Card>> {
        let heuristics = self.enrichment_enabled();
        let updated = self
            .mutate(|state, cs| {
                match state.update_card(id, patch, heuristics, Utc::now(), cs)? {
                    Some(text_changed) => Ok(Some((card_after_write(state, id)?, text_changed))),
                    None => Ok(None),
                }
            })
            .await?;
        match updated {
            Some((card, text_changed)) => Ok(Some(self.after_write(card, text_changed).await)),
            None => Ok(None),
        }
    }

    pub async fn remove_card(&self, id: &str) -> bool {
        self.mutate(|state, cs| Ok(state.remove_card(id, Utc::now(), cs)))
            .await
            .unwrap_or(false)
    }

    pub async fn get_card(&self, id: &str) -> Option<Card> {
        self.inner.state.lock().await.card(id).cloned()
    }

    /// All cards in insertion order.
    pub async fn list_cards(&self) -> Vec<Card> {
        self.inner.state.lock().await.cards_in_order().cloned().collect()
    }

    /// Count one open of a card now. `false` for an unknown card.
    pub async fn record_card_usage(&self, id: &str) -> bool {
        self.record_card_usage_at(id, Utc::now()).await
    }

    pub async fn record_card_usage_at(&self, id: &str, when: DateTime<Utc>) -> bool {
        self.mutate(|state, cs| Ok(state.record_usage(id, when, Utc::now(), cs)))
            .await
            .unwrap_or(false)
    }

    pub async fn usage(&self, id: &str) -> Option<UsageStats> {
        self.inner.state.lock().await.usage(id)
    }

    /// Recompute smart decks against the current clock, e.g. after cards aged
    /// out of `recent` without any mutation.
    pub async fn refresh_smart_decks(&self) {
        let _ = self
            .mutate(|state, cs| {
                state.refresh_smart_decks(Utc::now(), cs);
                Ok(())
            })
            .await;
    }

    // ── enrichment ───────────────────────────────────────────────────

    async fn after_write(&self, card: Card, text_changed: bool) -> Card {
        if !self.enrichment_enabled() {
            return card;
        }
        let pass = if text_changed {
            Pass::Full
        } else if self.inner.enricher.can_embed(&card) {
            Pass::EmbeddingOnly
        } else {
            return card;
        };
        match self.inner.config.enrichment.mode {
            EnrichMode::Inline => {
                let id = card.id.clone();
                self.run_enrichment(card.clone(), pass).await;
                self.get_card(&id).await.unwrap_or(card)
            }
            EnrichMode::Background => {
                let store = self.clone();
                let dispatched = card.clone();
                tokio::spawn(async move { store.run_enrichment(dispatched, pass).await });
                card
            }
        }
    }

    async fn run_enrichment(&self, card: Card, pass: Pass) {
        tracing::debug!(card_id = %card.id, ?pass, "enrichment dispatched");
        let outcome = match pass {
            Pass::Full => self.inner.enricher.enrich(&card).await,
            Pass::EmbeddingOnly => self.inner.enricher.embed_missing(&card).await,
        };
        self.apply_enrichment(&card, outcome).await;
    }

    /// Apply settled results unless the card was removed or its text changed
    /// since dispatch.
    async fn apply_enrichment(&self, dispatched: &Card, outcome: EnrichmentOutcome) {
        let mut state = self.inner.state.lock().await;
        let id = dispatched.id.as_str();
        match state.card(id) {
            None => {
                tracing::debug!(card_id = %id, "card removed before enrichment settled, discarding");
                return;
            }
            Some(current)
                if current.search_text != dispatched.search_text
                    || current.source != dispatched.source =>
            {
                tracing::debug!(card_id = %id, "card changed since dispatch, discarding stale enrichment");
                return;
            }
            Some(_) => {}
        }
        let mut cs = ChangeSet::default();
        if state.apply_enrichment(id, outcome, &mut cs) {
            tracing::info!(card_id = %id, "card enriched");
        }
        self.commit(&state, cs).await;
    }

    // ── decks ────────────────────────────────────────────────────────

    /// `false` when the deck already existed.
    pub async fn create_deck(&self, name: &str) -> Result<bool> {
        self.mutate(|state, cs| state.create_deck(name, cs)).await
    }

    /// `false` for an unknown card. Creates the deck on first use.
    pub async fn add_card_to_deck(&self, name: &str, card_id: &str) -> Result<bool> {
        self.mutate(|state, cs| state.add_card_to_deck(name, card_id, cs))
            .await
    }

    pub async fn remove_card_from_deck(&self, name: &str, card_id: &str) -> Result<bool> {
        self.mutate(|state, cs| state.remove_card_from_deck(name, card_id, cs))
            .await
    }

    pub async fn remove_deck(&self, name: &str) -> Result<bool> {
        self.mutate(|state, cs| state.remove_deck(name, cs)).await
    }

    pub async fn get_deck(&self, name: &str) -> Option<Deck> {
        self.inner.state.lock().await.deck(name).cloned()
    }

    /// User and smart decks, by name.
    pub async fn list_decks(&self) -> Vec<Deck> {
        self.inner.state.lock().await.decks().cloned().collect()
    }

    pub async fn deck_cards(&self, name: &str) -> Vec<Card> {
        self.inner.state.lock().await.deck_cards(name)
    }

    // ── links ────────────────────────────────────────────────────────

    pub async fn create_link(
        &self,
        from: &str,
        to: &str,
        link_type: Option<&str>,
        annotation: Option<&str>,
    ) -> Result<Link> {
        self.mutate(|state, cs| state.create_link(from, to, link_type, annotation, cs))
            .await
    }

    /// `None` for an unknown link.
    pub async fn update_link(
        &self,
        id: &str,
        link_type: Option<&str>,
        annotation: Option<&str>,
    ) -> Result<Option<Link>> {
        self.mutate(|state, cs| state.update_link(id, link_type, annotation, cs))
            .await
    }

    pub async fn remove_link(&self, id: &str) -> bool {
        self.mutate(|state, cs| Ok(state.remove_link(id, cs)))
            .await
            .unwrap_or(false)
    }

    pub async fn get_link(&self, id: &str) -> Option<Link> {
        self.inner.state.lock().await.link(id).cloned()
    }

    pub async fn links_of(&self, card_id: &str) -> Vec<Link> {
        self.inner.state.lock().await.links_of(card_id)
    }

    pub async fn neighbors(&self, card_id: &str) -> Vec<Card> {
        self.inner.state.lock().await.neighbors(card_id)
    }

    pub async fn list_links(&self) -> Vec<Link> {
        self.inner.state.lock().await.list_links()
    }

    // ── search ───────────────────────────────────────────────────────

    pub async fn search_by_tag(&self, tag: &str) -> Vec<Card> {
        self.inner.state.lock().await.search_by_tag(tag)
    }

    pub async fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.inner.state.lock().await.search_by_text(query, limit)
    }

    /// Cosine-ranked hits from the query's LSH bucket. Falls back to text
    /// search when there is no embedder, no embedded card, the query cannot
    /// be embedded, or its bucket yields nothing.
    pub async fn search_by_semantic(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let initialized = self
            .inner
            .state
            .lock()
            .await
            .indexes
            .semantic
            .is_initialized();
        if initialized && self.capabilities().embedder.is_some() {
            match self.inner.enricher.embed(query).await {
                Ok(vector) => {
                    let hits = self.inner.state.lock().await.semantic_hits(&vector, limit);
                    if !hits.is_empty() {
                        return Ok(hits);
                    }
                    tracing::debug!("semantic bucket empty, falling back to text search");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, falling back to text search");
                }
            }
        }
        self.search_by_text(query, limit).await
    }

    // ── AI-backed operations ────────────────────────────────────────

    /// Answer a question with the chat capability, using the closest cards as
    /// context. `None` when no chat capability is configured.
    pub async fn chat(&self, query: &str) -> Result<Option<String>> {
        let Some(chat) = self.capabilities().chat.clone() else {
            return Ok(None);
        };
        let context: Vec<Card> = self
            .search_by_semantic(query, CHAT_CONTEXT_CARDS)
            .await?
            .into_iter()
            .map(|hit| hit.card)
            .collect();
        let timeout = self.inner.enricher.timeout();
        let answer = tokio::time::timeout(timeout, chat.chat(query, &context))
            .await
            .map_err(|_| StoreError::Ai(format!("chat timed out after {timeout:?}")))?
            .map_err(|e| StoreError::Ai(format!("{e:#}")))?;
        tracing::info!(context_cards = context.len(), "chat answered");
        Ok(Some(answer))
    }

    /// Transcribe an audio or video card's source and store the transcript as
    /// its content. `None` for an unknown card.
    pub async fn transcribe_card(&self, id: &str) -> Result<Option<Card>> {
        let Some(transcriber) = self.capabilities().transcriber.clone() else {
            return Err(StoreError::Ai("no transcribe capability configured".into()));
        };
        let Some(card) = self.get_card(id).await else {
            return Ok(None);
        };
        if !card.card_type.is_transcribable() {
            return Err(StoreError::Invalid(format!(
                "card {id} is {}, only audio and video can be transcribed",
                card.card_type
            )));
        }
        let source = card
            .source
            .ok_or_else(|| StoreError::Invalid(format!("card {id} has no source to transcribe")))?;
        let timeout = self.inner.enricher.timeout();
        let transcript = tokio::time::timeout(timeout, transcriber.transcribe(&source))
            .await
            .map_err(|_| StoreError::Ai(format!("transcription timed out after {timeout:?}")))?
            .map_err(|e| StoreError::Ai(format!("{e:#}")))?;
        tracing::info!(card_id = %id, chars = transcript.len(), "card transcribed");
        let patch = CardPatch {
            content: Some(transcript),
            ..Default::default()
        };
        self.update_card(id, patch).await
    }

    /// One suggestion per tag, fetched concurrently. Tags without a
    /// suggestion and failed fetches are dropped.
    pub async fn suggest_for_tags(
        &self,
        tags: &[String],
        card_type: Option<CardType>,
    ) -> Vec<Suggestion> {
        let Some(provider) = self.inner.suggestions.clone() else {
            return Vec::new();
        };
        let timeout = self.inner.enricher.timeout();
        let tags = normalize_labels(tags);
        let fetches = tags.iter().map(|tag| {
            let provider = Arc::clone(&provider);
            async move {
                match tokio::time::timeout(timeout, provider.fetch_suggestion(tag, card_type)).await
                {
                    Ok(Ok(found)) => found,
                    Ok(Err(e)) => {
                        tracing::warn!(tag = %tag, error = %e, "suggestion fetch failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(tag = %tag, "suggestion fetch timed out");
                        None
                    }
                }
            }
        });
        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Suggestions for the most common tags among a deck's cards.
    pub async fn suggest_for_deck(&self, name: &str) -> Vec<Suggestion> {
        let cards = self.deck_cards(name).await;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for card in &cards {
            for tag in &card.tags {
                *counts.entry(tag.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        let tags: Vec<String> = ranked
            .into_iter()
            .take(DECK_SUGGESTION_TAGS)
            .map(|(tag, _)| tag.to_string())
            .collect();
        self.suggest_for_tags(&tags, None).await
    }

    pub async fn stats(&self) -> StoreStats {
        self.inner.state.lock().await.stats()
    }
}

#[derive(Debug, Clone, Copy)]
enum Pass {
    Full,
    EmbeddingOnly,
}

fn card_after_write(state: &State, id: &str) -> Result<Card> {
    state
        .card(id)
        .cloned()
        .ok_or_else(|| StoreError::Invalid(format!("card {id} missing after write")))
}

/// Write a change set to the record store. Deletions go first so a replaced
/// id never collides; cards are saved before the links that reference them.
async fn persist(
    records: &dyn RecordStore,
    state: &State,
    cs: &ChangeSet,
    failures: &mut Vec<StoreEvent>,
) {
    let mut report = |card_id: Option<&str>, what: String, e: anyhow::Error| {
        tracing::warn!(error = %format!("{e:#}"), "{what}");
        failures.push(StoreEvent::persistence_error(card_id, format!("{what}: {e:#}")));
    };

    for id in unique(&cs.deleted_links) {
        if let Err(e) = records.delete_link(id).await {
            report(None, format!("failed to delete link {id}"), e);
        }
    }
    for id in unique(&cs.deleted_cards) {
        if let Err(e) = records.delete_card(id).await {
            report(Some(id), format!("failed to delete card {id}"), e);
        }
    }
    for id in unique(&cs.saved_cards) {
        let Some(card) = state.card(id) else {
            continue;
        };
        if let Err(e) = records.save_card(card).await {
            report(Some(id), format!("failed to save card {id}"), e);
        }
    }
    for id in unique(&cs.saved_links) {
        let Some(link) = state.links.get(id) else {
            continue;
        };
        if let Err(e) = records.save_link(link).await {
            report(None, format!("failed to save link {id}"), e);
        }
    }
    for id in unique(&cs.touched_usage) {
        let Some(usage) = state.usage.get(id) else {
            continue;
        };
        if let Err(e) = records.save_usage(id, usage).await {
            report(Some(id), format!("failed to save usage for card {id}"), e);
        }
    }
}

/// Ids in first-seen order without repeats.
fn unique(ids: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(move |id| seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_keeps_first_occurrence_order() {
        let ids = vec!["2".to_string(), "1".into(), "2".into(), "3".into(), "1".into()];
        let got: Vec<&str> = unique(&ids).collect();
        assert_eq!(got, ["2", "1", "3"]);
    }

    #[tokio::test]
    async fn events_follow_mutation_order() {
        let store = CardStore::new(CardboxConfig::default());
        let mut rx = store.subscribe();
        let card = store.create_card(CardInput::new("first")).await.unwrap();
        assert!(store.remove_card(&card.id).await);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        let created = kinds.iter().position(|k| *k == "card.created").unwrap();
        let removed = kinds.iter().position(|k| *k == "card.removed").unwrap();
        assert!(created < removed);
    }
}
