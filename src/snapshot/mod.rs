//! Whole-graph snapshots: JSON, password-sealed files and media archives.
//!
//! Every load builds a complete new [`State`] first and swaps it in only once
//! it is fully valid, so a corrupt snapshot never leaves a half-applied graph.

pub mod archive;
pub mod crypto;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::cards::smart::is_smart_deck;
use crate::cards::state::{non_blank, ChangeSet, State};
use crate::cards::store::CardStore;
use crate::cards::types::{
    normalize_label, normalize_labels, normalize_link_type, Card, Deck, Link, UsageStats,
};
use crate::cards::StoreEvent;
use crate::db::RecordStore;
use crate::error::{Result, StoreError};
use crypto::{CryptoError, KdfParams};

/// The portable shape of the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub cards: Vec<Card>,
    #[serde(default)]
    pub decks: Vec<DeckRecord>,
    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub usage: BTreeMap<String, UsageStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckRecord {
    pub name: String,
    #[serde(default)]
    pub cards: Vec<String>,
}

/// Read the whole graph back from a record store.
pub async fn load_records(records: &dyn RecordStore) -> anyhow::Result<Snapshot> {
    let cards = records.load_cards().await?;
    let links = records.load_links().await?;
    let usage = records.load_usage().await?.into_iter().collect();
    Ok(Snapshot {
        cards,
        decks: Vec::new(),
        links,
        usage,
    })
}

impl State {
    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            cards: self.cards_in_order().cloned().collect(),
            decks: self
                .decks()
                .map(|deck| DeckRecord {
                    name: deck.name.clone(),
                    cards: deck.cards.iter().cloned().collect(),
                })
                .collect(),
            links: self.list_links(),
            usage: self
                .usage
                .iter()
                .map(|(id, stats)| (id.clone(), *stats))
                .collect(),
        }
    }

    /// Build a fresh graph with `template`'s settings from a snapshot.
    ///
    /// Cards come first (a repeated id rejects the snapshot), then deck
    /// membership as the union of deck records and each card's own deck set,
    /// then links, dropping those with a missing endpoint, self-loops and
    /// repeated triples. Smart decks are recomputed rather than trusted.
    /// Returns the state and the number of dropped links.
    pub fn from_snapshot(
        template: &State,
        snapshot: Snapshot,
        now: DateTime<Utc>,
    ) -> Result<(State, usize)> {
        let mut state = template.empty_like();

        for mut card in snapshot.cards {
            card.id = card.id.trim().to_string();
            if card.id.is_empty() {
                return Err(StoreError::CorruptSnapshot("card with an empty id".into()));
            }
            if state.cards.contains_key(&card.id) {
                return Err(StoreError::CorruptSnapshot(format!(
                    "duplicate card id {}",
                    card.id
                )));
            }
            card.tags = normalize_labels(&card.tags);
            card.decks = normalize_labels(&card.decks)
                .into_iter()
                .filter(|d| !is_smart_deck(d))
                .collect();
            card.content = non_blank(card.content);
            card.source = non_blank(card.source);
            card.embedding = card.embedding.filter(|v| !v.is_empty());
            card.refresh_search_text();

            state.observe_card_id(&card.id);
            state.order.push(card.id.clone());
            state.cards.insert(card.id.clone(), card);
        }

        for card in state.cards.values() {
            for name in &card.decks {
                state
                    .decks
                    .entry(name.clone())
                    .or_insert_with(|| Deck::new(name.as_str()))
                    .cards
                    .insert(card.id.clone());
            }
        }
        for record in snapshot.decks {
            let Some(name) = normalize_label(&record.name) else {
                continue;
            };
            if is_smart_deck(&name) {
                continue;
            }
            let deck = state
                .decks
                .entry(name.clone())
                .or_insert_with(|| Deck::new(name.as_str()));
            for id in record.cards {
                if let Some(card) = state.cards.get_mut(id.trim()) {
                    card.decks.insert(name.clone());
                    deck.cards.insert(card.id.clone());
                }
            }
        }

        let mut dropped = 0;
        let mut triples = HashSet::new();
        for mut link in snapshot.links {
            link.link_type = normalize_link_type(Some(&link.link_type));
            let valid = link.from != link.to
                && state.cards.contains_key(&link.from)
                && state.cards.contains_key(&link.to)
                && triples.insert((link.from.clone(), link.to.clone(), link.link_type.clone()));
            if !valid {
                tracing::debug!(link_id = %link.id, from = %link.from, to = %link.to, "dropping invalid link");
                dropped += 1;
                continue;
            }
            link.id = link.id.trim().to_string();
            if link.id.is_empty() || state.links.contains_key(&link.id) {
                link.id = state.allocate_link_id();
            } else {
                state.observe_link_id(&link.id);
            }
            state.links.insert(link.id.clone(), link);
        }

        for (id, stats) in snapshot.usage {
            if state.cards.contains_key(&id) {
                state.usage.insert(id, stats);
            }
        }

        state.rebuild_indexes();
        state.refresh_smart_decks(now, &mut ChangeSet::default());
        Ok((state, dropped))
    }
}

/// Records to rewrite when `fresh` replaces `old`, announced by a single
/// `SnapshotLoaded` event.
fn replacement_changes(old: &State, fresh: &State) -> ChangeSet {
    let mut cs = ChangeSet::default();
    cs.deleted_links = old
        .links
        .keys()
        .filter(|id| !fresh.links.contains_key(*id))
        .cloned()
        .collect();
    cs.deleted_cards = old
        .order
        .iter()
        .filter(|id| !fresh.cards.contains_key(*id))
        .cloned()
        .collect();
    cs.saved_cards = fresh.order.clone();
    cs.saved_links = fresh.list_links().into_iter().map(|l| l.id).collect();
    cs.touched_usage = fresh.usage.keys().cloned().collect();
    cs.push_event(StoreEvent::SnapshotLoaded {
        cards: fresh.card_count(),
        links: fresh.links.len(),
    });
    cs
}

fn corrupt(e: serde_json::Error) -> StoreError {
    StoreError::CorruptSnapshot(format!("malformed snapshot JSON: {e}"))
}

/// Header and authentication failures mean the file cannot be trusted;
/// anything else is an operational crypto error.
fn sealed_error(e: CryptoError) -> StoreError {
    match e {
        CryptoError::InvalidMagic
        | CryptoError::Truncated
        | CryptoError::UnsupportedParams(_)
        | CryptoError::Decryption => StoreError::CorruptSnapshot(e.to_string()),
        other => StoreError::Crypto(other),
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(format!("blocking task failed: {e}"))))?
}

impl CardStore {
    pub async fn to_snapshot(&self) -> Snapshot {
        self.inner.state.lock().await.to_snapshot()
    }

    pub async fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot().await)?)
    }

    /// Replace the whole graph. On error the current graph is untouched.
    pub async fn load_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let (fresh, dropped_links) = State::from_snapshot(&state, snapshot, Utc::now())?;
        self.swap_in(&mut state, fresh, dropped_links).await;
        Ok(())
    }

    pub async fn load_json(&self, json: &str) -> Result<()> {
        let snapshot: Snapshot = serde_json::from_str(json).map_err(corrupt)?;
        self.load_snapshot(snapshot).await
    }

    async fn swap_in(&self, state: &mut State, fresh: State, dropped_links: usize) {
        let cs = replacement_changes(state, &fresh);
        *state = fresh;
        tracing::info!(
            cards = state.card_count(),
            links = state.links.len(),
            dropped_links,
            "snapshot loaded"
        );
        self.commit(state, cs).await;
    }

    /// Write the graph as a password-sealed file.
    pub async fn export_encrypted(&self, path: impl AsRef<Path>, password: &str) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let json = self.to_json().await?;
        let password = zeroize::Zeroizing::new(password.to_string());
        let params = KdfParams::from(&self.config().crypto);
        let sealed = blocking(move || {
            crypto::seal(&password, json.as_bytes(), &params).map_err(StoreError::from)
        })
        .await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, sealed).await?;
        tracing::info!(path = %path.display(), "encrypted snapshot exported");
        Ok(())
    }

    /// Load a password-sealed file. A wrong password or a damaged file fails
    /// before the current graph is touched.
    pub async fn import_encrypted(&self, path: impl AsRef<Path>, password: &str) -> Result<()> {
        let data = tokio::fs::read(path.as_ref()).await?;
        let password = zeroize::Zeroizing::new(password.to_string());
        let plaintext = blocking(move || crypto::open(&password, &data).map_err(sealed_error)).await?;
        let snapshot: Snapshot = serde_json::from_slice(&plaintext).map_err(corrupt)?;
        self.load_snapshot(snapshot).await
    }

    /// Write the graph and the media directory into a zip archive. Returns
    /// the number of media files included.
    pub async fn export_archive(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref().to_path_buf();
        let json = self.to_json().await?;
        let media_dir = self.config().resolved_media_dir();
        blocking(move || archive::write_archive(&path, json.as_bytes(), &media_dir)).await
    }

    /// Load an archive: the graph replaces the current one and media files
    /// are extracted into the media directory before the swap. Returns the
    /// number of media files extracted.
    pub async fn import_archive(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref().to_path_buf();
        let contents = blocking(move || archive::read_archive(&path)).await?;
        let snapshot: Snapshot =
            serde_json::from_slice(&contents.snapshot_json).map_err(corrupt)?;

        let mut state = self.inner.state.lock().await;
        let (fresh, dropped_links) = State::from_snapshot(&state, snapshot, Utc::now())?;
        let media_dir = self.config().resolved_media_dir();
        let media = contents.media;
        let extracted = blocking(move || archive::write_media(&media_dir, &media)).await?;
        self.swap_in(&mut state, fresh, dropped_links).await;
        tracing::info!(media_files = extracted, "archive imported");
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::types::CardInput;
    use crate::config::CardboxConfig;

    fn card_json(id: &str, decks: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "title": format!("card {id}"),
            "decks": decks,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    fn state() -> State {
        State::new(&CardboxConfig::default())
    }

    #[test]
    fn deck_membership_is_the_union_of_both_sides() {
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "cards": [card_json("1", &["Reading"]), card_json("2", &[])],
            "decks": [{"name": "reading", "cards": ["2", "404"]}, {"name": "recent", "cards": ["1"]}],
            "links": []
        }))
        .unwrap();
        let (s, _) = State::from_snapshot(&state(), snapshot, Utc::now()).unwrap();
        let reading = s.deck("reading").unwrap();
        assert_eq!(reading.cards.len(), 2);
        assert!(s.card("2").unwrap().decks.contains("reading"));
        // smart decks are recomputed; 2024 cards are not recent
        assert!(s.deck("recent").map_or(true, |d| d.cards.is_empty()));
    }

    #[test]
    fn bad_links_are_dropped_silently() {
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "cards": [card_json("1", &[]), card_json("2", &[])],
            "links": [
                {"id": "1", "from": "1", "to": "2"},
                {"id": "2", "from": "1", "to": "2", "type": "RELATED"},
                {"id": "3", "from": "1", "to": "1"},
                {"id": "4", "from": "1", "to": "9"},
                {"id": "1", "from": "2", "to": "1", "type": "cites"}
            ]
        }))
        .unwrap();
        let (mut s, dropped) = State::from_snapshot(&state(), snapshot, Utc::now()).unwrap();
        assert_eq!(dropped, 3);
        assert_eq!(s.list_links().len(), 2);
        assert_eq!(s.links_of("1").len(), 2);

        let mut cs = ChangeSet::default();
        let fresh = s.create_link("2", "1", Some("extends"), None, &mut cs).unwrap();
        assert!(s.link(&fresh.id).is_some());
        assert_eq!(s.list_links().len(), 3);
    }

    #[test]
    fn duplicate_card_ids_reject_the_snapshot() {
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "cards": [card_json("1", &[]), card_json("1", &[])]
        }))
        .unwrap();
        assert!(matches!(
            State::from_snapshot(&state(), snapshot, Utc::now()),
            Err(StoreError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn auto_ids_continue_after_loaded_ids() {
        let snapshot: Snapshot = serde_json::from_value(serde_json::json!({
            "cards": [card_json("41", &[])]
        }))
        .unwrap();
        let (mut s, _) = State::from_snapshot(&state(), snapshot, Utc::now()).unwrap();
        let mut cs = ChangeSet::default();
        let id = s
            .create_card(CardInput::new("next"), false, Utc::now(), &mut cs)
            .unwrap();
        assert_eq!(id, "42");
    }

    #[test]
    fn snapshot_round_trips_through_state() {
        let mut s = state();
        let mut cs = ChangeSet::default();
        let now = Utc::now();
        let a = s
            .create_card(
                CardInput::new("a").tags(["x"]).decks(["inbox"]).embedding(vec![0.5, 0.5]),
                false,
                now,
                &mut cs,
            )
            .unwrap();
        let b = s.create_card(CardInput::new("b"), false, now, &mut cs).unwrap();
        s.create_link(&a, &b, None, Some("see also"), &mut cs).unwrap();
        s.record_usage(&a, now, now, &mut cs);

        let (restored, dropped) = State::from_snapshot(&s, s.to_snapshot(), now).unwrap();
        assert_eq!(dropped, 0);
        assert_eq!(restored.to_snapshot(), s.to_snapshot());
        assert_eq!(restored.indexes.semantic.indexed_cards(), 1);
    }
}
