//! Core entity definitions.
//!
//! Defines [`Card`] (a knowledge unit), [`CardType`], [`Deck`] (a named set of
//! card ids), [`Link`] (a typed directed edge between cards), [`UsageStats`], and
//! the [`CardInput`] / [`CardPatch`] shapes accepted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relation type given to links created without one.
pub const DEFAULT_LINK_TYPE: &str = "related";

/// What kind of material a card holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardType {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Link,
}

impl CardType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Link => "link",
        }
    }

    pub fn all() -> [CardType; 5] {
        [
            Self::Text,
            Self::Image,
            Self::Audio,
            Self::Video,
            Self::Link,
        ]
    }

    /// Whether the card's source can be transcribed into text.
    pub fn is_transcribable(&self) -> bool {
        matches!(self, Self::Audio | Self::Video)
    }
}

impl std::fmt::Display for CardType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "link" => Ok(Self::Link),
            _ => Err(format!("unknown card type: {s}")),
        }
    }
}

/// A card record. Also the persisted snapshot shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Monotonically assigned id, never reused while the store lives.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Media file path or URL the card was clipped from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(rename = "type", default)]
    pub card_type: CardType,
    /// Lowercase, trimmed, deduplicated.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Names of every deck holding this card, normalized like tags.
    #[serde(default)]
    pub decks: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Reference to a generated illustration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illustration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Lowercase join of title, content and description.
    #[serde(default)]
    pub search_text: String,
}

impl Card {
    /// Recompute `search_text` from title, content and description.
    pub fn refresh_search_text(&mut self) {
        self.search_text =
            build_search_text(&self.title, self.content.as_deref(), &self.description);
    }

    /// Text used by the local heuristics: content, falling back to the title.
    pub fn text_basis(&self) -> &str {
        match self.content.as_deref() {
            Some(c) if !c.trim().is_empty() => c,
            _ => &self.title,
        }
    }

    /// Text embedded for semantic search: content, then source, then title.
    pub fn embedding_key(&self) -> &str {
        [self.content.as_deref(), self.source.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or(&self.title)
    }
}

/// A named collection of card ids. The name is the normalized identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub name: String,
    #[serde(default)]
    pub cards: BTreeSet<String>,
}

impl Deck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cards: BTreeSet::new(),
        }
    }
}

/// A directed, typed, annotated edge between two cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default = "default_link_type")]
    pub link_type: String,
    #[serde(default)]
    pub annotation: String,
}

impl Link {
    /// The endpoint opposite `card_id`, if the link touches it.
    pub fn other_end(&self, card_id: &str) -> Option<&str> {
        if self.from == card_id {
            Some(&self.to)
        } else if self.to == card_id {
            Some(&self.from)
        } else {
            None
        }
    }
}

fn default_link_type() -> String {
    DEFAULT_LINK_TYPE.to_string()
}

/// Per-card open statistics that drive the smart decks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub count: u32,
    pub last_opened: Option<DateTime<Utc>>,
}

/// Fields accepted by `create_card`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardInput {
    /// Explicit id. Numeric ids advance the auto-assignment counter.
    pub id: Option<String>,
    pub title: String,
    pub content: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub card_type: CardType,
    pub tags: Vec<String>,
    pub decks: Vec<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
}

impl CardInput {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn card_type(mut self, card_type: CardType) -> Self {
        self.card_type = card_type;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn decks<I, S>(mut self, decks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.decks = decks.into_iter().map(Into::into).collect();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Partial update for `update_card`. `None` leaves a field untouched; an empty
/// content string clears the content.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CardPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub source: Option<String>,
    #[serde(rename = "type")]
    pub card_type: Option<CardType>,
    /// Replaces the whole tag set.
    pub tags: Option<Vec<String>>,
    /// Replaces the whole deck membership.
    pub decks: Option<Vec<String>>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub illustration: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

impl CardPatch {
    /// Whether the patch touches a field that feeds search text or embeddings.
    pub fn touches_text(&self) -> bool {
        self.title.is_some()
            || self.content.is_some()
            || self.description.is_some()
            || self.source.is_some()
    }
}

/// Trim and lowercase a tag or deck name. Empty results are rejected.
pub fn normalize_label(raw: &str) -> Option<String> {
    let label = raw.trim().to_lowercase();
    (!label.is_empty()).then_some(label)
}

/// Normalize and deduplicate a collection of tags or deck names.
pub fn normalize_labels<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|s| normalize_label(s.as_ref()))
        .collect()
}

/// Normalize a link relation type, defaulting to [`DEFAULT_LINK_TYPE`].
pub fn normalize_link_type(raw: Option<&str>) -> String {
    raw.and_then(normalize_label)
        .unwrap_or_else(default_link_type)
}

/// Lowercase join of the non-empty text fields.
pub fn build_search_text(title: &str, content: Option<&str>, description: &str) -> String {
    [Some(title), content, Some(description)]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Ordering key placing numeric ids in numeric order ahead of other ids.
pub(crate) fn id_order_key(id: &str) -> (u8, u64, &str) {
    match id.parse::<u64>() {
        Ok(n) => (0, n, ""),
        Err(_) => (1, 0, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_trimmed_lowercased_and_deduplicated() {
        let labels = normalize_labels(["  Rust ", "rust", "GRAPHS", "", "   "]);
        assert_eq!(
            labels.into_iter().collect::<Vec<_>>(),
            vec!["graphs".to_string(), "rust".to_string()]
        );
    }

    #[test]
    fn link_type_defaults_to_related() {
        assert_eq!(normalize_link_type(None), "related");
        assert_eq!(normalize_link_type(Some("  ")), "related");
        assert_eq!(normalize_link_type(Some(" Cites ")), "cites");
    }

    #[test]
    fn search_text_skips_empty_fields() {
        assert_eq!(
            build_search_text("Graph Theory", None, "Notes ON Graphs"),
            "graph theory notes on graphs"
        );
        assert_eq!(build_search_text("Only", Some("  "), ""), "only");
    }

    #[test]
    fn card_type_round_trips_through_str() {
        for t in CardType::all() {
            assert_eq!(t.as_str().parse::<CardType>().unwrap(), t);
        }
        assert!("podcast".parse::<CardType>().is_err());
    }

    #[test]
    fn numeric_ids_sort_numerically() {
        let mut ids = vec!["10", "abc", "2", "1"];
        ids.sort_by_key(|id| id_order_key(id));
        assert_eq!(ids, vec!["1", "2", "10", "abc"]);
    }

    #[test]
    fn embedding_key_prefers_content_then_source() {
        let mut card = Card {
            id: "1".into(),
            title: "Title".into(),
            content: None,
            source: Some("https://example.com".into()),
            card_type: CardType::Link,
            tags: BTreeSet::new(),
            decks: BTreeSet::new(),
            description: String::new(),
            created_at: Utc::now(),
            summary: None,
            illustration: None,
            embedding: None,
            search_text: String::new(),
        };
        assert_eq!(card.embedding_key(), "https://example.com");
        assert_eq!(card.text_basis(), "Title");
        card.content = Some("Body".into());
        assert_eq!(card.embedding_key(), "Body");
        assert_eq!(card.text_basis(), "Body");
    }
}
