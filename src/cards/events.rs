//! Typed change notifications and the broadcast bus that carries them.
//!
//! Every store mutation publishes its events after the in-memory update has
//! completed, in the order the changes were made. Subscribers that fall behind
//! receive `RecvError::Lagged` and miss events.

use serde::Serialize;
use tokio::sync::broadcast;

/// Default buffer size for the store's event bus.
pub const EVENT_BUS_CAPACITY: usize = 1024;

/// Which subsystem a non-fatal failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Enrichment,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum StoreEvent {
    CardCreated { card_id: String },
    CardUpdated { card_id: String },
    CardRemoved { card_id: String },
    /// Enrichment finished for a card (possibly with some fields missing).
    CardProcessed { card_id: String },
    DeckUpdated { name: String },
    DeckRemoved { name: String },
    LinkCreated { link_id: String },
    LinkUpdated { link_id: String },
    LinkRemoved { link_id: String },
    SnapshotLoaded { cards: usize, links: usize },
    Error {
        kind: ErrorKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        card_id: Option<String>,
        message: String,
    },
}

impl StoreEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::CardCreated { .. } => "card.created",
            Self::CardUpdated { .. } => "card.updated",
            Self::CardRemoved { .. } => "card.removed",
            Self::CardProcessed { .. } => "card.processed",
            Self::DeckUpdated { .. } => "deck.updated",
            Self::DeckRemoved { .. } => "deck.removed",
            Self::LinkCreated { .. } => "link.created",
            Self::LinkUpdated { .. } => "link.updated",
            Self::LinkRemoved { .. } => "link.removed",
            Self::SnapshotLoaded { .. } => "snapshot.loaded",
            Self::Error { .. } => "error",
        }
    }

    /// Card the event concerns, if any.
    pub fn card_id(&self) -> Option<&str> {
        match self {
            Self::CardCreated { card_id }
            | Self::CardUpdated { card_id }
            | Self::CardRemoved { card_id }
            | Self::CardProcessed { card_id } => Some(card_id),
            Self::Error { card_id, .. } => card_id.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn enrichment_error(card_id: &str, message: impl Into<String>) -> Self {
        Self::Error {
            kind: ErrorKind::Enrichment,
            card_id: Some(card_id.to_string()),
            message: message.into(),
        }
    }

    pub(crate) fn persistence_error(card_id: Option<&str>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: ErrorKind::Persistence,
            card_id: card_id.map(str::to_string),
            message: message.into(),
        }
    }
}

pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: StoreEvent) {
        tracing::debug!(
            event_type = event.event_type(),
            subscribers = self.subscriber_count(),
            "store event"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}
