//! The card store: entity model, in-memory graph, smart decks and the async
//! [`CardStore`] facade that ties them to enrichment, events and persistence.

pub mod decks;
pub mod events;
pub mod links;
pub mod search;
pub mod smart;
pub mod state;
pub mod stats;
pub mod store;
pub mod types;

pub use events::{ErrorKind, EventBus, StoreEvent};
pub use search::SearchHit;
pub use state::{ChangeSet, State};
pub use stats::StoreStats;
pub use store::{CardStore, CardStoreBuilder};
pub use types::{Card, CardInput, CardPatch, CardType, Deck, Link, UsageStats};
