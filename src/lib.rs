//! Personal knowledge card store.
//!
//! Cards (text, image, audio, video and link clippings) are organized into
//! decks, linked to each other with typed edges, and found by tag, fuzzy full
//! text or approximate semantic similarity. An enrichment pipeline attaches
//! AI-derived summaries, illustrations and embeddings without blocking card
//! creation, and a set of smart decks (`recent`, `frequent`, `unseen`,
//! `stale`, `tag:*`) is kept current from usage statistics.
//!
//! # Architecture
//!
//! - **Graph**: cards, decks, links and usage live in memory behind one async
//!   mutex; every mutation updates all indexes before the lock is released
//! - **Indexes**: tag → cards, card → links, a [tantivy] text index and an LSH
//!   bucket index over embeddings
//! - **Enrichment**: optional AI capabilities behind traits, dispatched to an
//!   isolated worker task with a correlation table and per-call timeouts
//! - **Persistence**: incremental writes to SQLite through a narrow record
//!   store trait, plus JSON, encrypted and zip snapshots
//!
//! # Modules
//!
//! - [`cards`]: entity model, graph state, smart decks and the [`cards::CardStore`] handle
//! - [`index`]: tag, adjacency, text and LSH indexes
//! - [`enrich`]: enrichment pipeline, local heuristics and the worker context
//! - [`ai`]: capability traits and in-process implementations
//! - [`db`]: SQLite schema, migrations and the record store
//! - [`snapshot`]: whole-graph JSON, encrypted files and media archives
//! - [`config`]: TOML configuration with environment overrides
//! - [`error`]: the store's error type

pub mod ai;
pub mod cards;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod index;
pub mod snapshot;

pub use cards::{CardStore, CardStoreBuilder};
pub use error::{Result, StoreError};
