//! Secondary indexes kept in lockstep with the card graph.
//!
//! All four structures are owned by the store state and only mutated from
//! inside its single mutation boundary.

pub mod adjacency;
pub mod lsh;
pub mod tags;
pub mod text;

pub use adjacency::LinkAdjacency;
pub use lsh::{cosine_similarity, LshIndex};
pub use tags::TagIndex;
pub use text::TextIndex;

use crate::cards::types::{Card, Link};

#[derive(Debug)]
pub struct Indexes {
    pub tags: TagIndex,
    pub adjacency: LinkAdjacency,
    pub text: TextIndex,
    pub semantic: LshIndex,
}

impl Indexes {
    pub fn new(lsh_planes: usize, lsh_seed: Option<u64>) -> Self {
        Self {
            tags: TagIndex::default(),
            adjacency: LinkAdjacency::default(),
            text: TextIndex::new(),
            semantic: LshIndex::new(lsh_planes, lsh_seed),
        }
    }

    /// Register a freshly inserted card with every index.
    pub fn insert_card(&mut self, card: &Card) {
        self.tags.add_card(&card.id, &card.tags);
        if let Some(embedding) = &card.embedding {
            self.semantic.insert(&card.id, embedding);
        }
        self.text.mark_dirty();
    }

    /// Drop a card from every card-keyed index. Link entries are removed
    /// separately when the touching links are deleted.
    pub fn remove_card(&mut self, card: &Card) {
        self.tags.remove_card(&card.id, &card.tags);
        self.semantic.remove(&card.id);
        self.text.mark_dirty();
    }

    pub fn insert_link(&mut self, link: &Link) {
        self.adjacency.add(link);
    }

    pub fn remove_link(&mut self, link: &Link) {
        self.adjacency.remove(link);
    }

    /// Rebuild everything from scratch, as after a snapshot load.
    pub fn rebuild<'a>(
        lsh_planes: usize,
        lsh_seed: Option<u64>,
        cards: impl IntoIterator<Item = &'a Card>,
        links: impl IntoIterator<Item = &'a Link>,
    ) -> Self {
        let mut indexes = Self::new(lsh_planes, lsh_seed);
        for card in cards {
            indexes.insert_card(card);
        }
        for link in links {
            indexes.insert_link(link);
        }
        indexes
    }
}
