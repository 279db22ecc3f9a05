//! AI capability interfaces consumed by the store.
//!
//! Each capability is an independent async trait. A store is constructed with
//! an [`AiCapabilities`] set in which any capability may be absent; callers
//! check for presence instead of assuming availability. Every call may fail,
//! and failures never crash the caller.

pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cards::types::{Card, CardType};

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str) -> Result<String>;

    /// Summarize a whole card. Defaults to summarizing its title and text.
    async fn summarize_card(&self, card: &Card) -> Result<String> {
        let text = match card.content.as_deref() {
            Some(content) if !content.trim().is_empty() => format!("{}\n\n{}", card.title, content),
            _ => card.title.clone(),
        };
        self.summarize(&text).await
    }
}

#[async_trait]
pub trait Illustrator: Send + Sync {
    /// Produce a reference (path or URL) to an illustration for `prompt`.
    async fn generate_illustration(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the media behind a source reference into text.
    async fn transcribe(&self, source: &str) -> Result<String>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Answer `query` using `context` cards drawn from the store.
    async fn chat(&self, query: &str, context: &[Card]) -> Result<String>;
}

/// The set of AI capabilities available to a store, fixed at construction.
#[derive(Clone, Default)]
pub struct AiCapabilities {
    pub summarizer: Option<Arc<dyn Summarizer>>,
    pub illustrator: Option<Arc<dyn Illustrator>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub chat: Option<Arc<dyn ChatModel>>,
}

impl AiCapabilities {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_illustrator(mut self, illustrator: Arc<dyn Illustrator>) -> Self {
        self.illustrator = Some(illustrator);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Names of the capabilities present, for logging.
    pub fn present(&self) -> Vec<&'static str> {
        [
            ("summarize", self.summarizer.is_some()),
            ("illustrate", self.illustrator.is_some()),
            ("embed", self.embedder.is_some()),
            ("transcribe", self.transcriber.is_some()),
            ("chat", self.chat.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

impl std::fmt::Debug for AiCapabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiCapabilities")
            .field("present", &self.present())
            .finish()
    }
}

/// External content suggested for a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub tag: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    /// Where the suggestion came from (e.g. a site or feed name).
    #[serde(default)]
    pub source: String,
}

#[async_trait]
pub trait SuggestionProvider: Send + Sync {
    /// A suggestion for `tag`, optionally narrowed to a card type. `None` when
    /// the provider has nothing to offer.
    async fn fetch_suggestion(&self, tag: &str, card_type: Option<CardType>)
        -> Result<Option<Suggestion>>;
}
