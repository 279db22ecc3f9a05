#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use cardbox::ai::{
    AiCapabilities, ChatModel, Embedder, Illustrator, Suggestion, SuggestionProvider, Summarizer,
    Transcriber,
};
use cardbox::cards::{Card, CardStore, CardType, StoreEvent};
use cardbox::config::{CardboxConfig, EnrichMode};

/// Config with enrichment off, a fixed LSH seed and cheap key derivation.
pub fn plain_config() -> CardboxConfig {
    let mut config = CardboxConfig::default();
    config.enrichment.enabled = false;
    config.enrichment.timeout_secs = 5;
    config.search.lsh_seed = Some(7);
    config.crypto.memory_kib = 1024;
    config.crypto.iterations = 1;
    config.crypto.parallelism = 1;
    config
}

/// Config with enrichment on in the given mode.
pub fn enriching_config(mode: EnrichMode) -> CardboxConfig {
    let mut config = plain_config();
    config.enrichment.enabled = true;
    config.enrichment.mode = mode;
    config
}

/// Point storage paths into a scratch directory.
pub fn with_storage_in(mut config: CardboxConfig, dir: &Path) -> CardboxConfig {
    config.storage.db_path = dir.join("cards.db").to_string_lossy().into_owned();
    config.storage.media_dir = dir.join("media").to_string_lossy().into_owned();
    config
}

pub fn plain_store() -> CardStore {
    CardStore::new(plain_config())
}

/// Store that embeds every card inline with [`TopicEmbedder`].
pub fn semantic_store() -> CardStore {
    CardStore::builder(enriching_config(EnrichMode::Inline))
        .ai(AiCapabilities::none().with_embedder(Arc::new(TopicEmbedder)))
        .build()
}

/// Wait for the first event matching `pred`, failing the test after 5s.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<StoreEvent>,
    pred: impl Fn(&StoreEvent) -> bool,
) -> StoreEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain every event already published.
pub fn drain(rx: &mut broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ── fake capabilities ─────────────────────────────────────────────────────────

const TOPICS: [&[&str]; 3] = [
    &["graph", "graphs", "algorithm", "algorithms", "vertex", "edge"],
    &["pasta", "recipe", "tomato", "basil", "cook"],
    &["music", "guitar", "chord", "melody"],
];

/// Embeds text as one axis per topic it mentions plus a small constant axis,
/// so texts about the same topics get identical directions.
pub struct TopicEmbedder;

impl TopicEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower.split(|c: char| !c.is_alphanumeric()).collect();
        let mut v: Vec<f32> = TOPICS
            .iter()
            .map(|topic| {
                if words.iter().any(|w| topic.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        v.push(0.1);
        v
    }
}

#[async_trait]
impl Embedder for TopicEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(Self::vector(text))
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding service unreachable")
    }
}

/// Fails its first call, then embeds like [`TopicEmbedder`]. Counts calls.
#[derive(Default)]
pub struct FlakyEmbedder {
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            bail!("embedding service warming up");
        }
        Ok(TopicEmbedder::vector(text))
    }
}

/// Returns a fixed summary after an optional delay and counts calls.
pub struct StaticSummarizer {
    pub summary: String,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl StaticSummarizer {
    pub fn new(summary: &str) -> Arc<Self> {
        Self::slow(summary, Duration::ZERO)
    }

    pub fn slow(summary: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            summary: summary.to_string(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for StaticSummarizer {
    async fn summarize(&self, _text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.summary.clone())
    }
}

pub struct StaticIllustrator;

#[async_trait]
impl Illustrator for StaticIllustrator {
    async fn generate_illustration(&self, prompt: &str) -> Result<String> {
        Ok(format!("img://{}", prompt.len()))
    }
}

pub struct FailingIllustrator;

#[async_trait]
impl Illustrator for FailingIllustrator {
    async fn generate_illustration(&self, _prompt: &str) -> Result<String> {
        bail!("image backend down")
    }
}

pub struct StaticTranscriber;

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, source: &str) -> Result<String> {
        Ok(format!("transcript of {source}"))
    }
}

/// Answers with the titles of the context cards it was given.
pub struct TitleChat;

#[async_trait]
impl ChatModel for TitleChat {
    async fn chat(&self, query: &str, context: &[Card]) -> Result<String> {
        let titles: Vec<&str> = context.iter().map(|c| c.title.as_str()).collect();
        Ok(format!("{query}: {}", titles.join(", ")))
    }
}

/// Suggests one link per tag, nothing for `empty`, and fails for `broken`.
pub struct FakeSuggestions;

#[async_trait]
impl SuggestionProvider for FakeSuggestions {
    async fn fetch_suggestion(
        &self,
        tag: &str,
        card_type: Option<CardType>,
    ) -> Result<Option<Suggestion>> {
        match tag {
            "empty" => Ok(None),
            "broken" => bail!("provider error"),
            _ => Ok(Some(Suggestion {
                tag: tag.to_string(),
                title: format!("More on {tag}"),
                description: card_type.map(|t| t.to_string()).unwrap_or_default(),
                url: format!("https://example.org/{tag}"),
                source: "fake".into(),
            })),
        }
    }
}
