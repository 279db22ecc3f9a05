//! Enrichment pipeline: attaches embedding, summary and illustration to cards.
//!
//! The [`Enricher`] dispatches work to the isolated [`worker`] context when one
//! is running and falls back to calling the capability directly when it is
//! not. Every external call is time-bounded. Summary and illustration (plus
//! the embedding, when needed) run concurrently and settle independently: one
//! failing never prevents the others from completing.

pub mod heuristic;
pub mod worker;

use std::time::Duration;

use crate::ai::AiCapabilities;
use crate::cards::types::Card;
use crate::config::EnrichmentConfig;
use worker::{WorkerAction, WorkerHandle, WorkerReply};

/// Characters of card text included in an illustration prompt.
const PROMPT_TEXT_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("no {0} capability configured")]
    MissingCapability(&'static str),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker context unavailable")]
    Unavailable,

    #[error("{0}")]
    Failed(String),

    #[error("unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

/// Settled results of one enrichment pass. `None` means the step was not
/// attempted.
#[derive(Debug)]
pub struct EnrichmentOutcome {
    pub embedding: Option<Result<Vec<f32>, EnrichError>>,
    pub summary: Option<Result<String, EnrichError>>,
    pub illustration: Option<Result<String, EnrichError>>,
}

/// Run one action directly against the configured capabilities.
pub(crate) async fn execute(
    ai: &AiCapabilities,
    action: WorkerAction,
) -> Result<WorkerReply, EnrichError> {
    let failed = |e: anyhow::Error| EnrichError::Failed(format!("{e:#}"));
    match action {
        WorkerAction::Embed { text } => {
            let embedder = ai
                .embedder
                .as_ref()
                .ok_or(EnrichError::MissingCapability("embed"))?;
            embedder.embed(&text).await.map(WorkerReply::Vector).map_err(failed)
        }
        WorkerAction::SummarizeCard { card } => {
            let summarizer = ai
                .summarizer
                .as_ref()
                .ok_or(EnrichError::MissingCapability("summarize"))?;
            summarizer
                .summarize_card(&card)
                .await
                .map(WorkerReply::Text)
                .map_err(failed)
        }
        WorkerAction::GenerateIllustration { prompt } => {
            let illustrator = ai
                .illustrator
                .as_ref()
                .ok_or(EnrichError::MissingCapability("illustrate"))?;
            illustrator
                .generate_illustration(&prompt)
                .await
                .map(WorkerReply::Text)
                .map_err(failed)
        }
    }
}

pub struct Enricher {
    ai: AiCapabilities,
    worker: Option<WorkerHandle>,
    timeout: Duration,
}

impl Enricher {
    /// Build an enricher. The worker context is started only when requested
    /// and a Tokio runtime is available.
    pub fn new(ai: AiCapabilities, config: &EnrichmentConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let worker = if config.use_worker {
            WorkerHandle::spawn(ai.clone(), timeout)
        } else {
            None
        };
        tracing::debug!(
            capabilities = ?ai.present(),
            worker = worker.is_some(),
            "enricher ready"
        );
        Self {
            ai,
            worker,
            timeout,
        }
    }

    pub fn capabilities(&self) -> &AiCapabilities {
        &self.ai
    }

    pub fn uses_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn dispatch(&self, action: WorkerAction) -> Result<WorkerReply, EnrichError> {
        if let Some(worker) = &self.worker {
            match worker.request(action.clone()).await {
                Err(EnrichError::Unavailable) => {
                    tracing::warn!(
                        action = action.name(),
                        "worker unavailable, invoking capability directly"
                    );
                }
                settled => return settled,
            }
        }
        tokio::time::timeout(self.timeout, execute(&self.ai, action))
            .await
            .unwrap_or(Err(EnrichError::Timeout(self.timeout)))
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EnrichError> {
        if self.ai.embedder.is_none() {
            return Err(EnrichError::MissingCapability("embed"));
        }
        match self
            .dispatch(WorkerAction::Embed {
                text: text.to_string(),
            })
            .await?
        {
            WorkerReply::Vector(v) if !v.is_empty() => Ok(v),
            _ => Err(EnrichError::UnexpectedReply("embed")),
        }
    }

    /// Summary from the summarizer, or the local first-sentence heuristic
    /// when no summarizer is configured.
    pub async fn summarize_card(&self, card: &Card) -> Result<String, EnrichError> {
        if self.ai.summarizer.is_none() {
            return Ok(heuristic::fallback_summary(card));
        }
        match self
            .dispatch(WorkerAction::SummarizeCard {
                card: Box::new(card.clone()),
            })
            .await?
        {
            WorkerReply::Text(s) => Ok(s),
            WorkerReply::Vector(_) => Err(EnrichError::UnexpectedReply("summarizeCard")),
        }
    }

    /// `None` when no illustrator is configured.
    pub async fn illustrate(&self, card: &Card) -> Option<Result<String, EnrichError>> {
        self.ai.illustrator.as_ref()?;
        let prompt = illustration_prompt(card);
        let result = match self.dispatch(WorkerAction::GenerateIllustration { prompt }).await {
            Ok(WorkerReply::Text(reference)) => Ok(reference),
            Ok(WorkerReply::Vector(_)) => Err(EnrichError::UnexpectedReply("generateIllustration")),
            Err(e) => Err(e),
        };
        Some(result)
    }

    /// Run every enrichment step for `card` and wait for all of them to settle.
    pub async fn enrich(&self, card: &Card) -> EnrichmentOutcome {
        let (embedding, summary, illustration) = tokio::join!(
            self.missing_embedding(card),
            self.summarize_card(card),
            self.illustrate(card)
        );
        EnrichmentOutcome {
            embedding,
            summary: Some(summary),
            illustration,
        }
    }

    /// Only the embedding step, for cards whose text is unchanged but which
    /// still lack a vector.
    pub async fn embed_missing(&self, card: &Card) -> EnrichmentOutcome {
        EnrichmentOutcome {
            embedding: self.missing_embedding(card).await,
            summary: None,
            illustration: None,
        }
    }

    pub fn can_embed(&self, card: &Card) -> bool {
        card.embedding.is_none() && self.ai.embedder.is_some()
    }

    async fn missing_embedding(&self, card: &Card) -> Option<Result<Vec<f32>, EnrichError>> {
        if !self.can_embed(card) {
            return None;
        }
        Some(self.embed(card.embedding_key()).await)
    }
}

fn illustration_prompt(card: &Card) -> String {
    let text = heuristic::truncate_chars(card.text_basis().trim(), PROMPT_TEXT_LEN);
    if text == card.title {
        format!("Illustration for \"{}\"", card.title)
    } else {
        format!("Illustration for \"{}\": {}", card.title, text)
    }
}
