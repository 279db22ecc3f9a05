//! Capabilities that run in-process without any external service.
//!
//! [`ExtractiveSummarizer`] picks the highest-scoring sentences by word
//! frequency. [`HashingEmbedder`] maps tokens into a fixed number of buckets
//! (feature hashing) and L2-normalizes the result, so texts sharing vocabulary
//! land close together in cosine space.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::{AiCapabilities, Embedder, Summarizer};

/// Default dimensionality of [`HashingEmbedder`] vectors.
pub const HASHING_DIM: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Summarizer and embedder backed by the local implementations below.
pub fn local_capabilities() -> AiCapabilities {
    AiCapabilities::none()
        .with_summarizer(Arc::new(ExtractiveSummarizer::default()))
        .with_embedder(Arc::new(HashingEmbedder::default()))
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
}

#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_sentences: usize,
}

impl ExtractiveSummarizer {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    fn sentences(text: &str) -> Vec<&str> {
        let mut out = Vec::new();
        let mut start = 0;
        for (i, c) in text.char_indices() {
            if matches!(c, '.' | '!' | '?' | '\n') {
                let end = i + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                start = end;
            }
        }
        let tail = text[start..].trim();
        if !tail.is_empty() {
            out.push(tail);
        }
        out
    }

    /// Pick the best sentences and return them in their original order.
    pub fn extract(&self, text: &str) -> String {
        let sentences = Self::sentences(text);
        if sentences.len() <= self.max_sentences {
            return sentences.join(" ");
        }

        let mut freq: HashMap<String, usize> = HashMap::new();
        for word in tokens(text) {
            *freq.entry(word).or_default() += 1;
        }
        let mut scored: Vec<(usize, f32)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let words: Vec<String> = tokens(s).collect();
                let total: usize = words.iter().map(|w| freq.get(w).copied().unwrap_or(0)).sum();
                let score = if words.is_empty() {
                    0.0
                } else {
                    total as f32 / words.len() as f32
                };
                (i, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut chosen: Vec<usize> = scored
            .into_iter()
            .take(self.max_sentences)
            .map(|(i, _)| i)
            .collect();
        chosen.sort_unstable();
        chosen
            .into_iter()
            .map(|i| sentences[i])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, text: &str) -> Result<String> {
        let summary = self.extract(text);
        anyhow::ensure!(!summary.is_empty(), "nothing to summarize");
        Ok(summary)
    }
}

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for word in tokens(text) {
            let h = fnv1a(word.as_bytes());
            let slot = (h % self.dimensions as u64) as usize;
            // One hash bit picks the sign so collisions partly cancel out.
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[slot] += sign;
        }
        l2_normalize(&v)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIM)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let v = self.embed_sync(text);
        anyhow::ensure!(v.iter().any(|x| *x != 0.0), "no embeddable tokens in text");
        Ok(v)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
