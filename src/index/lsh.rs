//! Locality-sensitive hashing over embedding vectors.
//!
//! A fixed set of random hyperplanes is drawn the first time an embedding is
//! seen. Each vector hashes to a bit string (one bit per plane: `1` when the dot
//! product is non-negative) and cards sharing a bit string share a bucket.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug)]
pub struct LshIndex {
    num_planes: usize,
    seed: Option<u64>,
    planes: Vec<Vec<f32>>,
    buckets: HashMap<String, BTreeSet<String>>,
    card_bucket: HashMap<String, String>,
}

impl LshIndex {
    pub fn new(num_planes: usize, seed: Option<u64>) -> Self {
        Self {
            num_planes: num_planes.max(1),
            seed,
            planes: Vec::new(),
            buckets: HashMap::new(),
            card_bucket: HashMap::new(),
        }
    }

    /// Whether the hyperplanes have been drawn.
    pub fn is_initialized(&self) -> bool {
        !self.planes.is_empty()
    }

    /// Dimensionality fixed by the first embedding seen.
    pub fn dimensions(&self) -> Option<usize> {
        self.planes.first().map(Vec::len)
    }

    /// Bucket key for `vector`, or `None` before initialization.
    pub fn hash(&self, vector: &[f32]) -> Option<String> {
        if !self.is_initialized() {
            return None;
        }
        Some(
            self.planes
                .iter()
                .map(|plane| if dot(plane, vector) >= 0.0 { '1' } else { '0' })
                .collect(),
        )
    }

    /// Place a card in the bucket of its current embedding, evicting it from
    /// any previous bucket first.
    pub fn insert(&mut self, card_id: &str, vector: &[f32]) {
        if vector.is_empty() {
            self.remove(card_id);
            return;
        }
        if !self.is_initialized() {
            self.draw_planes(vector.len());
        }
        self.remove(card_id);
        let Some(key) = self.hash(vector) else {
            return;
        };
        self.buckets
            .entry(key.clone())
            .or_default()
            .insert(card_id.to_string());
        self.card_bucket.insert(card_id.to_string(), key);
    }

    /// Evict a card from its bucket. Returns whether it was indexed.
    pub fn remove(&mut self, card_id: &str) -> bool {
        let Some(key) = self.card_bucket.remove(card_id) else {
            return false;
        };
        if let Some(ids) = self.buckets.get_mut(&key) {
            ids.remove(card_id);
            if ids.is_empty() {
                self.buckets.remove(&key);
            }
        }
        true
    }

    pub fn bucket(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.buckets.get(key)
    }

    #[cfg(test)]
    pub fn bucket_of(&self, card_id: &str) -> Option<&str> {
        self.card_bucket.get(card_id).map(String::as_str)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn indexed_cards(&self) -> usize {
        self.card_bucket.len()
    }

    fn draw_planes(&mut self, dims: usize) {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.planes = (0..self.num_planes)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect();
        tracing::debug!(planes = self.num_planes, dims, "LSH hyperplanes drawn");
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity over the shared prefix of two vectors. Zero when either
/// prefix has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let (a, b) = (&a[..len], &b[..len]);
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}
