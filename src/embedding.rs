use anyhow::{anyhow, Result};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::Number;
use crate::vector_ops::normalize_vector;

/// A frozen text embedding model.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector regardless of what else is in the batch.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<Number>>>;
}

#[derive(Debug, Default)]
pub struct EmbeddingOutcome {
    pub vectors: Vec<Vec<Number>>,
    /// Positions whose vector is a zero placeholder.
    pub low_confidence: Vec<usize>,
}

/// Runs an [`Embedder`] over bounded-size batches.
pub struct EmbeddingGenerator<'a> {
    embedder: &'a dyn Embedder,
    batch_size: usize,
}

impl<'a> EmbeddingGenerator<'a> {
    pub fn new(embedder: &'a dyn Embedder, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn generate(&self, texts: &[String]) -> EmbeddingOutcome {
        let outcome = texts.chunks(self.batch_size).enumerate().fold(
            EmbeddingOutcome {
                vectors: Vec::with_capacity(texts.len()),
                low_confidence: Vec::new(),
            },
            |mut outcome, (batch_no, batch)| {
                debug!("Embedding batch {} ({} texts)", batch_no, batch.len());
                match self.embed_checked(batch) {
                    Ok(vectors) => outcome.vectors.extend(vectors),
                    Err(e) => {
                        warn!(
                            "Embedding batch {} failed, retrying one entry at a time: {:#}",
                            batch_no, e
                        );
                        self.embed_isolated(batch, &mut outcome);
                    }
                }
                outcome
            },
        );

        info!(
            "Generated {} embeddings with {} ({} low confidence)",
            outcome.vectors.len(),
            self.embedder.name(),
            outcome.low_confidence.len()
        );
        outcome
    }

    fn embed_isolated(&self, batch: &[String], outcome: &mut EmbeddingOutcome) {
        for text in batch {
            let position = outcome.vectors.len();
            match self.embed_checked(std::slice::from_ref(text)) {
                Ok(vectors) => outcome.vectors.extend(vectors),
                Err(e) => {
                    warn!("Entry {} could not be embedded, using a zero vector: {:#}", position, e);
                    outcome.vectors.push(vec![0.0; self.embedder.dimensions()]);
                    outcome.low_confidence.push(position);
                }
            }
        }
    }

    fn embed_checked(&self, batch: &[String]) -> Result<Vec<Vec<Number>>> {
        let mut vectors = self.embedder.embed_batch(batch)?;
        if vectors.len() != batch.len() {
            return Err(anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                batch.len(),
                vectors.len()
            ));
        }
        let expected = self.embedder.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(anyhow!(
                "Embedding dimension mismatch: expected {}, got {}",
                expected,
                bad.len()
            ));
        }
        for vector in vectors.iter_mut() {
            normalize_vector(vector);
        }
        Ok(vectors)
    }
}

/// Offline embedder based on random indexing.
///
/// Every token is hashed with SHA-256 and the digest seeds a Gaussian
/// random vector; a text's embedding is the sum over its tokens. Texts that
/// share most tokens end up close in cosine distance.
pub struct HashingEmbedder {
    dimensions: usize,
    normal: Normal<Number>,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        let normal = Normal::new(0.0, 1.0).map_err(|e| anyhow!("Invalid distribution: {}", e))?;
        Ok(Self { dimensions, normal })
    }

    fn token_vector(&self, token: &str) -> impl Iterator<Item = Number> + '_ {
        let digest = Sha256::digest(token.as_bytes());
        let seed = digest
            .iter()
            .take(8)
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        let rng = StdRng::seed_from_u64(seed);
        self.normal.sample_iter(rng).take(self.dimensions)
    }

    pub fn embed_text(&self, text: &str) -> Vec<Number> {
        let mut vector = vec![0.0; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            for (slot, value) in vector.iter_mut().zip(self.token_vector(token)) {
                *slot += value;
            }
        }
        normalize_vector(&mut vector);
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}
