//! ABOUTME: Embedder trait and process-wide singleton wiring for the LTMC memory service
//! ABOUTME: The embedding model itself is an external collaborator; this crate only owns the seam
//!
//! The original source repeatedly reloaded its embedding model per request.
//! Here the model is loaded once at bootstrap and shared behind
//! [`EmbeddingService`] — loading is expensive (hundreds of ms) and every
//! caller, however many concurrent retrieval or write operations are in
//! flight, shares the same instance.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use ltmc_types::{LtmcError, Result};

/// `text → vector<fixed dim>`. The only contract the rest of LTMC has with
/// whatever embedding model is actually deployed.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Human-readable name of the active model, for logging and health checks.
    fn name(&self) -> &str;

    /// Fixed output dimensionality. Must match the configured vector index
    /// dimension; mismatches are caught at startup, never at query time.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts in one call.
    ///
    /// # Errors
    ///
    /// Returns [`LtmcError::Internal`] if the underlying model fails.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Convenience wrapper for a single text.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Embedder::embed`] returns.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors.pop().ok_or_else(|| {
            LtmcError::Internal("embedder returned no vector for a single input".to_string())
        })
    }
}

/// Process-wide embedder handle.
///
/// Constructed once at bootstrap from [`ltmc_config::LtmcConfig`] and cloned
/// (cheaply, via `Arc`) into the coordinator and retrieval pipeline. Multiple
/// concurrent callers share the same underlying model.
#[derive(Clone)]
pub struct EmbeddingService {
    inner: Arc<dyn Embedder>,
}

impl EmbeddingService {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { inner: embedder }
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.inner.name()
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Internal`] if the underlying model fails.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.inner.embed(texts).await
    }

    /// # Errors
    ///
    /// Returns [`LtmcError::Internal`] if the underlying model fails.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_one(text).await
    }
}

/// Deterministic, dependency-free embedder used when no real model is
/// configured (tests, local development, and CI).
///
/// Hashes each text with SHA-256 and expands the digest into `dimensions`
/// floats in `[-1.0, 1.0)`. Same text always yields the same vector; it
/// carries no semantic meaning beyond exact/near-duplicate detection, which
/// is sufficient for exercising the storage and retrieval pipeline without a
/// real model dependency.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash-embedder-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dimensions)).collect())
    }
}

fn hash_embed(text: &str, dimensions: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dimensions);
    let mut counter: u32 = 0;
    while out.len() < dimensions {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks_exact(4) {
            if out.len() == dimensions {
                break;
            }
            let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            #[allow(clippy::cast_precision_loss)]
            let unit = (bits as f32) / (u32::MAX as f32);
            out.push(unit.mul_add(2.0, -1.0));
        }
        counter += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_yields_same_vector() {
        let embedder = HashEmbedder::new(16);
        let a = embedder.embed_one("brown fox").await.unwrap();
        let b = embedder.embed_one("brown fox").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn different_text_yields_different_vector() {
        let embedder = HashEmbedder::new(16);
        let a = embedder.embed_one("brown fox").await.unwrap();
        let b = embedder.embed_one("lazy dog").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn service_shares_dimensions_with_embedder() {
        let service = EmbeddingService::new(Arc::new(HashEmbedder::new(8)));
        assert_eq!(service.dimensions(), 8);
        let v = service.embed_one("x").await.unwrap();
        assert_eq!(v.len(), 8);
    }
}
