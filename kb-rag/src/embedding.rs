//! Embedding generation and vector math.
//!
//! [`EmbeddingProvider`] is the seam to an external embedding service.
//! [`Embedder`] wraps a provider with fixed-size batching, an optional
//! per-call timeout, and dimension validation of every returned vector.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, error};

use crate::error::{RagError, Result};

/// Default number of texts embedded concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. Providers are expected to be near-deterministic (same text,
/// same or almost the same vector) but callers must not rely on exact
/// equality.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Return the dimensionality of embeddings produced by this provider.
    ///
    /// Returning `0` disables dimension validation in [`Embedder`].
    fn dimensions(&self) -> usize;

    /// A short name used in errors and logs.
    fn name(&self) -> &str {
        "embedding"
    }
}

/// Batching front-end over an [`EmbeddingProvider`].
///
/// Texts are embedded in groups of `batch_size`. Requests inside a group run
/// concurrently; groups run one after another so at most `batch_size` calls
/// are in flight. The first failure aborts the whole call and no partial
/// result is returned. Dropping the returned future abandons the in-flight
/// group without cancelling provider-side work.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Option<Duration>,
}

impl Embedder {
    /// Wrap a provider with the default batch size and no timeout.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self { provider, batch_size: DEFAULT_BATCH_SIZE, timeout: None }
    }

    /// Set the number of texts embedded concurrently per batch (minimum 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Fail provider calls that take longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Return a reference to the wrapped provider.
    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// The dimensionality reported by the provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ProviderTimeout`] when the configured timeout
    /// elapses, [`RagError::DimensionMismatch`] when the provider returns a
    /// vector of the wrong length, or the provider's own error.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.provider.embed(text);
        let embedding = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call).await.map_err(|_| {
                error!(provider = self.provider.name(), ?timeout, "embedding call timed out");
                RagError::ProviderTimeout { provider: self.provider.name().to_string(), timeout }
            })??,
            None => call.await?,
        };
        self.validate(&embedding)?;
        Ok(embedding)
    }

    /// Embed many texts, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns the first error of any batch; earlier batches' results are
    /// discarded.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                provider = self.provider.name(),
                batch_index,
                batch_size = batch.len(),
                "embedding batch"
            );
            let batch_embeddings = try_join_all(batch.iter().map(|text| self.embed(text))).await?;
            embeddings.extend(batch_embeddings);
        }
        Ok(embeddings)
    }

    /// Cosine similarity; see [`cosine_similarity`].
    pub fn cosine_similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        cosine_similarity(a, b)
    }

    /// Euclidean distance; see [`euclidean_distance`].
    pub fn euclidean_distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        euclidean_distance(a, b)
    }

    fn validate(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.provider.dimensions();
        if expected != 0 && embedding.len() != expected {
            return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(RagError::ProviderError {
                provider: self.provider.name().to_string(),
                message: "embedding contains non-finite values".to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("provider", &self.provider.name())
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn ensure_same_len(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() != b.len() {
        return Err(RagError::DimensionMismatch { expected: a.len(), actual: b.len() });
    }
    Ok(())
}

/// Compute cosine similarity between two vectors, in `[-1, 1]`.
///
/// Returns 0.0 if either vector has zero magnitude.
///
/// # Errors
///
/// Returns [`RagError::DimensionMismatch`] if the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_len(a, b)?;
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Compute the Euclidean distance between two vectors.
///
/// # Errors
///
/// Returns [`RagError::DimensionMismatch`] if the lengths differ.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_len(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt())
}
