//! In-memory vector backend using exact cosine similarity.
//!
//! [`InMemoryBackend`] is a linear scan over every stored embedding. It is the
//! fallback when no database is reachable, the mirror behind
//! [`VectorStore`](crate::VectorStore), and the reference behaviour the
//! persistent backends are tested against.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{Chunk, SearchResult};
use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::vectorstore::{BackendKind, SearchOptions, StoreStats, VectorBackend};

/// The chunks of one document plus the order in which it was stored.
#[derive(Debug)]
struct StoredDocument {
    sequence: u64,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Default)]
struct Inner {
    documents: HashMap<String, StoredDocument>,
    next_sequence: u64,
}

impl Inner {
    /// Every stored chunk in insertion order.
    fn chunks_in_order(&self) -> Vec<&Chunk> {
        let mut documents: Vec<&StoredDocument> = self.documents.values().collect();
        documents.sort_by_key(|d| d.sequence);
        documents.into_iter().flat_map(|d| d.chunks.iter()).collect()
    }
}

/// An in-memory map from document id to its chunks.
///
/// All operations are async-safe via `tokio::sync::RwLock`. `store_chunks`
/// deletes and inserts under a single write guard, so readers see either the
/// old or the new chunk set of a document, never a mix.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{InMemoryBackend, VectorBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.store_chunks("doc-1", &chunks).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: RwLock<Inner>,
}

impl InMemoryBackend {
    /// Create a new empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InMemory
    }

    async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.documents.remove(document_id);
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner
            .documents
            .insert(document_id.to_string(), StoredDocument { sequence, chunks: chunks.to_vec() });
        Ok(())
    }

    async fn chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let inner = self.inner.read().await;
        Ok(inner.documents.get(document_id).map(|d| d.chunks.clone()).unwrap_or_default())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let inner = self.inner.read().await;
        Ok(inner
            .documents
            .values()
            .flat_map(|d| d.chunks.iter())
            .find(|chunk| chunk.id == chunk_id)
            .cloned())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let inner = self.inner.read().await;

        let candidates: Vec<&Chunk> = match &options.document_id {
            Some(document_id) => inner
                .documents
                .get(document_id)
                .map(|d| d.chunks.iter().collect())
                .unwrap_or_default(),
            None => inner.chunks_in_order(),
        };

        let mut scored = Vec::new();
        for chunk in candidates {
            let Some(embedding) = &chunk.embedding else { continue };
            if !options.filter.matches(chunk) {
                continue;
            }
            let score = cosine_similarity(query, embedding)?;
            if score >= options.threshold {
                scored.push(SearchResult { chunk: chunk.clone(), score });
            }
        }

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(options.top_k);
        Ok(scored)
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.inner.write().await.documents.remove(document_id);
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let inner = self.inner.read().await;
        let chunks = inner.documents.values().flat_map(|d| d.chunks.iter());
        Ok(StoreStats {
            documents: inner.documents.len(),
            chunks: chunks.clone().count(),
            embeddings: chunks.filter(|c| c.embedding.is_some()).count(),
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.documents.clear();
        Ok(())
    }
}
