//! Vector storage with a backend-selection chain and read fallback.
//!
//! A [`VectorBackend`] is one concrete store (Qdrant, pgvector, in-memory).
//! [`VectorStore`] owns the backend chosen at construction plus an
//! in-memory mirror. Writes go to both; reads go to the active backend and
//! fall back to the mirror when it fails, so a lost database connection
//! degrades latency and durability but never the result shape.
//!
//! # Consistency
//!
//! `store_chunks` and `delete_document` are serialized per document id.
//! A failed persistent write marks the document unsynced; its reads come
//! from the mirror until a later write or delete succeeds on the backend.
//! Searches take no per-document lock: a query racing a re-index of the same
//! document may observe either the old or the new chunk set.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{BackendSpec, StoreConfig};
use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::inmemory::InMemoryBackend;

/// Metadata constraints applied during similarity search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchFilter {
    /// Keep chunks carrying at least one of these tags. Empty means no constraint.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Keep chunks whose chapter equals this value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
}

impl SearchFilter {
    /// Whether `chunk` satisfies every constraint of the filter.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if !self.tags.is_empty() && !self.tags.iter().any(|tag| chunk.metadata.tags.contains(tag))
        {
            return false;
        }
        if let Some(chapter) = &self.chapter {
            if chunk.metadata.chapter.as_ref() != Some(chapter) {
                return false;
            }
        }
        true
    }

    /// Whether the filter constrains anything.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.chapter.is_none()
    }
}

/// Parameters for [`VectorBackend::similarity_search`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub top_k: usize,
    /// Minimum cosine similarity; lower-scoring chunks are dropped.
    pub threshold: f32,
    /// Restrict the search to one document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub filter: SearchFilter,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_k: 5, threshold: 0.7, document_id: None, filter: SearchFilter::default() }
    }
}

/// Counts reported by [`VectorBackend::stats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    /// Chunks that carry an embedding and are therefore searchable.
    pub embeddings: usize,
}

/// Which kind of backend is serving requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Qdrant,
    PgVector,
    InMemory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Qdrant => "qdrant",
            Self::PgVector => "pgvector",
            Self::InMemory => "memory",
        };
        f.write_str(name)
    }
}

/// A storage backend for chunk embeddings with similarity search.
///
/// Every implementation honours the same contract: `store_chunks` replaces
/// all chunks of a document, search results are cosine similarities sorted
/// descending with ties in insertion order, and `threshold` is inclusive.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// The kind of this backend.
    fn kind(&self) -> BackendKind;

    /// Replace every stored chunk of `document_id` with `chunks`.
    async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Return the chunks of a document in document order.
    async fn chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Return a single chunk by id.
    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Return the `top_k` stored chunks most similar to `query`.
    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>>;

    /// Remove every chunk of a document. Unknown ids are a no-op.
    async fn delete_document(&self, document_id: &str) -> Result<()>;

    /// Document, chunk, and embedding counts.
    async fn stats(&self) -> Result<StoreStats>;

    /// Remove everything.
    async fn clear(&self) -> Result<()>;
}

/// Serialized per-document write access.
#[derive(Default)]
struct DocumentLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    fn get(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop guards nobody else holds so the map does not grow without bound.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(document_id.to_string()).or_default().clone()
    }
}

/// Documents whose latest write reached the mirror but not the backend.
#[derive(Default)]
struct UnsyncedDocuments {
    ids: std::sync::Mutex<HashSet<String>>,
}

impl UnsyncedDocuments {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark(&self, document_id: &str) {
        self.ids().insert(document_id.to_string());
    }

    fn unmark(&self, document_id: &str) {
        self.ids().remove(document_id);
    }

    fn contains(&self, document_id: &str) -> bool {
        self.ids().contains(document_id)
    }

    fn any(&self) -> bool {
        !self.ids().is_empty()
    }

    fn reset(&self) {
        self.ids().clear();
    }
}

/// The vector store the rest of the engine talks to.
///
/// Construct with [`VectorStore::connect`] to run the selection chain, or
/// with [`VectorStore::with_backend`] to inject a backend directly.
///
/// A document whose last write failed on the persistent backend is served
/// from the mirror until a later write or delete reaches the backend. While
/// any such document exists, unscoped searches and stats come from the
/// mirror as well.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::{StoreConfig, VectorStore};
///
/// let store = VectorStore::connect(&StoreConfig::from_env()?).await;
/// store.store_chunks("doc-1", &chunks).await?;
/// let hits = store.similarity_search(&query_embedding, &SearchOptions::default()).await?;
/// ```
pub struct VectorStore {
    backend: Option<Arc<dyn VectorBackend>>,
    memory: InMemoryBackend,
    locks: DocumentLocks,
    unsynced: UnsyncedDocuments,
    degraded: AtomicBool,
}

impl VectorStore {
    /// A store that only uses the in-memory backend.
    pub fn in_memory() -> Self {
        Self {
            backend: None,
            memory: InMemoryBackend::new(),
            locks: DocumentLocks::default(),
            unsynced: UnsyncedDocuments::default(),
            degraded: AtomicBool::new(false),
        }
    }

    /// A store fronting `backend`, mirrored in memory.
    pub fn with_backend(backend: Arc<dyn VectorBackend>) -> Self {
        let backend = (backend.kind() != BackendKind::InMemory).then_some(backend);
        Self { backend, ..Self::in_memory() }
    }

    /// Run the selection chain: primary, then secondary, then in-memory.
    ///
    /// Connection failures are logged and never returned.
    pub async fn connect(config: &StoreConfig) -> Self {
        for (role, spec) in [("primary", &config.primary), ("secondary", &config.secondary)] {
            let Some(spec) = spec else { continue };
            match connect_backend(spec).await {
                Ok(backend) => {
                    info!(role, backend = %backend.kind(), "vector backend connected");
                    return Self::with_backend(backend);
                }
                Err(e) => warn!(role, error = %e, "vector backend unavailable, trying next"),
            }
        }
        warn!("no persistent vector backend available, using in-memory store");
        Self::in_memory()
    }

    /// The backend selected at construction.
    pub fn active_backend(&self) -> BackendKind {
        self.backend.as_ref().map_or(BackendKind::InMemory, |b| b.kind())
    }

    /// Whether any operation has fallen back to the in-memory mirror.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Replace every chunk of `document_id` with `chunks`.
    ///
    /// Persistent-backend failures are logged and the write lands in the
    /// in-memory mirror only; reads of the document are then served from
    /// the mirror.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ValidationError`] if a chunk belongs to another
    /// document, or [`RagError::DimensionMismatch`] if embeddings differ in
    /// length.
    pub async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        validate_chunks(document_id, chunks)?;
        let lock = self.locks.get(document_id);
        let _guard = lock.lock().await;

        if let Some(backend) = &self.backend {
            match backend.store_chunks(document_id, chunks).await {
                Ok(()) => self.unsynced.unmark(document_id),
                Err(e) => {
                    error!(
                        backend = %backend.kind(),
                        document.id = document_id,
                        error = %e,
                        "persistent write failed, keeping chunks in memory"
                    );
                    self.unsynced.mark(document_id);
                    self.degraded.store(true, Ordering::Relaxed);
                }
            }
        }
        self.memory.store_chunks(document_id, chunks).await?;
        debug!(document.id = document_id, chunk_count = chunks.len(), "stored chunks");
        Ok(())
    }

    /// Return the chunks of a document in document order.
    pub async fn get_chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        if let Some(backend) = self.backend_for(Some(document_id)) {
            match backend.chunks_by_document(document_id).await {
                Ok(chunks) => return Ok(chunks),
                Err(e) => self.fall_back(backend.kind(), "chunks_by_document", &e),
            }
        }
        self.memory.chunks_by_document(document_id).await
    }

    /// Return a single chunk by id.
    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let Some(backend) = &self.backend else {
            return self.memory.get_chunk(chunk_id).await;
        };

        let mirrored =
            if self.unsynced.any() { self.memory.get_chunk(chunk_id).await? } else { None };
        if let Some(chunk) = mirrored.filter(|c| self.unsynced.contains(&c.document_id)) {
            return Ok(Some(chunk));
        }

        match backend.get_chunk(chunk_id).await {
            // The backend copy predates the mirror's latest write, which no
            // longer has this chunk.
            Ok(Some(chunk)) if self.unsynced.contains(&chunk.document_id) => Ok(None),
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.fall_back(backend.kind(), "get_chunk", &e);
                self.memory.get_chunk(chunk_id).await
            }
        }
    }

    /// Return the stored chunks most similar to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if `query` and a stored
    /// embedding differ in length.
    pub async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        if let Some(backend) = self.backend_for(options.document_id.as_deref()) {
            match backend.similarity_search(query, options).await {
                Ok(results) => return Ok(results),
                Err(e) => self.fall_back(backend.kind(), "similarity_search", &e),
            }
        }
        self.memory.similarity_search(query, options).await
    }

    /// Remove every chunk of a document from every store holding it.
    ///
    /// # Errors
    ///
    /// Returns the persistent backend's error, in which case the in-memory
    /// mirror keeps the document.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let lock = self.locks.get(document_id);
        let _guard = lock.lock().await;

        if let Some(backend) = &self.backend {
            backend.delete_document(document_id).await.inspect_err(|e| {
                error!(
                    backend = %backend.kind(),
                    document.id = document_id,
                    error = %e,
                    "persistent delete failed"
                );
            })?;
        }
        self.memory.delete_document(document_id).await?;
        self.unsynced.unmark(document_id);
        debug!(document.id = document_id, "deleted document chunks");
        Ok(())
    }

    /// Document, chunk, and embedding counts of the active backend.
    pub async fn stats(&self) -> Result<StoreStats> {
        if let Some(backend) = self.backend_for(None) {
            match backend.stats().await {
                Ok(stats) => return Ok(stats),
                Err(e) => self.fall_back(backend.kind(), "stats", &e),
            }
        }
        self.memory.stats().await
    }

    /// Remove everything from every store.
    pub async fn clear(&self) -> Result<()> {
        if let Some(backend) = &self.backend {
            backend.clear().await?;
        }
        self.memory.clear().await?;
        self.unsynced.reset();
        info!("vector store cleared");
        Ok(())
    }

    /// The persistent backend, unless the mirror holds newer data for
    /// `document_id` (or, for `None`, for any document).
    fn backend_for(&self, document_id: Option<&str>) -> Option<&Arc<dyn VectorBackend>> {
        let stale = match document_id {
            Some(id) => self.unsynced.contains(id),
            None => self.unsynced.any(),
        };
        if stale {
            debug!(document.id = document_id, "serving unsynced data from memory");
            return None;
        }
        self.backend.as_ref()
    }

    fn fall_back(&self, backend: BackendKind, operation: &str, e: &RagError) {
        warn!(%backend, operation, error = %e, "vector backend read failed, serving from memory");
        self.degraded.store(true, Ordering::Relaxed);
    }
}

impl fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorStore")
            .field("active_backend", &self.active_backend())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

fn validate_chunks(document_id: &str, chunks: &[Chunk]) -> Result<()> {
    if let Some(stray) = chunks.iter().find(|c| c.document_id != document_id) {
        return Err(RagError::ValidationError(format!(
            "chunk '{}' belongs to document '{}', not '{document_id}'",
            stray.id, stray.document_id
        )));
    }
    let mut dimensions = chunks.iter().filter_map(|c| c.embedding.as_ref().map(Vec::len));
    if let Some(expected) = dimensions.next() {
        if let Some(actual) = dimensions.find(|len| *len != expected) {
            return Err(RagError::DimensionMismatch { expected, actual });
        }
    }
    Ok(())
}

#[allow(unused_variables)]
async fn connect_backend(spec: &BackendSpec) -> Result<Arc<dyn VectorBackend>> {
    match spec {
        BackendSpec::InMemory => Ok(Arc::new(InMemoryBackend::new())),
        #[cfg(feature = "qdrant")]
        BackendSpec::Qdrant { url, collection, dimensions } => {
            let backend =
                crate::qdrant::QdrantBackend::connect(url, collection, *dimensions).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(feature = "pgvector")]
        BackendSpec::PgVector { database_url, table, dimensions } => {
            let backend =
                crate::pgvector::PgVectorBackend::connect(database_url, table, *dimensions).await?;
            Ok(Arc::new(backend))
        }
        #[allow(unreachable_patterns)]
        other => Err(RagError::BackendUnavailable {
            backend: other.kind().to_string(),
            message: "support for this backend was not compiled in".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn chunk(document_id: &str, index: usize, embedding: Vec<f32>) -> Chunk {
        let mut chunk =
            Chunk::new(document_id, format!("chunk {index}"), ChunkMetadata::default(), index);
        chunk.embedding = Some(embedding);
        chunk
    }

    /// A persistent backend over an in-memory store whose writes and reads
    /// can be made to fail independently.
    #[derive(Default)]
    struct FlakyBackend {
        inner: InMemoryBackend,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
    }

    impl FlakyBackend {
        fn check(&self, flag: &AtomicBool) -> Result<()> {
            if flag.load(Ordering::SeqCst) {
                return Err(RagError::BackendUnavailable {
                    backend: "qdrant".into(),
                    message: "connection refused".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl VectorBackend for FlakyBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Qdrant
        }
        async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
            self.check(&self.fail_writes)?;
            self.inner.store_chunks(document_id, chunks).await
        }
        async fn chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
            self.check(&self.fail_reads)?;
            self.inner.chunks_by_document(document_id).await
        }
        async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
            self.check(&self.fail_reads)?;
            self.inner.get_chunk(chunk_id).await
        }
        async fn similarity_search(
            &self,
            query: &[f32],
            options: &SearchOptions,
        ) -> Result<Vec<SearchResult>> {
            self.check(&self.fail_reads)?;
            self.inner.similarity_search(query, options).await
        }
        async fn delete_document(&self, document_id: &str) -> Result<()> {
            self.check(&self.fail_writes)?;
            self.inner.delete_document(document_id).await
        }
        async fn stats(&self) -> Result<StoreStats> {
            self.check(&self.fail_reads)?;
            self.inner.stats().await
        }
        async fn clear(&self) -> Result<()> {
            self.check(&self.fail_writes)?;
            self.inner.clear().await
        }
    }

    fn scoped(document_id: &str) -> SearchOptions {
        SearchOptions {
            threshold: 0.5,
            document_id: Some(document_id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reads_fall_back_to_memory_when_backend_fails() {
        let backend = Arc::new(FlakyBackend::default());
        let store = VectorStore::with_backend(backend.clone());
        assert_eq!(store.active_backend(), BackendKind::Qdrant);

        store.store_chunks("doc", &[chunk("doc", 0, vec![1.0, 0.0])]).await.unwrap();
        assert!(!store.is_degraded());
        backend.fail_reads.store(true, Ordering::SeqCst);

        let options = SearchOptions { threshold: 0.5, ..Default::default() };
        let results = store.similarity_search(&[1.0, 0.0], &options).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(store.get_chunks_by_document("doc").await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().chunks, 1);
        assert!(store.is_degraded());
    }

    #[tokio::test]
    async fn failed_write_is_readable_from_memory() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let store = VectorStore::with_backend(backend.clone());

        let chunks = [chunk("doc", 0, vec![1.0, 0.0]), chunk("doc", 1, vec![0.0, 1.0])];
        store.store_chunks("doc", &chunks).await.unwrap();
        assert!(store.is_degraded());

        assert_eq!(store.get_chunks_by_document("doc").await.unwrap().len(), 2);
        assert!(store.get_chunk(&chunks[1].id).await.unwrap().is_some());
        assert_eq!(store.similarity_search(&[1.0, 0.0], &scoped("doc")).await.unwrap().len(), 1);
        let unscoped = SearchOptions { threshold: 0.5, ..Default::default() };
        assert_eq!(store.similarity_search(&[0.0, 1.0], &unscoped).await.unwrap().len(), 1);
        assert_eq!(store.stats().await.unwrap().chunks, 2);
    }

    #[tokio::test]
    async fn failed_rewrite_hides_stale_persistent_chunks() {
        let backend = Arc::new(FlakyBackend::default());
        let store = VectorStore::with_backend(backend.clone());
        let old: Vec<Chunk> = (0..3).map(|i| chunk("doc", i, vec![0.0, 1.0])).collect();
        store.store_chunks("doc", &old).await.unwrap();

        backend.fail_writes.store(true, Ordering::SeqCst);
        store.store_chunks("doc", &[chunk("doc", 0, vec![1.0, 0.0])]).await.unwrap();

        let current = store.get_chunks_by_document("doc").await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].embedding.as_deref(), Some(&[1.0, 0.0][..]));
        assert!(store.get_chunk(&old[2].id).await.unwrap().is_none());
        assert!(store.similarity_search(&[0.0, 1.0], &scoped("doc")).await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().chunks, 1);
    }

    #[tokio::test]
    async fn successful_write_resumes_persistent_reads() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let store = VectorStore::with_backend(backend.clone());
        store.store_chunks("doc", &[chunk("doc", 0, vec![1.0, 0.0])]).await.unwrap();

        backend.fail_writes.store(false, Ordering::SeqCst);
        store.store_chunks("doc", &[chunk("doc", 0, vec![1.0, 0.0])]).await.unwrap();

        // Only the backend sees this write.
        let persisted = [chunk("doc", 0, vec![1.0, 0.0]), chunk("doc", 1, vec![0.0, 1.0])];
        backend.inner.store_chunks("doc", &persisted).await.unwrap();
        assert_eq!(store.get_chunks_by_document("doc").await.unwrap().len(), 2);
        assert_eq!(store.stats().await.unwrap().chunks, 2);
    }

    #[tokio::test]
    async fn persistent_delete_failure_keeps_the_mirror() {
        let backend = Arc::new(FlakyBackend::default());
        let store = VectorStore::with_backend(backend.clone());
        store.store_chunks("doc", &[chunk("doc", 0, vec![1.0, 0.0])]).await.unwrap();

        backend.fail_writes.store(true, Ordering::SeqCst);
        let err = store.delete_document("doc").await.unwrap_err();
        assert!(matches!(err, RagError::BackendUnavailable { .. }));

        backend.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(store.get_chunks_by_document("doc").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_unsynced_documents() {
        let backend = Arc::new(FlakyBackend::default());
        backend.fail_writes.store(true, Ordering::SeqCst);
        let store = VectorStore::with_backend(backend.clone());
        store.store_chunks("doc", &[chunk("doc", 0, vec![1.0, 0.0])]).await.unwrap();

        backend.fail_writes.store(false, Ordering::SeqCst);
        store.delete_document("doc").await.unwrap();
        assert!(store.get_chunks_by_document("doc").await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
    }

    #[tokio::test]
    async fn connect_without_backends_uses_memory() {
        let store = VectorStore::connect(&StoreConfig::default()).await;
        assert_eq!(store.active_backend(), BackendKind::InMemory);
        assert!(!store.is_degraded());
    }

    #[tokio::test]
    async fn rejects_chunks_of_other_documents() {
        let store = VectorStore::in_memory();
        let err = store.store_chunks("doc", &[chunk("other", 0, vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::ValidationError(_)));
    }

    #[tokio::test]
    async fn rejects_mixed_dimensions() {
        let store = VectorStore::in_memory();
        let chunks = [chunk("doc", 0, vec![1.0, 0.0]), chunk("doc", 1, vec![1.0])];
        let err = store.store_chunks("doc", &chunks).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn filter_matches_any_tag_and_exact_chapter() {
        let mut c = chunk("doc", 0, vec![1.0]);
        c.metadata.tags = vec!["mendel".into(), "law".into()];
        c.metadata.chapter = Some("Ch1".into());

        assert!(SearchFilter::default().matches(&c));
        assert!(SearchFilter { tags: vec!["law".into(), "x".into()], chapter: None }.matches(&c));
        assert!(!SearchFilter { tags: vec!["x".into()], chapter: None }.matches(&c));
        assert!(SearchFilter { tags: vec![], chapter: Some("Ch1".into()) }.matches(&c));
        assert!(!SearchFilter { tags: vec![], chapter: Some("Ch2".into()) }.matches(&c));
    }

    #[tokio::test]
    async fn concurrent_stores_for_same_document_do_not_duplicate() {
        let store = Arc::new(VectorStore::in_memory());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let chunks: Vec<Chunk> =
                    (0..3).map(|i| chunk("doc", i, vec![1.0, i as f32])).collect();
                store.store_chunks("doc", &chunks).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.get_chunks_by_document("doc").await.unwrap().len(), 3);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats, StoreStats { documents: 1, chunks: 3, embeddings: 3 });
    }
}
