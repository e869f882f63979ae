//! Document lifecycle orchestration.
//!
//! The [`DocumentManager`] is the boundary the request layer talks to. It
//! owns the document registry and drives each upload through
//! `uploaded → parsing → vectorizing → ready`. Any failure along the way
//! leaves the document in `error` with the failure message recorded, and the
//! triggering error is returned to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::{DocumentManager, DocumentMetadata, QueryOptions, RagConfig};
//!
//! let manager = DocumentManager::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .build()?;
//!
//! let doc = manager.upload_document("genetics.md", &text, DocumentMetadata::default()).await?;
//! let response = manager.query("What is linkage?", &QueryOptions::default()).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunking::{ChunkStrategy, chunk_text};
use crate::config::RagConfig;
use crate::document::{
    Chunk, ContentType, Document, DocumentMetadata, DocumentStatus, DocumentSummary, QueryHit,
    QueryResponse, QueryResult,
};
use crate::embedding::{Embedder, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::reranker::Reranker;
use crate::retriever::{QueryOptions, Retriever};
use crate::vectorstore::{BackendKind, VectorStore};

/// Aggregate counts returned by [`DocumentManager::get_stats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    /// Backend chosen by the selection chain.
    pub backend: BackendKind,
    /// Whether reads have fallen back to memory.
    pub degraded: bool,
}

/// Owns the document registry and the ingest and query paths.
pub struct DocumentManager {
    config: RagConfig,
    embedder: Embedder,
    store: Arc<VectorStore>,
    retriever: Retriever,
    documents: RwLock<HashMap<String, Document>>,
}

impl DocumentManager {
    /// Create a new [`DocumentManagerBuilder`].
    pub fn builder() -> DocumentManagerBuilder {
        DocumentManagerBuilder::default()
    }

    /// Return a reference to the configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the vector store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Return a reference to the retriever.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Upload a document, detecting its content type from `name`.
    ///
    /// See [`upload_document_as`](Self::upload_document_as).
    pub async fn upload_document(
        &self,
        name: &str,
        content: &str,
        metadata: DocumentMetadata,
    ) -> Result<DocumentSummary> {
        self.upload_document_as(name, content, ContentType::detect(name), metadata).await
    }

    /// Register, chunk, embed, and store a document.
    ///
    /// `content` is already-decoded text; PDF and Word sources must be
    /// parsed upstream.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ValidationError`] for an empty name or content, in
    /// which case nothing is registered. Any later failure is returned as is,
    /// and the document stays registered in [`DocumentStatus::Error`].
    /// Returns [`RagError::NotFound`] if the document is deleted before
    /// processing completes; chunks it stored are then removed.
    pub async fn upload_document_as(
        &self,
        name: &str,
        content: &str,
        content_type: ContentType,
        mut metadata: DocumentMetadata,
    ) -> Result<DocumentSummary> {
        if name.trim().is_empty() {
            return Err(RagError::ValidationError("document name is empty".to_string()));
        }
        if content.trim().is_empty() {
            return Err(RagError::ValidationError(format!("document '{name}' has no content")));
        }

        let id = Uuid::new_v4().to_string();
        metadata.title.get_or_insert_with(|| name.to_string());
        let document = Document {
            id: id.clone(),
            name: name.to_string(),
            content_type,
            status: DocumentStatus::Uploaded,
            size: content.len(),
            uploaded_at: Utc::now(),
            processed_at: None,
            chunk_ids: Vec::new(),
            error: None,
            metadata,
        };
        let tags = document.metadata.tags.clone();
        self.documents.write().await.insert(id.clone(), document);
        info!(document.id = %id, name, ?content_type, size = content.len(), "document uploaded");

        match self.process(&id, content, content_type, &tags).await {
            Ok(chunks) => {
                let chunk_count = chunks.len();
                let chunk_ids: Vec<String> = chunks.into_iter().map(|c| c.id).collect();
                let updated = self
                    .update(&id, |doc| {
                        doc.status = DocumentStatus::Ready;
                        doc.processed_at = Some(Utc::now());
                        doc.chunk_ids = chunk_ids;
                    })
                    .await;
                let summary = match updated {
                    Ok(summary) => summary,
                    Err(e) => {
                        self.discard_orphan(&id).await;
                        return Err(e);
                    }
                };
                info!(document.id = %id, chunk_count, "document ready");
                Ok(summary)
            }
            Err(e) => {
                error!(document.id = %id, error = %e, "document processing failed");
                let message = e.to_string();
                let updated = self
                    .update(&id, |doc| {
                        doc.status = DocumentStatus::Error;
                        doc.error = Some(message);
                    })
                    .await;
                if updated.is_err() {
                    self.discard_orphan(&id).await;
                }
                Err(e)
            }
        }
    }

    /// Remove chunks stored for a document deleted while it was processing.
    async fn discard_orphan(&self, id: &str) {
        warn!(document.id = %id, "document deleted during processing, discarding its chunks");
        if let Err(e) = self.store.delete_document(id).await {
            error!(document.id = %id, error = %e, "failed to discard orphaned chunks");
        }
    }

    async fn process(
        &self,
        id: &str,
        content: &str,
        content_type: ContentType,
        tags: &[String],
    ) -> Result<Vec<Chunk>> {
        self.transition(id, DocumentStatus::Parsing).await?;
        let strategy = self.strategy_for(content_type, content);
        let mut chunks = chunk_text(content, id, &self.config.chunk_options(strategy));
        for chunk in &mut chunks {
            for tag in tags {
                if !chunk.metadata.tags.contains(tag) {
                    chunk.metadata.tags.push(tag.clone());
                }
            }
        }
        debug!(document.id = id, ?strategy, chunk_count = chunks.len(), "document chunked");

        self.transition(id, DocumentStatus::Vectorizing).await?;
        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }

        self.store.store_chunks(id, &chunks).await?;
        Ok(chunks)
    }

    /// Configured strategy, or headings for markup and paragraphs otherwise.
    fn strategy_for(&self, content_type: ContentType, content: &str) -> ChunkStrategy {
        if let Some(strategy) = self.config.chunk_strategy {
            return strategy;
        }
        if content_type == ContentType::Markdown || content.trim_start().starts_with('#') {
            ChunkStrategy::Heading
        } else {
            ChunkStrategy::Paragraph
        }
    }

    async fn transition(&self, id: &str, next: DocumentStatus) -> Result<()> {
        self.update(id, |doc| {
            debug_assert!(doc.status.can_transition_to(next), "{:?} -> {next:?}", doc.status);
            debug!(document.id = %doc.id, from = ?doc.status, to = ?next, "status change");
            doc.status = next;
        })
        .await
        .map(|_| ())
    }

    /// Apply `f` to a registered document and return its new summary.
    ///
    /// Fails with `NotFound` when the document was deleted mid-upload.
    async fn update(&self, id: &str, f: impl FnOnce(&mut Document)) -> Result<DocumentSummary> {
        let mut documents = self.documents.write().await;
        let document = documents.get_mut(id).ok_or_else(|| RagError::document_not_found(id))?;
        f(document);
        Ok(document.summary())
    }

    /// Look up a document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] for unknown ids.
    pub async fn get_document(&self, id: &str) -> Result<DocumentSummary> {
        let documents = self.documents.read().await;
        documents.get(id).map(Document::summary).ok_or_else(|| RagError::document_not_found(id))
    }

    /// Every registered document, oldest first.
    pub async fn list_documents(&self) -> Vec<DocumentSummary> {
        let documents = self.documents.read().await;
        let mut summaries: Vec<DocumentSummary> =
            documents.values().map(Document::summary).collect();
        summaries.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Remove a document and its chunks.
    ///
    /// The document leaves the registry before its chunks are deleted, so an
    /// upload still in flight discards whatever it stores afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] for unknown ids, or the store's error
    /// if the persistent backend rejects the delete. In the latter case the
    /// document is registered again.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let removed = self.documents.write().await.remove(id);
        let document = removed.ok_or_else(|| RagError::document_not_found(id))?;
        if let Err(e) = self.store.delete_document(id).await {
            self.documents.write().await.insert(id.to_string(), document);
            return Err(e);
        }
        info!(document.id = %id, "document deleted");
        Ok(())
    }

    /// Vector retrieval, flattened for the request layer.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ValidationError`] for blank query text, and
    /// propagates embedding errors.
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        validate_query(text)?;
        let results = self.retriever.query(text, options).await?;
        Ok(self.respond(text, results).await)
    }

    /// Hybrid retrieval, flattened for the request layer.
    pub async fn hybrid_query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        validate_query(text)?;
        let results = self.retriever.hybrid_query(text, options).await?;
        Ok(self.respond(text, results).await)
    }

    async fn respond(&self, text: &str, results: Vec<QueryResult>) -> QueryResponse {
        let documents = self.documents.read().await;
        let hits: Vec<QueryHit> = results
            .into_iter()
            .map(|result| {
                let document_name = documents
                    .get(&result.chunk.document_id)
                    .map_or_else(|| "Unknown".to_string(), |d| d.name.clone());
                let metadata = result.chunk.metadata;
                QueryHit {
                    content: result.chunk.content,
                    score: result.score,
                    relevance: result.relevance,
                    document_id: result.chunk.document_id,
                    document_name,
                    chunk_id: result.chunk.id,
                    page_number: metadata.page_number,
                    chapter: metadata.chapter,
                    section: metadata.section,
                }
            })
            .collect();
        QueryResponse { query: text.to_string(), total_results: hits.len(), results: hits }
    }

    /// Document, chunk, and embedding counts from the vector store.
    pub async fn get_stats(&self) -> Result<KnowledgeStats> {
        let stats = self.store.stats().await?;
        Ok(KnowledgeStats {
            total_documents: stats.documents,
            total_chunks: stats.chunks,
            total_embeddings: stats.embeddings,
            backend: self.store.active_backend(),
            degraded: self.store.is_degraded(),
        })
    }
}

fn validate_query(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(RagError::ValidationError("query text is empty".to_string()));
    }
    Ok(())
}

impl std::fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentManager")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("retriever", &self.retriever)
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`DocumentManager`].
///
/// Only the embedding provider is required. The config defaults to
/// [`RagConfig::default`] and the store to [`VectorStore::in_memory`].
#[derive(Default)]
pub struct DocumentManagerBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<VectorStore>>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl DocumentManagerBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store, usually from [`VectorStore::connect`].
    pub fn vector_store(mut self, store: Arc<VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set an optional reranker for vector results.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Build the [`DocumentManager`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if no embedding provider is set.
    pub fn build(self) -> Result<DocumentManager> {
        let config = self.config.unwrap_or_default();
        let provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let store = self.vector_store.unwrap_or_else(|| Arc::new(VectorStore::in_memory()));
        let embedder = Embedder::new(provider)
            .with_batch_size(config.embed_batch_size)
            .with_timeout(config.embed_timeout);

        let mut retriever = Retriever::new(embedder.clone(), store.clone(), &config);
        if let Some(reranker) = self.reranker {
            retriever = retriever.with_reranker(reranker);
        }

        Ok(DocumentManager {
            config,
            embedder,
            store,
            retriever,
            documents: RwLock::new(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::document::Relevance;

    /// Embeds by keyword so tests can predict similarity.
    #[derive(Default)]
    struct TopicProvider {
        fail: AtomicBool,
    }

    #[async_trait]
    impl EmbeddingProvider for TopicProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(RagError::ProviderError {
                    provider: "topic".into(),
                    message: "quota exceeded".into(),
                });
            }
            let lower = text.to_lowercase();
            Ok(vec![
                if lower.contains("mendel") { 1.0 } else { 0.0 },
                if lower.contains("linkage") { 1.0 } else { 0.0 },
                0.1,
            ])
        }

        fn dimensions(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "topic"
        }
    }

    fn manager(provider: Arc<TopicProvider>) -> DocumentManager {
        let config = RagConfig::builder().similarity_threshold(0.5).build().unwrap();
        DocumentManager::builder().config(config).embedding_provider(provider).build().unwrap()
    }

    const GENETICS: &str = "# Ch1\nMendel's first law states X.\n\n# Ch2\nLinkage means Y.";

    #[tokio::test]
    async fn upload_reaches_ready_with_heading_chunks() {
        let manager = manager(Arc::new(TopicProvider::default()));
        let summary = manager
            .upload_document("genetics.txt", GENETICS, DocumentMetadata::default())
            .await
            .unwrap();

        assert_eq!(summary.status, DocumentStatus::Ready);
        assert_eq!(summary.chunk_count, 2);
        assert!(summary.processed_at.is_some());
        assert_eq!(summary.metadata.title.as_deref(), Some("genetics.txt"));

        let chunks = manager.store().get_chunks_by_document(&summary.id).await.unwrap();
        assert_eq!(chunks[0].metadata.chapter.as_deref(), Some("Ch1"));
        assert!(chunks[0].content.contains("Mendel's first law states X."));
        assert_eq!(chunks[1].metadata.chapter.as_deref(), Some("Ch2"));
        assert!(chunks[1].content.contains("Linkage means Y."));
    }

    #[tokio::test]
    async fn blank_content_is_rejected_before_registration() {
        let manager = manager(Arc::new(TopicProvider::default()));
        let err = manager
            .upload_document("empty.txt", "  \n\t ", DocumentMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ValidationError(_)));
        assert!(manager.list_documents().await.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_leaves_document_in_error() {
        let provider = Arc::new(TopicProvider::default());
        provider.fail.store(true, Ordering::SeqCst);
        let manager = manager(provider);

        let err = manager
            .upload_document("notes.txt", "Mendel bred peas.", DocumentMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ProviderError { .. }));

        let documents = manager.list_documents().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].status, DocumentStatus::Error);
        assert_eq!(documents[0].chunk_count, 0);
        assert!(documents[0].error.as_deref().is_some_and(|e| e.contains("quota exceeded")));
        assert_eq!(manager.get_stats().await.unwrap().total_chunks, 0);
    }

    #[tokio::test]
    async fn query_names_source_document() {
        let manager = manager(Arc::new(TopicProvider::default()));
        let doc = manager
            .upload_document("genetics.md", GENETICS, DocumentMetadata::default())
            .await
            .unwrap();

        let response = manager.query("Who was Mendel?", &QueryOptions::default()).await.unwrap();
        assert_eq!(response.total_results, 1);
        let hit = &response.results[0];
        assert_eq!(hit.document_id, doc.id);
        assert_eq!(hit.document_name, "genetics.md");
        assert_eq!(hit.chapter.as_deref(), Some("Ch1"));
        assert_eq!(hit.relevance, Relevance::High);
    }

    #[tokio::test]
    async fn tags_propagate_to_chunks() {
        let manager = manager(Arc::new(TopicProvider::default()));
        let metadata = DocumentMetadata { tags: vec!["biology".into()], ..Default::default() };
        let doc = manager.upload_document("g.md", GENETICS, metadata).await.unwrap();
        let chunks = manager.store().get_chunks_by_document(&doc.id).await.unwrap();
        assert!(chunks.iter().all(|c| c.metadata.tags == vec!["biology".to_string()]));
    }

    #[tokio::test]
    async fn delete_removes_document_and_chunks() {
        let manager = manager(Arc::new(TopicProvider::default()));
        let doc = manager
            .upload_document("genetics.md", GENETICS, DocumentMetadata::default())
            .await
            .unwrap();
        assert_eq!(manager.get_stats().await.unwrap().total_chunks, 2);

        manager.delete_document(&doc.id).await.unwrap();
        assert!(matches!(manager.get_document(&doc.id).await, Err(RagError::NotFound { .. })));
        assert_eq!(manager.get_stats().await.unwrap().total_documents, 0);
        assert!(matches!(
            manager.delete_document(&doc.id).await,
            Err(RagError::NotFound { kind: "document", .. })
        ));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let manager = manager(Arc::new(TopicProvider::default()));
        let err = manager.query("   ", &QueryOptions::default()).await.unwrap_err();
        assert!(matches!(err, RagError::ValidationError(_)));
    }

    #[test]
    fn builder_requires_provider() {
        assert!(matches!(DocumentManager::builder().build(), Err(RagError::ConfigError(_))));
    }
}
