//! End-to-end tests for upload, retrieval, fusion, and store fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kb_rag::{
    BackendKind, Chunk, ChunkMetadata, DocumentManager, DocumentMetadata, DocumentStatus,
    EmbeddingProvider, KEYWORD_WEIGHT, QueryOptions, QueryResult, RagConfig, RagError, Relevance,
    Result, SearchOptions, SearchResult, StoreStats, VECTOR_WEIGHT, VectorBackend, VectorStore,
    fuse,
};
use proptest::prelude::*;

/// One axis per topic, plus a small constant so no vector is zero.
struct TopicProvider;

#[async_trait]
impl EmbeddingProvider for TopicProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.to_lowercase();
        let axis = |word: &str| if text.contains(word) { 1.0 } else { 0.0 };
        Ok(vec![axis("mendel"), axis("linkage"), 0.1])
    }

    fn dimensions(&self) -> usize {
        3
    }
}

/// Fails on any text containing "poison".
struct PoisonProvider;

#[async_trait]
impl EmbeddingProvider for PoisonProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.contains("poison") {
            return Err(RagError::ProviderError {
                provider: self.name().to_string(),
                message: "rejected input".to_string(),
            });
        }
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn name(&self) -> &str {
        "poison"
    }
}

/// Takes 200ms per embedding.
struct SlowProvider;

#[async_trait]
impl EmbeddingProvider for SlowProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(vec![1.0, 0.0])
    }

    fn dimensions(&self) -> usize {
        2
    }
}

/// A persistent backend whose every call fails.
struct UnreachableBackend;

impl UnreachableBackend {
    fn error<T>() -> Result<T> {
        Err(RagError::BackendUnavailable {
            backend: "qdrant".to_string(),
            message: "connection refused".to_string(),
        })
    }
}

#[async_trait]
impl VectorBackend for UnreachableBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Qdrant
    }

    async fn store_chunks(&self, _document_id: &str, _chunks: &[Chunk]) -> Result<()> {
        Self::error()
    }

    async fn chunks_by_document(&self, _document_id: &str) -> Result<Vec<Chunk>> {
        Self::error()
    }

    async fn get_chunk(&self, _chunk_id: &str) -> Result<Option<Chunk>> {
        Self::error()
    }

    async fn similarity_search(
        &self,
        _query: &[f32],
        _options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        Self::error()
    }

    async fn delete_document(&self, _document_id: &str) -> Result<()> {
        Self::error()
    }

    async fn stats(&self) -> Result<StoreStats> {
        Self::error()
    }

    async fn clear(&self) -> Result<()> {
        Self::error()
    }
}

const NOTES: &str = "Mendel crossed pea plants to study inheritance.\n\n\
Gene linkage keeps nearby genes together during meiosis.\n\n\
Cells divide by mitosis.";

fn manager_with(config: RagConfig, provider: Arc<dyn EmbeddingProvider>) -> DocumentManager {
    DocumentManager::builder().config(config).embedding_provider(provider).build().unwrap()
}

fn small_chunks() -> RagConfig {
    RagConfig::builder().chunk_size(20).chunk_overlap(0).build().unwrap()
}

#[tokio::test]
async fn exact_match_is_high_relevance() {
    let manager = manager_with(RagConfig::default(), Arc::new(PoisonProvider));
    let doc = manager
        .upload_document("exact.txt", "anything at all", DocumentMetadata::default())
        .await
        .unwrap();

    let results = manager
        .retriever()
        .query("the query", &QueryOptions::default().with_threshold(0.5))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.document_id, doc.id);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert_eq!(results[0].relevance, Relevance::High);
}

#[tokio::test]
async fn upload_query_and_delete() {
    let manager = manager_with(small_chunks(), Arc::new(TopicProvider));
    let metadata = DocumentMetadata { tags: vec!["genetics".into()], ..Default::default() };
    let doc = manager.upload_document("notes.txt", NOTES, metadata).await.unwrap();

    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.chunk_count, 3);
    assert!(doc.processed_at.is_some());
    assert_eq!(doc.metadata.title.as_deref(), Some("notes.txt"));

    let chunks = manager.store().get_chunks_by_document(&doc.id).await.unwrap();
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.embedding.is_some()));
    assert!(chunks.iter().all(|c| c.metadata.tags == vec!["genetics".to_string()]));

    let response = manager.query("gene linkage", &QueryOptions::default()).await.unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].document_name, "notes.txt");
    assert!(response.results[0].content.contains("linkage"));

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.total_documents, 1);
    assert_eq!(stats.total_chunks, 3);
    assert_eq!(stats.total_embeddings, 3);
    assert_eq!(stats.backend, BackendKind::InMemory);
    assert!(!stats.degraded);

    manager.delete_document(&doc.id).await.unwrap();
    assert!(matches!(manager.get_document(&doc.id).await, Err(RagError::NotFound { .. })));
    assert!(manager.store().get_chunks_by_document(&doc.id).await.unwrap().is_empty());
    assert!(matches!(manager.delete_document(&doc.id).await, Err(RagError::NotFound { .. })));
}

#[tokio::test]
async fn failed_embedding_leaves_document_in_error() {
    let config =
        RagConfig::builder().chunk_size(10).chunk_overlap(0).embed_batch_size(2).build().unwrap();
    let manager = manager_with(config, Arc::new(PoisonProvider));
    let content = "first paragraph\n\nsecond paragraph\n\nthird paragraph\n\n\
                   poison paragraph\n\nfifth paragraph";

    let err = manager
        .upload_document("bad.txt", content, DocumentMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::ProviderError { .. }));

    let documents = manager.list_documents().await;
    assert_eq!(documents.len(), 1);
    let doc = &documents[0];
    assert_eq!(doc.status, DocumentStatus::Error);
    assert_eq!(doc.chunk_count, 0);
    assert!(doc.error.as_deref().is_some_and(|e| e.contains("rejected input")));
    assert!(manager.store().get_chunks_by_document(&doc.id).await.unwrap().is_empty());
    assert_eq!(manager.get_stats().await.unwrap().total_chunks, 0);
}

#[tokio::test]
async fn blank_inputs_are_rejected() {
    let manager = manager_with(RagConfig::default(), Arc::new(TopicProvider));

    let err = manager.upload_document("empty.txt", "  \n", DocumentMetadata::default()).await;
    assert!(matches!(err, Err(RagError::ValidationError(_))));
    assert!(manager.list_documents().await.is_empty());

    let err = manager.query("   ", &QueryOptions::default()).await;
    assert!(matches!(err, Err(RagError::ValidationError(_))));
}

#[tokio::test]
async fn keyword_search_requires_a_document() {
    let manager = manager_with(small_chunks(), Arc::new(TopicProvider));
    let doc =
        manager.upload_document("notes.txt", NOTES, DocumentMetadata::default()).await.unwrap();
    let retriever = manager.retriever();

    let unscoped = retriever.keyword_search("mitosis", &QueryOptions::default()).await.unwrap();
    assert!(unscoped.is_empty());

    let scoped = QueryOptions::for_document(doc.id.clone());
    let hits = retriever.keyword_search("mitosis", &scoped).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].chunk.content.contains("mitosis"));
}

#[tokio::test]
async fn unscoped_hybrid_weights_vector_scores() {
    let manager = manager_with(small_chunks(), Arc::new(TopicProvider));
    manager.upload_document("notes.txt", NOTES, DocumentMetadata::default()).await.unwrap();
    let retriever = manager.retriever();

    let vector = retriever.query("Mendel", &QueryOptions::default()).await.unwrap();
    let hybrid = retriever.hybrid_query("Mendel", &QueryOptions::default()).await.unwrap();

    assert_eq!(vector.len(), hybrid.len());
    for (v, h) in vector.iter().zip(&hybrid) {
        assert_eq!(v.chunk.id, h.chunk.id);
        assert!((h.score - VECTOR_WEIGHT * v.score).abs() < 1e-6);
        assert_eq!(h.relevance, v.relevance);
    }
}

#[tokio::test]
async fn scoped_hybrid_boosts_keyword_matches() {
    let manager = manager_with(small_chunks(), Arc::new(TopicProvider));
    let doc =
        manager.upload_document("notes.txt", NOTES, DocumentMetadata::default()).await.unwrap();
    let options = QueryOptions::for_document(doc.id.clone());

    let response = manager.hybrid_query("linkage genes", &options).await.unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results[0].content.contains("linkage"));
    assert!(response.results[0].score > VECTOR_WEIGHT * 0.99);
}

#[tokio::test]
async fn unreachable_backend_degrades_to_memory() {
    let store = Arc::new(VectorStore::with_backend(Arc::new(UnreachableBackend)));
    let manager = DocumentManager::builder()
        .config(small_chunks())
        .embedding_provider(Arc::new(TopicProvider))
        .vector_store(store.clone())
        .build()
        .unwrap();

    let doc =
        manager.upload_document("notes.txt", NOTES, DocumentMetadata::default()).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert!(store.is_degraded());

    let response = manager.query("Mendel", &QueryOptions::default()).await.unwrap();
    assert_eq!(response.total_results, 1);
    assert!(response.results[0].content.contains("Mendel"));

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.backend, BackendKind::Qdrant);
    assert!(stats.degraded);
    assert_eq!(stats.total_chunks, 3);

    assert!(matches!(
        manager.delete_document(&doc.id).await,
        Err(RagError::BackendUnavailable { .. })
    ));
    assert!(manager.get_document(&doc.id).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn delete_during_upload_discards_stored_chunks() {
    let manager = Arc::new(manager_with(small_chunks(), Arc::new(SlowProvider)));
    let upload = tokio::spawn({
        let manager = manager.clone();
        let metadata = DocumentMetadata::default();
        async move { manager.upload_document("notes.txt", NOTES, metadata).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let pending = manager.list_documents().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, DocumentStatus::Vectorizing);
    manager.delete_document(&pending[0].id).await.unwrap();

    assert!(matches!(upload.await.unwrap(), Err(RagError::NotFound { .. })));
    assert!(manager.list_documents().await.is_empty());
    assert_eq!(manager.store().stats().await.unwrap(), StoreStats::default());
}

#[tokio::test]
async fn concurrent_uploads_all_become_ready() {
    let manager = Arc::new(manager_with(small_chunks(), Arc::new(TopicProvider)));
    let uploads = (0..8).map(|n| {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .upload_document(&format!("notes-{n}.txt"), NOTES, DocumentMetadata::default())
                .await
        })
    });

    for handle in futures::future::join_all(uploads).await {
        let doc = handle.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Ready);
    }
    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.total_documents, 8);
    assert_eq!(stats.total_chunks, 24);
}

fn result(id: &str, score: f32) -> QueryResult {
    QueryResult {
        chunk: Chunk::new(id, id, ChunkMetadata::default(), 0),
        score,
        relevance: Relevance::from_score(score),
    }
}

mod prop_fusion {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn fused_score_weights_both_sides(v in 0.0f32..=1.0, k in 0.0f32..=1.0) {
            let fused = fuse(vec![result("both", v)], vec![result("both", k)], 5);
            prop_assert_eq!(fused.len(), 1);
            let expected = VECTOR_WEIGHT * v + KEYWORD_WEIGHT * k;
            prop_assert!((fused[0].score - expected).abs() < 1e-6);
            prop_assert_eq!(fused[0].relevance, Relevance::from_score(v.max(k)));
        }

        #[test]
        fn one_sided_hits_are_scaled(v in 0.0f32..=1.0, k in 0.0f32..=1.0) {
            let fused = fuse(vec![result("vec", v)], vec![result("kw", k)], 5);
            prop_assert_eq!(fused.len(), 2);
            for hit in &fused {
                let expected = if hit.chunk.id.starts_with("vec") {
                    VECTOR_WEIGHT * v
                } else {
                    KEYWORD_WEIGHT * k
                };
                prop_assert!((hit.score - expected).abs() < 1e-6);
            }
        }

        #[test]
        fn fused_results_sorted_and_bounded(
            vector in proptest::collection::vec(0.0f32..=1.0, 0..10),
            keyword in proptest::collection::vec(0.0f32..=1.0, 0..10),
            top_k in 1usize..12,
        ) {
            let vector: Vec<_> =
                vector.iter().enumerate().map(|(i, s)| result(&format!("c{i}"), *s)).collect();
            let keyword: Vec<_> =
                keyword.iter().enumerate().map(|(i, s)| result(&format!("c{i}"), *s)).collect();
            let distinct = vector.len().max(keyword.len());

            let fused = fuse(vector, keyword, top_k);
            prop_assert_eq!(fused.len(), distinct.min(top_k));
            for pair in fused.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
