//! Qdrant vector backend.
//!
//! Provides [`QdrantBackend`] which implements [`VectorBackend`] using the
//! [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Each chunk is one point. The point id is a UUIDv5 of the chunk id; the
//! payload carries the serialized chunk plus indexed `document_id`, `tags`
//! and `chapter` fields for filtering, and a `seq` stamp for tie-breaking.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::qdrant::QdrantBackend;
//!
//! let backend = QdrantBackend::connect("http://localhost:6334", "knowledge_base", 384).await?;
//! backend.store_chunks("doc-1", &chunks).await?;
//! ```

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, GetPointsBuilder, PointId, PointStruct,
    RetrievedPoint, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::debug;
use uuid::Uuid;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{BackendKind, SearchOptions, StoreStats, VectorBackend};

const SCROLL_PAGE: u32 = 256;
/// Extra points fetched per search so score ties straddling `top_k` are
/// ordered by insertion before truncation. Ties wider than this are cut by
/// Qdrant's own order.
const TIE_OVERFETCH: usize = 16;

/// A [`VectorBackend`] backed by a single [Qdrant](https://qdrant.tech/)
/// collection with cosine distance.
pub struct QdrantBackend {
    client: Qdrant,
    collection: String,
    dimensions: usize,
}

impl QdrantBackend {
    /// Connect and make sure the collection exists.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::BackendUnavailable`] if the server is unreachable
    /// or the collection cannot be created.
    pub async fn connect(url: &str, collection: &str, dimensions: usize) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(map_err)?;
        let backend = Self { client, collection: collection.to_string(), dimensions };
        backend.ensure_collection().await?;
        Ok(backend)
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await.map_err(map_err)? {
            debug!(collection = %self.collection, "qdrant collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimensions as u64, Distance::Cosine),
                ),
            )
            .await
            .map_err(map_err)?;
        for field in ["document_id", "tags", "chapter"] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    field,
                    FieldType::Keyword,
                ))
                .await
                .map_err(map_err)?;
        }

        debug!(
            collection = %self.collection,
            dimensions = self.dimensions,
            "created qdrant collection"
        );
        Ok(())
    }

    fn point_id(chunk_id: &str) -> PointId {
        PointId::from(Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string())
    }

    fn point(chunk: &Chunk, seq: i64) -> Result<PointStruct> {
        let Some(embedding) = &chunk.embedding else {
            return Err(RagError::ValidationError(format!(
                "chunk '{}' has no embedding; qdrant stores embedded chunks only",
                chunk.id
            )));
        };
        let serialized = serde_json::to_string(chunk)
            .map_err(|e| RagError::ValidationError(format!("chunk serialization failed: {e}")))?;
        let payload = Payload::try_from(serde_json::json!({
            "chunk": serialized,
            "document_id": chunk.document_id,
            "chunk_index": chunk.metadata.chunk_index,
            "chapter": chunk.metadata.chapter,
            "tags": chunk.metadata.tags,
            "seq": seq,
        }))
        .map_err(map_err)?;
        Ok(PointStruct::new(Self::point_id(&chunk.id), embedding.clone(), payload))
    }

    fn document_filter(document_id: &str) -> Filter {
        Filter::must([Condition::matches("document_id", document_id.to_string())])
    }

    fn search_filter(options: &SearchOptions) -> Option<Filter> {
        let mut conditions = Vec::new();
        if let Some(document_id) = &options.document_id {
            conditions.push(Condition::matches("document_id", document_id.clone()));
        }
        if !options.filter.tags.is_empty() {
            conditions.push(Condition::matches("tags", options.filter.tags.clone()));
        }
        if let Some(chapter) = &options.filter.chapter {
            conditions.push(Condition::matches("chapter", chapter.clone()));
        }
        (!conditions.is_empty()).then(|| Filter::must(conditions))
    }

    /// Every point matching `filter`, following scroll pagination.
    async fn scroll_all(&self, filter: Option<Filter>) -> Result<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(filter) = &filter {
                request = request.filter(filter.clone());
            }
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }
            let response = self.client.scroll(request).await.map_err(map_err)?;
            points.extend(response.result);
            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => return Ok(points),
            }
        }
    }
}

fn map_err(e: qdrant_client::QdrantError) -> RagError {
    RagError::BackendUnavailable {
        backend: BackendKind::Qdrant.to_string(),
        message: e.to_string(),
    }
}

fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn payload_seq(payload: &HashMap<String, QdrantValue>) -> i64 {
    match payload.get("seq").and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => *n,
        Some(Kind::DoubleValue(n)) => *n as i64,
        _ => 0,
    }
}

/// Order by score, then insertion stamp, then chunk index, and keep `top_k`.
fn rank_hits(mut hits: Vec<(i64, SearchResult)>, top_k: usize) -> Vec<SearchResult> {
    hits.sort_by(|(seq_a, a), (seq_b, b)| {
        b.score
            .total_cmp(&a.score)
            .then(seq_a.cmp(seq_b))
            .then(a.chunk.metadata.chunk_index.cmp(&b.chunk.metadata.chunk_index))
    });
    hits.into_iter().take(top_k).map(|(_, hit)| hit).collect()
}

fn decode_chunk(payload: &HashMap<String, QdrantValue>) -> Result<Chunk> {
    let raw = payload_string(payload, "chunk").ok_or_else(|| RagError::BackendUnavailable {
        backend: BackendKind::Qdrant.to_string(),
        message: "point payload has no chunk".to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| RagError::BackendUnavailable {
        backend: BackendKind::Qdrant.to_string(),
        message: format!("malformed chunk payload: {e}"),
    })
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Qdrant
    }

    async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let seq = chrono::Utc::now().timestamp_micros();
        let points =
            chunks.iter().map(|chunk| Self::point(chunk, seq)).collect::<Result<Vec<_>>>()?;

        self.delete_document(document_id).await?;
        if !points.is_empty() {
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                .await
                .map_err(map_err)?;
        }

        debug!(document.id = document_id, count = chunks.len(), "stored chunks in qdrant");
        Ok(())
    }

    async fn chunks_by_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let points = self.scroll_all(Some(Self::document_filter(document_id))).await?;
        let mut chunks =
            points.iter().map(|p| decode_chunk(&p.payload)).collect::<Result<Vec<_>>>()?;
        chunks.sort_by_key(|c| c.metadata.chunk_index);
        Ok(chunks)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection, vec![Self::point_id(chunk_id)])
                    .with_payload(true),
            )
            .await
            .map_err(map_err)?;
        response.result.first().map(|p| decode_chunk(&p.payload)).transpose()
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        if self.dimensions != 0 && query.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let limit = options.top_k.saturating_add(TIE_OVERFETCH) as u64;
        let mut request = SearchPointsBuilder::new(&self.collection, query.to_vec(), limit)
            .score_threshold(options.threshold)
            .with_payload(true);
        if let Some(filter) = Self::search_filter(options) {
            request = request.filter(filter);
        }
        let response = self.client.search_points(request).await.map_err(map_err)?;

        let hits = response
            .result
            .iter()
            .map(|scored| {
                let chunk = decode_chunk(&scored.payload)?;
                Ok((payload_seq(&scored.payload), SearchResult { chunk, score: scored.score }))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rank_hits(hits, options.top_k))
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(Self::document_filter(document_id))
                    .wait(true),
            )
            .await
            .map_err(map_err)?;
        debug!(document.id = document_id, "deleted document from qdrant");
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let count = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(map_err)?
            .result
            .map_or(0, |r| r.count as usize);
        let points = self.scroll_all(None).await?;
        let documents: HashSet<String> =
            points.iter().filter_map(|p| payload_string(&p.payload, "document_id")).collect();
        Ok(StoreStats { documents: documents.len(), chunks: count, embeddings: count })
    }

    async fn clear(&self) -> Result<()> {
        self.client.delete_collection(&self.collection).await.map_err(map_err)?;
        self.ensure_collection().await
    }
}
