//! Reranker trait for re-scoring retrieval hits.

use async_trait::async_trait;

use crate::document::QueryResult;
use crate::error::Result;

/// A reranker that re-scores and reorders query results.
///
/// Implementations can call cross-encoder models or hosted rerank APIs to
/// improve precision beyond the initial vector similarity. The
/// [`Retriever`](crate::Retriever) re-derives relevance tiers and re-applies
/// the similarity threshold to whatever scores the reranker returns.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank results given the original query text.
    async fn rerank(&self, query: &str, results: Vec<QueryResult>) -> Result<Vec<QueryResult>>;
}

/// A reranker that returns results unchanged.
///
/// # Example
///
/// ```rust,ignore
/// use kb_rag::NoOpReranker;
///
/// let reranked = NoOpReranker.rerank("query", results).await?;
/// // same order, same scores
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    async fn rerank(&self, _query: &str, results: Vec<QueryResult>) -> Result<Vec<QueryResult>> {
        Ok(results)
    }
}
