//! Query-time retrieval: vector search, keyword search, and hybrid fusion.
//!
//! The vector path embeds the query and asks the [`VectorStore`] for the
//! nearest chunks. The keyword path scores the chunks of one document by
//! term overlap. [`Retriever::hybrid_query`] merges both by chunk id with
//! weights [`VECTOR_WEIGHT`] and [`KEYWORD_WEIGHT`].
//!
//! Keyword scoring needs a document id. Without one there is no corpus to
//! scan, so an unscoped hybrid query returns the vector results reweighted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::document::{Chunk, ChunkMetadata, QueryResult, Relevance};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::reranker::Reranker;
use crate::vectorstore::{SearchFilter, SearchOptions, VectorStore};

/// Weight of the vector score in a fused hybrid score.
pub const VECTOR_WEIGHT: f32 = 0.7;
/// Weight of the keyword score in a fused hybrid score.
pub const KEYWORD_WEIGHT: f32 = 0.3;

/// Per-query overrides. Unset fields fall back to the retriever defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Restrict retrieval to one document. Required for keyword scoring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default)]
    pub filter: SearchFilter,
}

impl QueryOptions {
    /// Restrict retrieval to one document.
    pub fn for_document(document_id: impl Into<String>) -> Self {
        Self { document_id: Some(document_id.into()), ..Default::default() }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Turns query text into ranked [`QueryResult`]s.
pub struct Retriever {
    embedder: Embedder,
    store: Arc<VectorStore>,
    reranker: Option<Arc<dyn Reranker>>,
    top_k: usize,
    threshold: f32,
}

impl Retriever {
    /// Create a retriever using `config`'s `top_k` and similarity threshold.
    pub fn new(embedder: Embedder, store: Arc<VectorStore>, config: &RagConfig) -> Self {
        Self {
            embedder,
            store,
            reranker: None,
            top_k: config.top_k,
            threshold: config.similarity_threshold,
        }
    }

    /// Rerank vector results before the threshold is applied.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    fn search_options(&self, options: &QueryOptions) -> SearchOptions {
        SearchOptions {
            top_k: options.top_k.unwrap_or(self.top_k),
            threshold: options.threshold.unwrap_or(self.threshold),
            document_id: options.document_id.clone(),
            filter: options.filter.clone(),
        }
    }

    /// Pure vector retrieval.
    ///
    /// Embeds `text`, searches the store, applies the reranker if any, and
    /// keeps hits scoring at least the threshold, best first.
    ///
    /// # Errors
    ///
    /// Propagates embedding failures and
    /// [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)
    /// when the query vector does not match the stored vectors.
    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<Vec<QueryResult>> {
        let search = self.search_options(options);
        let embedding = self.embedder.embed(text).await?;
        let hits = self.store.similarity_search(&embedding, &search).await?;
        let mut results: Vec<QueryResult> = hits.into_iter().map(QueryResult::from).collect();

        if let Some(reranker) = &self.reranker {
            match reranker.rerank(text, results.clone()).await {
                Ok(reranked) => {
                    results = reranked
                        .into_iter()
                        .filter(|r| r.score >= search.threshold)
                        .map(|mut r| {
                            r.relevance = Relevance::from_score(r.score);
                            r
                        })
                        .collect();
                    results.truncate(search.top_k);
                }
                Err(e) => warn!(error = %e, "reranking failed, keeping vector order"),
            }
        }

        debug!(result_count = results.len(), "vector query completed");
        Ok(results)
    }

    /// Score the chunks of `options.document_id` by term overlap with `text`.
    ///
    /// Returns nothing when no document id is given. Results are sorted by
    /// score with ties in document order, and are not truncated.
    pub async fn keyword_search(
        &self,
        text: &str,
        options: &QueryOptions,
    ) -> Result<Vec<QueryResult>> {
        let Some(document_id) = &options.document_id else {
            return Ok(Vec::new());
        };
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.store.get_chunks_by_document(document_id).await?;
        let mut results: Vec<QueryResult> = chunks
            .into_iter()
            .filter(|chunk| options.filter.matches(chunk))
            .filter_map(|chunk| {
                let score = keyword_score(&terms, &chunk);
                (score > 0.0).then(|| QueryResult {
                    relevance: Relevance::from_score(score),
                    chunk,
                    score,
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }

    /// Vector and keyword retrieval fused with [`fuse`].
    pub async fn hybrid_query(
        &self,
        text: &str,
        options: &QueryOptions,
    ) -> Result<Vec<QueryResult>> {
        let vector = self.query(text, options).await?;
        let keyword = self.keyword_search(text, options).await?;
        let top_k = options.top_k.unwrap_or(self.top_k);
        info!(
            vector_hits = vector.len(),
            keyword_hits = keyword.len(),
            "hybrid query completed"
        );
        Ok(fuse(vector, keyword, top_k))
    }

    /// Render results as a numbered, source-attributed context block.
    ///
    /// Each entry is headed `[Source N: chapter - section]`, or
    /// `[Source N: document ID]` when the chunk has no chapter. Entries are
    /// separated by `---` lines.
    pub fn build_context(results: &[QueryResult]) -> String {
        results
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let metadata = &result.chunk.metadata;
                let source = match &metadata.chapter {
                    Some(chapter) => {
                        format!("{chapter} - {}", metadata.section.as_deref().unwrap_or(""))
                    }
                    None => format!("document {}", result.chunk.document_id),
                };
                format!("[Source {}: {source}]\n{}", i + 1, result.chunk.content)
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder)
            .field("reranker", &self.reranker.is_some())
            .field("top_k", &self.top_k)
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Merge vector and keyword hits by chunk id.
///
/// A chunk's fused score is `0.7 * vector + 0.3 * keyword`, with a missing
/// side contributing zero. The relevance tier comes from the better of the
/// two raw scores. Ties keep first-seen order, vector hits first.
pub fn fuse(vector: Vec<QueryResult>, keyword: Vec<QueryResult>, top_k: usize) -> Vec<QueryResult> {
    let mut fused: Vec<(QueryResult, f32)> = Vec::with_capacity(vector.len() + keyword.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    let weighted = vector
        .into_iter()
        .map(|r| (r, VECTOR_WEIGHT))
        .chain(keyword.into_iter().map(|r| (r, KEYWORD_WEIGHT)));
    for (result, weight) in weighted {
        let contribution = result.score * weight;
        match positions.get(&result.chunk.id) {
            Some(&pos) => {
                let (entry, best_raw) = &mut fused[pos];
                entry.score += contribution;
                *best_raw = best_raw.max(result.score);
            }
            None => {
                positions.insert(result.chunk.id.clone(), fused.len());
                let raw = result.score;
                fused.push((QueryResult { score: contribution, ..result }, raw));
            }
        }
    }

    let mut results: Vec<QueryResult> = fused
        .into_iter()
        .map(|(mut result, best_raw)| {
            result.relevance = Relevance::from_score(best_raw);
            result
        })
        .collect();
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);
    results
}

/// Lowercased words of `text`, split on anything that is not alphanumeric.
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

/// Distinct lowercased query words of at least two characters.
fn query_terms(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = HashSet::new();
    words(&lowered)
        .filter(|term| term.chars().count() >= 2)
        .filter(|term| seen.insert(*term))
        .map(str::to_string)
        .collect()
}

/// Term-overlap score in `[0, 1]`.
///
/// Per term: 2 for every whole-word occurrence, 0.5 for every occurrence
/// inside a longer word, plus 1 when the term occurs in a heading or tag.
/// The sum is divided by `3 * terms.len()` and capped at 1.
fn keyword_score(terms: &[String], chunk: &Chunk) -> f32 {
    let content = chunk.content.to_lowercase();
    let mut word_counts: HashMap<&str, usize> = HashMap::new();
    for word in words(&content) {
        *word_counts.entry(word).or_default() += 1;
    }
    let metadata = metadata_text(&chunk.metadata);

    let total: f32 = terms
        .iter()
        .map(|term| {
            let whole = word_counts.get(term.as_str()).copied().unwrap_or(0);
            let partial = content.matches(term.as_str()).count().saturating_sub(whole);
            let mut points = 2.0 * whole as f32 + 0.5 * partial as f32;
            if metadata.contains(term.as_str()) {
                points += 1.0;
            }
            points
        })
        .sum();
    (total / (terms.len() as f32 * 3.0)).min(1.0)
}

/// Lowercased heading and tag values of a chunk.
fn metadata_text(metadata: &ChunkMetadata) -> String {
    [&metadata.chapter, &metadata.section, &metadata.subsection]
        .into_iter()
        .flatten()
        .chain(&metadata.tags)
        .map(|value| value.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
