//! Data types for documents, chunks, and query results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an uploaded [`Document`].
///
/// `Uploaded → Parsing → Vectorizing → Ready`, with `Error` reachable from
/// every step and absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Record created, nothing processed yet.
    Uploaded,
    /// Text is being split into chunks.
    Parsing,
    /// Chunks are being embedded and stored.
    Vectorizing,
    /// All chunks are embedded and searchable.
    Ready,
    /// Processing failed; see [`Document::error`].
    Error,
}

impl DocumentStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Uploaded, Parsing)
                | (Parsing, Vectorizing)
                | (Vectorizing, Ready)
                | (Uploaded | Parsing | Vectorizing, Error)
        )
    }
}

/// The kind of source a document's text was decoded from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain text.
    Text,
    /// Structured markup with `#` headings.
    Markdown,
    /// Text extracted from a PDF by an upstream parser.
    Pdf,
    /// Text extracted from a Word document by an upstream parser.
    Word,
}

impl ContentType {
    /// Guess the content type from a file name's extension.
    pub fn detect(name: &str) -> Self {
        let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("md" | "markdown") => Self::Markdown,
            Some("pdf") => Self::Pdf,
            Some("doc" | "docx") => Self::Word,
            _ => Self::Text,
        }
    }

    /// Whether the text was derived from a binary format.
    pub fn is_binary_derived(self) -> bool {
        matches!(self, Self::Pdf | Self::Word)
    }
}

/// Free-form descriptive metadata supplied at upload time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    /// Where the document came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The document's author.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Display title; defaults to the document name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tags copied onto every chunk of the document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// An uploaded document and the ids of the chunks it owns.
///
/// Chunk bodies and embeddings live in the vector store only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Opaque unique identifier.
    pub id: String,
    /// Display name, usually the original file name.
    pub name: String,
    /// Content-type tag.
    pub content_type: ContentType,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Raw size of the uploaded text in bytes.
    pub size: usize,
    /// When the document was uploaded.
    pub uploaded_at: DateTime<Utc>,
    /// When processing finished successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Ids of the chunks that were embedded and stored, in document order.
    #[serde(default)]
    pub chunk_ids: Vec<String>,
    /// Descriptive metadata.
    pub metadata: DocumentMetadata,
    /// Failure reason when `status` is [`DocumentStatus::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Document {
    /// Project the document into the summary handed to outside callers.
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            content_type: self.content_type,
            status: self.status,
            size: self.size,
            chunk_count: self.chunk_ids.len(),
            uploaded_at: self.uploaded_at,
            processed_at: self.processed_at,
            metadata: self.metadata.clone(),
            error: self.error.clone(),
        }
    }
}

/// The externally visible view of a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub content_type: ContentType,
    pub status: DocumentStatus,
    pub size: usize,
    pub chunk_count: usize,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub metadata: DocumentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Structural metadata attached to every [`Chunk`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// Nearest preceding level-1 heading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    /// Nearest preceding level-2 heading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Nearest preceding level-3 heading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsection: Option<String>,
    /// Level of the heading that opens this chunk, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_level: Option<u8>,
    /// Source page, when the upstream parser knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Free-form tags used by search filters.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Leading characters repeated from the previous chunk, separator included.
    #[serde(default)]
    pub overlap_chars: usize,
}

/// A segment of a [`Document`], the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// `{document_id}_chunk_{index}`.
    pub id: String,
    /// The ID of the owning [`Document`].
    pub document_id: String,
    /// The text content of the chunk.
    pub content: String,
    /// The embedding, absent until the embedder has run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create an un-embedded chunk with an id derived from its position.
    pub fn new(
        document_id: &str,
        content: impl Into<String>,
        mut metadata: ChunkMetadata,
        index: usize,
    ) -> Self {
        metadata.chunk_index = index;
        Self {
            id: Self::chunk_id(document_id, index),
            document_id: document_id.to_string(),
            content: content.into(),
            embedding: None,
            metadata,
        }
    }

    /// The stable id of the `index`-th chunk of a document.
    pub fn chunk_id(document_id: &str, index: usize) -> String {
        format!("{document_id}_chunk_{index}")
    }

    /// The part of the content that did not come from the previous chunk.
    pub fn fresh_content(&self) -> &str {
        match self.content.char_indices().nth(self.metadata.overlap_chars) {
            Some((pos, _)) => &self.content[pos..],
            None if self.metadata.overlap_chars == 0 => &self.content,
            None => "",
        }
    }
}

/// A stored [`Chunk`] paired with its cosine similarity to a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Similarity score (higher is more relevant).
    pub score: f32,
}

/// Coarse relevance bucket derived from a similarity score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Relevance {
    Low,
    Medium,
    High,
}

impl Relevance {
    /// `≥ 0.85` is high, `≥ 0.75` is medium, anything else is low.
    pub fn from_score(score: f32) -> Self {
        if score >= 0.85 {
            Self::High
        } else if score >= 0.75 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A ranked retrieval hit. Recomputed per query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub chunk: Chunk,
    pub score: f32,
    pub relevance: Relevance,
}

impl From<SearchResult> for QueryResult {
    fn from(result: SearchResult) -> Self {
        let relevance = Relevance::from_score(result.score);
        Self { chunk: result.chunk, score: result.score, relevance }
    }
}

/// One entry of a [`QueryResponse`], flattened for the request layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryHit {
    pub content: String,
    pub score: f32,
    pub relevance: Relevance,
    pub document_id: String,
    pub document_name: String,
    pub chunk_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// The answer to a knowledge-base query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub query: String,
    pub results: Vec<QueryHit>,
    pub total_results: usize,
}
