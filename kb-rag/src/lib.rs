//! # kb-rag
//!
//! Document indexing and retrieval engine for retrieval-augmented generation.
//!
//! ## Overview
//!
//! Raw text goes through a [`Chunker`], an [`Embedder`], and into a
//! [`VectorStore`]. Queries are embedded and answered by the [`Retriever`],
//! either by vector similarity alone or fused with keyword scoring. The
//! [`DocumentManager`] ties these together behind a document lifecycle.
//!
//! - [`ParagraphChunker`], [`HeadingChunker`], [`SentenceChunker`] - segmentation strategies
//! - [`Embedder`] - batched, timed-out, dimension-checked embedding
//! - [`VectorStore`] - backend chain with in-memory fallback
//! - [`Retriever`] - vector, keyword, and hybrid retrieval
//! - [`DocumentManager`] - upload, lifecycle, query, stats
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kb_rag::{DocumentManager, DocumentMetadata, QueryOptions, StoreConfig, VectorStore};
//!
//! let store = VectorStore::connect(&StoreConfig::from_env()?).await;
//! let manager = DocumentManager::builder()
//!     .embedding_provider(Arc::new(my_provider))
//!     .vector_store(Arc::new(store))
//!     .build()?;
//!
//! manager.upload_document("genetics.md", &text, DocumentMetadata::default()).await?;
//! let response = manager.query("What is linkage?", &QueryOptions::default()).await?;
//! ```
//!
//! ## Features
//!
//! | Feature | Enables |
//! |---------|---------|
//! | `qdrant` | [`qdrant::QdrantBackend`] over gRPC |
//! | `pgvector` | [`pgvector::PgVectorBackend`] over PostgreSQL |
//! | `openai` | [`openai::OpenAIEmbeddingProvider`] |
//! | `full` | all of the above |

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod manager;
pub mod reranker;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "pgvector")]
pub mod pgvector;
#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{
    ChunkOptions, ChunkStrategy, Chunker, HeadingChunker, ParagraphChunker, SentenceChunker,
    chunk_text,
};
pub use config::{BackendSpec, RagConfig, RagConfigBuilder, StoreConfig};
pub use document::{
    Chunk, ChunkMetadata, ContentType, Document, DocumentMetadata, DocumentStatus, DocumentSummary,
    QueryHit, QueryResponse, QueryResult, Relevance, SearchResult,
};
pub use embedding::{Embedder, EmbeddingProvider, cosine_similarity, euclidean_distance};
pub use error::{RagError, Result};
pub use inmemory::InMemoryBackend;
pub use manager::{DocumentManager, DocumentManagerBuilder, KnowledgeStats};
pub use reranker::{NoOpReranker, Reranker};
pub use retriever::{KEYWORD_WEIGHT, QueryOptions, Retriever, VECTOR_WEIGHT, fuse};
pub use vectorstore::{
    BackendKind, SearchFilter, SearchOptions, StoreStats, VectorBackend, VectorStore,
};

#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
#[cfg(feature = "pgvector")]
pub use pgvector::PgVectorBackend;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantBackend;
