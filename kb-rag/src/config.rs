//! Configuration for the knowledge-base engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chunking::{ChunkOptions, ChunkStrategy};
use crate::embedding::DEFAULT_BATCH_SIZE;
use crate::error::{RagError, Result};
use crate::vectorstore::BackendKind;

/// Default embedding width used when `RAG_EMBEDDING_DIMENSIONS` is unset.
pub const DEFAULT_DIMENSIONS: usize = 1536;

/// Tuning parameters for chunking, embedding, and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Forced chunking strategy. `None` picks one from the content type.
    pub chunk_strategy: Option<ChunkStrategy>,
    /// Number of top results to return from vector search.
    pub top_k: usize,
    /// Minimum similarity score for results (inclusive).
    pub similarity_threshold: f32,
    /// Number of texts embedded concurrently per batch.
    pub embed_batch_size: usize,
    /// Per-call embedding timeout.
    #[serde(with = "optional_millis", default)]
    pub embed_timeout: Option<Duration>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunk_strategy: None,
            top_k: 5,
            similarity_threshold: 0.7,
            embed_batch_size: DEFAULT_BATCH_SIZE,
            embed_timeout: None,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Chunking options for `strategy` using this config's size and overlap.
    pub fn chunk_options(&self, strategy: ChunkStrategy) -> ChunkOptions {
        ChunkOptions { chunk_size: self.chunk_size, chunk_overlap: self.chunk_overlap, strategy }
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Force a chunking strategy for every document.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunk_strategy = Some(strategy);
        self
    }

    /// Set the number of top results to return from vector search.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the embedding batch size.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Fail embedding calls that take longer than `timeout`.
    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout = Some(timeout);
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embed_batch_size == 0`
    /// - `similarity_threshold` is outside `[-1, 1]`
    pub fn build(self) -> Result<RagConfig> {
        let config = self.config;
        if config.chunk_overlap >= config.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }
        if config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if config.embed_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&config.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be within [-1, 1]",
                config.similarity_threshold
            )));
        }
        Ok(config)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Connection settings for one vector backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendSpec {
    /// A Qdrant collection reached over gRPC.
    Qdrant { url: String, collection: String, dimensions: usize },
    /// A PostgreSQL table with the `vector` extension.
    PgVector { database_url: String, table: String, dimensions: usize },
    /// The process-local store.
    InMemory,
}

impl BackendSpec {
    /// The backend this spec connects to.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Qdrant { .. } => BackendKind::Qdrant,
            Self::PgVector { .. } => BackendKind::PgVector,
            Self::InMemory => BackendKind::InMemory,
        }
    }
}

/// Backend selection chain: `primary`, then `secondary`, then in-memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    pub primary: Option<BackendSpec>,
    pub secondary: Option<BackendSpec>,
}

impl StoreConfig {
    /// Read the chain from the process environment.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `RAG_PRIMARY_BACKEND` | `qdrant`, `pgvector` or `memory` |
    /// | `RAG_SECONDARY_BACKEND` | same values |
    /// | `QDRANT_URL` | defaults to `http://localhost:6334` |
    /// | `QDRANT_COLLECTION` | defaults to `knowledge_base` |
    /// | `DATABASE_URL` | required for `pgvector` |
    /// | `PGVECTOR_TABLE` | defaults to `knowledge_chunks` |
    /// | `RAG_EMBEDDING_DIMENSIONS` | defaults to 1536 |
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] for unknown backend names, a
    /// non-numeric dimension count, or `pgvector` without `DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let dimensions = match lookup("RAG_EMBEDDING_DIMENSIONS") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                RagError::ConfigError(format!("RAG_EMBEDDING_DIMENSIONS is not a number: {raw}"))
            })?,
            None => DEFAULT_DIMENSIONS,
        };
        let spec = |var: &str| -> Result<Option<BackendSpec>> {
            let Some(name) = lookup(var) else { return Ok(None) };
            let spec = match name.trim().to_ascii_lowercase().as_str() {
                "" => return Ok(None),
                "qdrant" => BackendSpec::Qdrant {
                    url: lookup("QDRANT_URL")
                        .unwrap_or_else(|| "http://localhost:6334".to_string()),
                    collection: lookup("QDRANT_COLLECTION")
                        .unwrap_or_else(|| "knowledge_base".to_string()),
                    dimensions,
                },
                "pgvector" | "postgres" => BackendSpec::PgVector {
                    database_url: lookup("DATABASE_URL").ok_or_else(|| {
                        RagError::ConfigError("DATABASE_URL is required for pgvector".to_string())
                    })?,
                    table: lookup("PGVECTOR_TABLE")
                        .unwrap_or_else(|| "knowledge_chunks".to_string()),
                    dimensions,
                },
                "memory" | "inmemory" => BackendSpec::InMemory,
                other => {
                    return Err(RagError::ConfigError(format!("{var}: unknown backend '{other}'")));
                }
            };
            Ok(Some(spec))
        };
        Ok(Self {
            primary: spec("RAG_PRIMARY_BACKEND")?,
            secondary: spec("RAG_SECONDARY_BACKEND")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_validate() {
        let config = RagConfig::builder().build().unwrap();
        assert_eq!(config, RagConfig::default());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.embed_batch_size, 20);
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::ConfigError(_)));
    }

    #[test]
    fn rejects_zero_top_k_batch_and_bad_threshold() {
        assert!(RagConfig::builder().top_k(0).build().is_err());
        assert!(RagConfig::builder().embed_batch_size(0).build().is_err());
        assert!(RagConfig::builder().similarity_threshold(1.5).build().is_err());
        assert!(RagConfig::builder().similarity_threshold(-1.0).build().is_ok());
    }

    #[test]
    fn chunk_options_carry_size_and_overlap() {
        let config = RagConfig::builder().chunk_size(300).chunk_overlap(30).build().unwrap();
        let options = config.chunk_options(ChunkStrategy::Sentence);
        assert_eq!(options.chunk_size, 300);
        assert_eq!(options.chunk_overlap, 30);
        assert_eq!(options.strategy, ChunkStrategy::Sentence);
    }

    #[test]
    fn empty_environment_selects_nothing() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn environment_builds_chain() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("RAG_PRIMARY_BACKEND", "Qdrant"),
            ("RAG_SECONDARY_BACKEND", "pgvector"),
            ("DATABASE_URL", "postgres://localhost/kb"),
            ("RAG_EMBEDDING_DIMENSIONS", "384"),
        ]))
        .unwrap();
        assert_eq!(
            config.primary,
            Some(BackendSpec::Qdrant {
                url: "http://localhost:6334".into(),
                collection: "knowledge_base".into(),
                dimensions: 384,
            })
        );
        assert_eq!(config.secondary.as_ref().map(BackendSpec::kind), Some(BackendKind::PgVector));
    }

    #[test]
    fn environment_errors() {
        let unknown = StoreConfig::from_lookup(lookup(&[("RAG_PRIMARY_BACKEND", "redis")]));
        assert!(matches!(unknown, Err(RagError::ConfigError(_))));

        let no_url = StoreConfig::from_lookup(lookup(&[("RAG_PRIMARY_BACKEND", "pgvector")]));
        assert!(matches!(no_url, Err(RagError::ConfigError(_))));

        let bad_dims = StoreConfig::from_lookup(lookup(&[("RAG_EMBEDDING_DIMENSIONS", "many")]));
        assert!(matches!(bad_dims, Err(RagError::ConfigError(_))));
    }
}
