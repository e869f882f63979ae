//! # Knowledge Base Example
//!
//! Uploads a structured genetics handout, walks it through the document
//! lifecycle, and queries it. The vector backend comes from the environment
//! (`RAG_PRIMARY_BACKEND`, `RAG_SECONDARY_BACKEND`); with nothing set, or with
//! the configured databases unreachable, the in-memory store is used.
//!
//! Uses `MockEmbeddingProvider` - **zero API keys**.
//!
//! Run: `cargo run -p kb-demos --example knowledge_base`
//! Verbose: `RUST_LOG=kb_rag=debug cargo run -p kb-demos --example knowledge_base`

use std::sync::Arc;

use kb_rag::{
    DocumentManager, DocumentMetadata, EmbeddingProvider, QueryOptions, RagConfig, Retriever,
    StoreConfig, VectorStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// MockEmbeddingProvider - bag-of-words hashing, so shared words mean
// similar vectors
// ---------------------------------------------------------------------------

struct MockEmbeddingProvider {
    dimensions: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> kb_rag::Result<Vec<f32>> {
        let mut emb = vec![0.0f32; self.dimensions];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| w.len() > 2) {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            emb[(hash % self.dimensions as u64) as usize] += 1.0;
        }
        let norm: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            emb.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(emb)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

const HANDOUT: &str = r#"# Mendelian Inheritance

## Law of Segregation

Each organism carries two alleles for every trait, and the alleles separate
during gamete formation so each gamete receives only one allele.

## Law of Independent Assortment

Alleles of different genes assort independently of one another during gamete
formation, provided the genes are on different chromosomes.

# Chromosomal Inheritance

## Gene Linkage

Genes located close together on the same chromosome tend to be inherited
together. Linkage breaks the law of independent assortment.

## Crossing Over

During meiosis homologous chromosomes exchange segments. The frequency of
crossing over between two genes is used to build genetic maps.
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // -- 1. Select a vector backend ---------------------------------------
    let store = Arc::new(VectorStore::connect(&StoreConfig::from_env()?).await);
    info!(backend = %store.active_backend(), "vector store ready");

    // -- 2. Build the manager ---------------------------------------------
    let config = RagConfig::builder()
        .chunk_size(400)
        .chunk_overlap(40)
        .top_k(3)
        .similarity_threshold(0.2)
        .build()?;
    let manager = DocumentManager::builder()
        .config(config)
        .embedding_provider(Arc::new(MockEmbeddingProvider { dimensions: 64 }))
        .vector_store(store)
        .build()?;

    // -- 3. Upload ----------------------------------------------------------
    let metadata = DocumentMetadata {
        author: Some("Genetics 101".into()),
        tags: vec!["genetics".into()],
        ..Default::default()
    };
    let doc = manager.upload_document("inheritance.md", HANDOUT, metadata).await?;
    println!("Uploaded '{}' ({:?}): {} chunks", doc.name, doc.status, doc.chunk_count);

    for chunk in manager.store().get_chunks_by_document(&doc.id).await? {
        println!(
            "  {} chapter={:?} section={:?}",
            chunk.id,
            chunk.metadata.chapter.as_deref().unwrap_or("-"),
            chunk.metadata.section.as_deref().unwrap_or("-"),
        );
    }

    // -- 4. Query -------------------------------------------------------------
    for question in ["How do alleles separate?", "What is gene linkage?"] {
        let response = manager.query(question, &QueryOptions::default()).await?;
        println!("\nQuery: \"{}\" ({} results)", response.query, response.total_results);
        for (i, hit) in response.results.iter().enumerate() {
            println!(
                "  {}. [score={:.3} {:?}] {} > {}",
                i + 1,
                hit.score,
                hit.relevance,
                hit.chapter.as_deref().unwrap_or("-"),
                hit.section.as_deref().unwrap_or("-"),
            );
        }
    }

    // -- 5. Context for a generator -------------------------------------------
    let results = manager
        .retriever()
        .query("crossing over during meiosis", &QueryOptions::default().with_top_k(2))
        .await?;
    println!("\nContext block:\n{}", Retriever::build_context(&results));

    // -- 6. Stats and cleanup ---------------------------------------------
    let stats = manager.get_stats().await?;
    println!(
        "\nStats: {} documents, {} chunks, {} embeddings (backend={}, degraded={})",
        stats.total_documents,
        stats.total_chunks,
        stats.total_embeddings,
        stats.backend,
        stats.degraded
    );

    manager.delete_document(&doc.id).await?;
    println!("Deleted '{}', {} documents remain", doc.name, manager.list_documents().await.len());
    Ok(())
}
