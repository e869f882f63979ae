//! # Hybrid Search Example
//!
//! Compares vector-only, keyword-only, and fused retrieval on one document.
//! Keyword scoring only runs when the query names a document, so the last
//! query shows an unscoped hybrid search falling back to vector results.
//!
//! Uses `MockEmbeddingProvider` and the in-memory store - **zero API keys**.
//!
//! Run: `cargo run -p kb-demos --example hybrid_search`

use std::sync::Arc;

use kb_rag::{
    ChunkStrategy, DocumentManager, DocumentMetadata, EmbeddingProvider, QueryOptions,
    QueryResult, RagConfig,
};
use tracing_subscriber::EnvFilter;

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
}

const NOTES: &str = "DNA replication is semi-conservative. Each new double helix keeps one \
original strand. Helicase unwinds the helix and DNA polymerase adds nucleotides. \
Transcription copies a gene into messenger RNA. Ribosomes translate the RNA into a \
protein. Mutations are changes in the DNA sequence. Some mutations are silent and some \
change the protein.";

fn print(label: &str, results: &[QueryResult]) {
    println!("{label}:");
    if results.is_empty() {
        println!("  (no results)");
    }
    for result in results {
        let preview: String = result.chunk.content.chars().take(60).collect();
        println!("  [{:.3} {:?}] {preview}", result.score, result.relevance);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let config = RagConfig::builder()
        .chunk_size(120)
        .chunk_overlap(20)
        .chunk_strategy(ChunkStrategy::Sentence)
        .top_k(4)
        .similarity_threshold(0.1)
        .build()?;
    let manager = DocumentManager::builder()
        .config(config)
        .embedding_provider(Arc::new(MockEmbeddingProvider { dimensions: 128 }))
        .build()?;

    let doc = manager.upload_document("molecular.txt", NOTES, DocumentMetadata::default()).await?;
    println!("Uploaded {} chunks\n", doc.chunk_count);

    let retriever = manager.retriever();
    let scoped = QueryOptions::for_document(doc.id.clone());
    let query = "DNA polymerase";

    print("Vector", &retriever.query(query, &scoped).await?);
    print("Keyword", &retriever.keyword_search(query, &scoped).await?);
    print("Hybrid", &retriever.hybrid_query(query, &scoped).await?);
    print("Hybrid (unscoped)", &retriever.hybrid_query(query, &QueryOptions::default()).await?);

    let response = manager.hybrid_query("protein mutations", &scoped).await?;
    println!("\nRequest-layer view of \"{}\":", response.query);
    for hit in &response.results {
        println!("  {} from '{}' score={:.3}", hit.chunk_id, hit.document_name, hit.score);
    }
    Ok(())
}
