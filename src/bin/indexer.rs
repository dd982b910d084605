// Grounding indexer
// Splits the local grounding documents into chunks and upserts their
// embeddings into Pinecone.
// Run with: cargo run --bin indexer [-- <directory>]

use std::path::PathBuf;

use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use parley::{
    chunking::{split_document, MAX_CHUNK_CHARS},
    cohere::{CohereEmbedder, InputType},
    config::PineconeConfig,
    error::Result,
    grounding::LocalDocuments,
    pinecone::PineconeIndex,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        error!("Indexing failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let dir: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GROUNDING_PATH").ok())
        .unwrap_or_else(|| "grounding".into())
        .into();

    let cfg = PineconeConfig::from_env()?;
    let embedder = CohereEmbedder::new(cfg.cohere_key.clone());
    let index = PineconeIndex::new(&cfg);

    info!(dir = %dir.display(), "Starting grounding indexer...");
    let docs = LocalDocuments::load(&dir).await?;

    let mut indexed = 0usize;
    let mut failed = 0usize;
    for doc in &docs {
        for chunk in split_document(doc, MAX_CHUNK_CHARS) {
            let upserted = match embedder.embed(&chunk.text, InputType::Document).await {
                Ok(embedding) => index.upsert_chunk(&chunk, embedding).await,
                Err(err) => Err(err),
            };
            match upserted {
                Ok(()) => indexed += 1,
                Err(err) => {
                    failed += 1;
                    error!(chunk_id = %chunk.chunk_id, error = %err, "Failed to index chunk");
                }
            }
        }
    }

    let total = index.vector_count().await.unwrap_or_default();
    info!(documents = docs.len(), indexed, failed, total, "Indexing finished");
    Ok(())
}
