//! Reference material injected into the system prompt.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::cohere::{CohereEmbedder, InputType};
use crate::config::{Config, GroundingSource};
use crate::error::{BotError, Result};
use crate::pinecone::PineconeIndex;
use crate::schema::GroundingDoc;

const TOP_K: usize = 5;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Documents relevant to `query`.
    async fn retrieve(&self, query: &str) -> Result<Vec<GroundingDoc>>;

    /// Refreshes the underlying corpus and returns how many documents it holds.
    async fn reload(&self) -> Result<usize>;
}

/// Builds the configured retriever, or `None` when grounding is off.
pub fn from_config(cfg: &Config) -> Option<Box<dyn Retriever>> {
    let grounding = cfg.grounding.as_ref()?;
    match grounding.source {
        GroundingSource::Local => Some(Box::new(LocalDocuments::new(grounding.path.clone()))),
        GroundingSource::Pinecone => {
            let pinecone = cfg.pinecone.as_ref()?;
            Some(Box::new(PineconeRetriever::new(
                CohereEmbedder::new(pinecone.cohere_key.clone()),
                PineconeIndex::new(pinecone),
            )))
        }
    }
}

/// Joins documents into the block appended to the system prompt.
pub fn format_context(docs: &[GroundingDoc]) -> String {
    docs.iter()
        .map(|doc| format!("Content of {}:\n{}", doc.source, doc.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads every text file in a directory. The whole corpus is returned as
/// context for every query.
pub struct LocalDocuments {
    dir: PathBuf,
    docs: RwLock<Vec<GroundingDoc>>,
}

impl LocalDocuments {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            docs: RwLock::new(Vec::new()),
        }
    }

    pub async fn load(dir: &std::path::Path) -> Result<Vec<GroundingDoc>> {
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|err| {
            BotError::Retrieval(format!("cannot read grounding dir {}: {err}", dir.display()))
        })?;

        let mut docs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_text = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "txt" | "md"));
            if !is_text || !entry.file_type().await?.is_file() {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => docs.push(GroundingDoc {
                    source: entry.file_name().to_string_lossy().into_owned(),
                    content,
                }),
                Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable grounding file"),
            }
        }
        docs.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(docs)
    }
}

#[async_trait]
impl Retriever for LocalDocuments {
    async fn retrieve(&self, _query: &str) -> Result<Vec<GroundingDoc>> {
        Ok(self.docs.read().await.clone())
    }

    async fn reload(&self) -> Result<usize> {
        let docs = Self::load(&self.dir).await?;
        let count = docs.len();
        *self.docs.write().await = docs;
        info!(count, dir = %self.dir.display(), "Grounding data loaded");
        Ok(count)
    }
}

/// Semantic search over chunks previously written by the `indexer` binary.
pub struct PineconeRetriever {
    embedder: CohereEmbedder,
    index: PineconeIndex,
}

impl PineconeRetriever {
    pub fn new(embedder: CohereEmbedder, index: PineconeIndex) -> Self {
        Self { embedder, index }
    }
}

#[async_trait]
impl Retriever for PineconeRetriever {
    async fn retrieve(&self, query: &str) -> Result<Vec<GroundingDoc>> {
        let embedding = self.embedder.embed(query, InputType::Query).await?;
        let matches = self.index.query(embedding, TOP_K).await?;
        Ok(matches
            .into_iter()
            .map(|m| GroundingDoc {
                source: m.source,
                content: m.text,
            })
            .collect())
    }

    async fn reload(&self) -> Result<usize> {
        let count = self.index.vector_count().await?;
        info!(count, "Pinecone namespace checked");
        Ok(count as usize)
    }
}
