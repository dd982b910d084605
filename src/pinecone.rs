use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

use crate::config::PineconeConfig;
use crate::error::{BotError, Result};
use crate::schema::{DocumentChunk, QueryResult};

#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    api_key: String,
    host: String,
    namespace: String,
}

impl PineconeIndex {
    pub fn new(cfg: &PineconeConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: cfg.pinecone_key.clone(),
            host: cfg.pinecone_host.trim_end_matches('/').to_string(),
            namespace: cfg.namespace.clone(),
        }
    }

    pub async fn upsert_chunk(&self, chunk: &DocumentChunk, embedding: Vec<f32>) -> Result<()> {
        let url = format!("{}/vectors/upsert", self.host);

        let res = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "namespace": self.namespace,
                "vectors": [{
                    "id": chunk.chunk_id,
                    "values": embedding,
                    "metadata": {
                        "source": chunk.source,
                        "chunk_index": chunk.index,
                        "text": chunk.text
                    }
                }]
            }))
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            error!(status=?status, body=?body, "Pinecone upsert failed");
            return Err(BotError::Retrieval(format!("Pinecone error: {status}")));
        }

        info!(chunk_id=?chunk.chunk_id, "Upserted chunk to Pinecone");
        Ok(())
    }

    pub async fn query(&self, embedding: Vec<f32>, top_k: usize) -> Result<Vec<QueryResult>> {
        let url = format!("{}/query", self.host);

        let res = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&json!({
                "namespace": self.namespace,
                "vector": embedding,
                "topK": top_k,
                "includeMetadata": true,
                "includeValues": false
            }))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            error!(status=?status, body=?body, "Pinecone query failed");
            return Err(BotError::Retrieval(format!("Pinecone query error: {status}")));
        }
        let body: serde_json::Value = res.json().await?;

        let results: Vec<QueryResult> = body["matches"]
            .as_array()
            .map(|matches| {
                matches
                    .iter()
                    .filter_map(|m| {
                        let metadata = &m["metadata"];
                        Some(QueryResult {
                            text: metadata["text"].as_str()?.to_string(),
                            source: metadata["source"].as_str().unwrap_or("unknown").to_string(),
                            score: m["score"].as_f64().unwrap_or(0.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        info!(count = results.len(), "Found similar chunks");
        Ok(results)
    }

    /// Vectors stored in this namespace, per `describe_index_stats`.
    pub async fn vector_count(&self) -> Result<u64> {
        let url = format!("{}/describe_index_stats", self.host);
        let res = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&json!({}))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(BotError::Retrieval(format!("Pinecone stats error: {status}")));
        }
        let body: serde_json::Value = res.json().await?;
        Ok(body["namespaces"][self.namespace.as_str()]["vectorCount"]
            .as_u64()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn index(host: String) -> PineconeIndex {
        PineconeIndex::new(&PineconeConfig {
            cohere_key: "co".into(),
            pinecone_key: "pc".into(),
            pinecone_host: host,
            namespace: "docs".into(),
        })
    }

    #[tokio::test]
    async fn query_skips_matches_without_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(header("Api-Key", "pc"))
            .and(body_partial_json(json!({"namespace": "docs", "topK": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "matches": [
                    {"id": "a", "score": 0.9, "metadata": {"text": "Returns take 30 days.", "source": "faq.txt"}},
                    {"id": "b", "score": 0.4, "metadata": {"source": "empty.txt"}}
                ]
            })))
            .mount(&server)
            .await;

        let results = index(server.uri()).query(vec![0.1, 0.2], 2).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "faq.txt");
        assert_eq!(results[0].text, "Returns take 30 days.");
    }

    #[tokio::test]
    async fn upsert_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let chunk = DocumentChunk {
            chunk_id: "faq.txt#0".into(),
            source: "faq.txt".into(),
            index: 0,
            text: "hello".into(),
        };
        assert!(index(server.uri()).upsert_chunk(&chunk, vec![0.0]).await.is_err());
    }
}
