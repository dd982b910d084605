use reqwest::Client;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{BotError, Result};

const COHERE_BASE_URL: &str = "https://api.cohere.ai/v1";
const EMBED_MODEL: &str = "embed-english-v3.0";

/// Whether the text is stored in the index or used to search it.
#[derive(Debug, Clone, Copy)]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    fn as_str(&self) -> &'static str {
        match self {
            InputType::Document => "search_document",
            InputType::Query => "search_query",
        }
    }
}

#[derive(Clone)]
pub struct CohereEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
}

impl CohereEmbedder {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: COHERE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub async fn embed(&self, text: &str, input_type: InputType) -> Result<Vec<f32>> {
        let res = self
            .client
            .post(format!("{}/embed", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": EMBED_MODEL,
                "input_type": input_type.as_str(),
                "texts": [text]
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(BotError::Retrieval(format!("Cohere error: {}", res.text().await?)));
        }

        let body: serde_json::Value = res.json().await?;
        if let Some(array) = body["embeddings"][0].as_array() {
            let emb: Vec<f32> = array.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect();
            info!(len = emb.len(), "Got embedding");
            Ok(emb)
        } else {
            warn!("No embeddings in Cohere response: {body:?}");
            Err(BotError::Retrieval("no embeddings found".into()))
        }
    }
}
