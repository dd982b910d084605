use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::error::{BotError, Result};
use crate::metrics::SPEECH_SYNTHESES;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns reply text into an audio file on disk.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns the path of the written audio file.
    async fn synthesize(&self, text: &str) -> Result<PathBuf>;
}

pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    output: PathBuf,
}

impl OpenAiSpeech {
    pub fn new(api_key: String, model: String, voice: String, output: PathBuf) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model,
            voice,
            output,
        }
    }

    pub fn from_config(cfg: &TtsConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| BotError::Config("speech synthesis needs OPENAI_API_KEY".into()))?;
        Ok(Self::new(api_key, cfg.model.clone(), cfg.voice.clone(), cfg.filename.clone()))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<PathBuf> {
        let res = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "voice": self.voice,
                "input": text,
            }))
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BotError::Speech(format!("status {status}: {body}")));
        }

        let audio = res.bytes().await?;
        tokio::fs::write(&self.output, &audio).await?;
        SPEECH_SYNTHESES.inc();
        info!(path = %self.output.display(), bytes = audio.len(), "Synthesized speech");
        Ok(self.output.clone())
    }
}

/// Removes a played audio file. A file that is already gone is not an error.
pub async fn cleanup(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed speech file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove speech file"),
    }
}
