//! Model invocation: provider wire formats and the rate-governed wrapper
//! every caller goes through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{Config, LlmProvider, ModelSettings};
use crate::error::{BotError, Result};
use crate::governor::RateGovernor;
use crate::history::{ChatTurn, Role};
use crate::metrics::{MODEL_FAILURES, MODEL_REQUESTS, MODEL_REQUEST_DURATION};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const COHERE_BASE_URL: &str = "https://api.cohere.ai/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends the system prompt plus ordered turns and returns the reply text.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatTurn],
        settings: &ModelSettings,
    ) -> Result<String>;
}

/// HTTP client for the supported chat-completion APIs.
pub struct HttpChatModel {
    client: Client,
    provider: LlmProvider,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl HttpChatModel {
    pub fn new(provider: LlmProvider, model: String, api_key: Option<String>, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        let base_url = base_url.unwrap_or_else(|| {
            match provider {
                LlmProvider::OpenAi | LlmProvider::Local => OPENAI_BASE_URL,
                LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
                LlmProvider::Cohere => COHERE_BASE_URL,
            }
            .to_string()
        });
        Ok(Self {
            client,
            provider,
            model,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let (api_key, base_url) = match cfg.llm_provider {
            LlmProvider::OpenAi => (cfg.openai_key.clone(), None),
            LlmProvider::Anthropic => (cfg.anthropic_key.clone(), None),
            LlmProvider::Cohere => (cfg.cohere_key.clone(), None),
            LlmProvider::Local => (None, cfg.local_llm_url.clone()),
        };
        Self::new(cfg.llm_provider, cfg.llm_model.clone(), api_key, base_url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.provider, &self.api_key) {
            (LlmProvider::Anthropic, Some(key)) => request
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            (_, Some(key)) => request.bearer_auth(key),
            (_, None) => request,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let res = self.authorized(self.client.post(&url)).json(&body).send().await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            warn!(provider = %self.provider, %status, "Model request failed");
            return Err(BotError::Provider(format!("{} returned {status}: {text}", self.provider)));
        }
        Ok(res.json().await?)
    }

    fn openai_body(&self, system_prompt: &str, messages: &[ChatTurn], settings: &ModelSettings) -> Value {
        let mut wire = vec![json!({"role": "system", "content": system_prompt})];
        wire.extend(
            messages
                .iter()
                .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content})),
        );

        let mut body = json!({"model": self.model, "messages": wire});
        apply_settings(&mut body, settings, None);
        body
    }

    fn anthropic_body(&self, system_prompt: &str, messages: &[ChatTurn], settings: &ModelSettings) -> Value {
        // The messages API takes system text out of band.
        // The conversation must open with a user turn and alternate roles, so
        // leading assistant turns are dropped and same-role runs are merged.
        let mut system = system_prompt.to_string();
        let mut turns: Vec<(Role, String)> = Vec::new();
        for turn in messages {
            match turn.role {
                Role::System => {
                    system.push_str("\n\n");
                    system.push_str(&turn.content);
                }
                Role::Assistant if turns.is_empty() => {}
                role => match turns.last_mut() {
                    Some((last, content)) if *last == role => {
                        content.push_str("\n\n");
                        content.push_str(&turn.content);
                    }
                    _ => turns.push((role, turn.content.clone())),
                },
            }
        }
        let wire: Vec<Value> = turns
            .iter()
            .map(|(role, content)| json!({"role": role.as_str(), "content": content}))
            .collect();

        let mut body = json!({"model": self.model, "system": system, "messages": wire});
        apply_settings(&mut body, settings, Some(ANTHROPIC_DEFAULT_MAX_TOKENS));
        body
    }

    fn cohere_body(&self, system_prompt: &str, messages: &[ChatTurn], settings: &ModelSettings) -> Value {
        let (last, earlier) = match messages.split_last() {
            Some((last, earlier)) => (last.content.as_str(), earlier),
            None => ("", messages),
        };
        let chat_history: Vec<Value> = earlier
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::User => "USER",
                    Role::Assistant => "CHATBOT",
                    Role::System => "SYSTEM",
                };
                json!({"role": role, "message": turn.content})
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "message": last,
            "preamble": system_prompt,
            "chat_history": chat_history,
        });
        apply_settings(&mut body, settings, None);
        body
    }
}

fn apply_settings(body: &mut Value, settings: &ModelSettings, default_max_tokens: Option<u32>) {
    if let Some(max_tokens) = settings.max_tokens.or(default_max_tokens) {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = settings.temperature {
        body["temperature"] = json!(temperature);
    }
    for (key, value) in &settings.extra {
        body[key.as_str()] = value.clone();
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[ChatTurn],
        settings: &ModelSettings,
    ) -> Result<String> {
        let text = match self.provider {
            LlmProvider::OpenAi | LlmProvider::Local => {
                let body = self
                    .post("chat/completions", self.openai_body(system_prompt, messages, settings))
                    .await?;
                body["choices"][0]["message"]["content"]
                    .as_str()
                    .map(str::to_string)
            }
            LlmProvider::Anthropic => {
                let body = self
                    .post("messages", self.anthropic_body(system_prompt, messages, settings))
                    .await?;
                body["content"].as_array().map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|block| block["text"].as_str())
                        .collect::<Vec<_>>()
                        .join("")
                })
            }
            LlmProvider::Cohere => {
                let body = self
                    .post("chat", self.cohere_body(system_prompt, messages, settings))
                    .await?;
                body["text"].as_str().map(str::to_string)
            }
        };

        match text {
            Some(text) => {
                let response = text.trim().to_string();
                info!(provider = %self.provider, len = response.len(), "Generated response");
                Ok(response)
            }
            None => Err(BotError::Provider(format!("no text in {} response", self.provider))),
        }
    }
}

/// A [`ChatModel`] whose calls are admitted through the shared [`RateGovernor`].
#[derive(Clone)]
pub struct GovernedModel {
    inner: Arc<dyn ChatModel>,
    governor: Arc<RateGovernor>,
    settings: ModelSettings,
}

impl GovernedModel {
    pub fn new(inner: Arc<dyn ChatModel>, governor: Arc<RateGovernor>, settings: ModelSettings) -> Self {
        Self { inner, governor, settings }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub async fn complete(&self, system_prompt: &str, messages: &[ChatTurn]) -> Result<String> {
        self.governor.throttle().await;

        MODEL_REQUESTS.inc();
        let _timer = MODEL_REQUEST_DURATION.start_timer();
        let result = self
            .inner
            .complete(system_prompt, messages, &self.settings)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(BotError::Provider("empty reply".into()))
                } else {
                    Ok(text)
                }
            });
        if result.is_err() {
            MODEL_FAILURES.inc();
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn turns() -> Vec<ChatTurn> {
        vec![
            ChatTurn::user("What is Rust?"),
            ChatTurn::assistant("A systems language."),
            ChatTurn::user("Who made it?"),
        ]
    }

    fn settings() -> ModelSettings {
        ModelSettings {
            max_tokens: Some(256),
            temperature: Some(0.5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn openai_request_carries_system_and_history() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 256,
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "What is Rust?"},
                    {"role": "assistant", "content": "A systems language."},
                    {"role": "user", "content": "Who made it?"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  Mozilla.  "}}]
            })))
            .mount(&server)
            .await;

        let model = HttpChatModel::new(
            LlmProvider::OpenAi,
            "gpt-4o-mini".into(),
            Some("sk-test".into()),
            Some(server.uri()),
        )
        .unwrap();
        let reply = model.complete("Be brief.", &turns(), &settings()).await.unwrap();
        assert_eq!(reply, "Mozilla.");
    }

    #[tokio::test]
    async fn anthropic_request_moves_system_out_of_band() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "ak-test"))
            .and(body_partial_json(json!({"system": "Be brief.", "max_tokens": 256})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Graydon "}, {"type": "text", "text": "Hoare."}]
            })))
            .mount(&server)
            .await;

        let model = HttpChatModel::new(
            LlmProvider::Anthropic,
            "claude-3-5-haiku-latest".into(),
            Some("ak-test".into()),
            Some(server.uri()),
        )
        .unwrap();
        let reply = model.complete("Be brief.", &turns(), &settings()).await.unwrap();
        assert_eq!(reply, "Graydon Hoare.");
    }

    #[tokio::test]
    async fn cohere_request_splits_last_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .and(body_partial_json(json!({
                "message": "Who made it?",
                "preamble": "Be brief.",
                "chat_history": [
                    {"role": "USER", "message": "What is Rust?"},
                    {"role": "CHATBOT", "message": "A systems language."}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "Graydon."})))
            .mount(&server)
            .await;

        let model = HttpChatModel::new(
            LlmProvider::Cohere,
            "command-r-08-2024".into(),
            Some("co-test".into()),
            Some(server.uri()),
        )
        .unwrap();
        assert_eq!(model.complete("Be brief.", &turns(), &settings()).await.unwrap(), "Graydon.");
    }

    #[tokio::test]
    async fn non_success_status_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let model =
            HttpChatModel::new(LlmProvider::Local, "llama3".into(), None, Some(server.uri())).unwrap();
        let err = model.complete("sys", &turns(), &settings()).await.unwrap_err();
        assert!(matches!(err, BotError::Provider(ref msg) if msg.contains("overloaded")));
    }

    #[tokio::test]
    async fn governed_model_forwards_to_inner() {
        let inner = Arc::new(mock::MockModel::with_replies(["hi"]));
        let governed = mock::governed(inner.clone());
        assert_eq!(governed.complete("sys", &turns()).await.unwrap(), "hi");
        assert_eq!(inner.calls()[0].messages.len(), 3);
        assert!(governed.complete("sys", &turns()).await.is_err());
    }

    #[tokio::test]
    async fn blank_reply_is_provider_error() {
        let inner = Arc::new(mock::MockModel::with_replies(["", "  \n "]));
        let governed = mock::governed(inner);
        for _ in 0..2 {
            let err = governed.complete("sys", &turns()).await.unwrap_err();
            assert!(matches!(err, BotError::Provider(ref msg) if msg == "empty reply"));
        }
    }

    #[test]
    fn anthropic_history_opens_with_user_and_alternates() {
        let model = HttpChatModel::new(
            LlmProvider::Anthropic,
            "claude-3-5-haiku-latest".into(),
            Some("ak-test".into()),
            None,
        )
        .unwrap();
        // Eviction left an assistant turn first, and a failed call left two
        // user turns back to back.
        let history = vec![
            ChatTurn::assistant("A systems language."),
            ChatTurn::user("Who made it?"),
            ChatTurn::assistant("Graydon Hoare."),
            ChatTurn::user("When?"),
            ChatTurn::user("hello?"),
        ];

        let body = model.anthropic_body("Be brief.", &history, &ModelSettings::default());
        assert_eq!(
            body["messages"],
            json!([
                {"role": "user", "content": "Who made it?"},
                {"role": "assistant", "content": "Graydon Hoare."},
                {"role": "user", "content": "When?\n\nhello?"}
            ])
        );
        assert_eq!(body["system"], "Be brief.");
    }
}
