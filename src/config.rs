use std::collections::{BTreeMap, HashSet};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BotError, Result};

/// Which wire format the configured model speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    /// OpenAI-compatible server reachable at `LOCAL_LLM_URL`.
    Local,
    Cohere,
}

impl FromStr for LlmProvider {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "local" => Ok(Self::Local),
            "cohere" => Ok(Self::Cohere),
            other => Err(BotError::Config(format!("unsupported LLM provider '{other}'"))),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::Anthropic => write!(f, "anthropic"),
            LlmProvider::Local => write!(f, "local"),
            LlmProvider::Cohere => write!(f, "cohere"),
        }
    }
}

/// Sampling parameters forwarded with every completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// Anything else from `LLM_SETTINGS`, passed through verbatim.
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ModelSettings {
    /// Parses `key=value,key=value`. Entries without `=` are skipped.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut settings = ModelSettings::default();
        for item in raw.split(',').filter(|item| item.contains('=')) {
            let (key, value) = item.split_once('=').unwrap_or_default();
            let (key, value) = (key.trim(), value.trim());
            match key {
                "max_tokens" => {
                    let parsed = value
                        .parse::<f64>()
                        .map_err(|_| BotError::Config(format!("invalid max_tokens '{value}'")))?;
                    settings.max_tokens = Some(parsed as u32);
                }
                "temperature" => {
                    let parsed = value
                        .parse::<f64>()
                        .map_err(|_| BotError::Config(format!("invalid temperature '{value}'")))?;
                    settings.temperature = Some(parsed);
                }
                _ => {
                    let json = match value.parse::<f64>() {
                        Ok(number) => serde_json::json!(number),
                        Err(_) => serde_json::json!(value),
                    };
                    settings.extra.insert(key.to_string(), json);
                }
            }
        }
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundingSource {
    Local,
    Pinecone,
}

#[derive(Debug, Clone)]
pub struct GroundingConfig {
    pub source: GroundingSource,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct PineconeConfig {
    pub cohere_key: String,
    pub pinecone_key: String,
    pub pinecone_host: String,
    pub namespace: String,
}

impl PineconeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            cohere_key: required(lookup, "COHERE_API_KEY")?,
            pinecone_key: required(lookup, "PINECONE_API_KEY")?,
            pinecone_host: required(lookup, "PINECONE_HOST")?,
            namespace: optional(lookup, "PINECONE_NAMESPACE").unwrap_or_else(|| "default".into()),
        })
    }
}

#[derive(Clone)]
pub struct TtsConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub filename: PathBuf,
}

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub status_message: String,
    pub guild_id: Option<u64>,
    pub allowed_channel_ids: HashSet<u64>,
    pub allowed_role_ids: HashSet<u64>,

    pub llm_provider: LlmProvider,
    pub llm_model: String,
    pub local_llm_url: Option<String>,
    pub system_prompt: String,
    pub model_settings: ModelSettings,
    pub openai_key: Option<String>,
    pub anthropic_key: Option<String>,
    pub cohere_key: Option<String>,

    pub max_text: usize,
    pub max_messages: usize,
    pub max_requests: usize,
    pub request_window: Duration,
    pub cooldown_rate: u32,
    pub cooldown_per: Duration,

    pub tts: TtsConfig,
    pub grounding: Option<GroundingConfig>,
    pub pinecone: Option<PineconeConfig>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let llm = required(lookup, "LLM")?;
        let (provider, model) = llm
            .split_once('/')
            .filter(|(_, model)| !model.contains('/') && !model.is_empty())
            .ok_or_else(|| BotError::Config(format!("LLM must look like provider/model, got '{llm}'")))?;
        let llm_provider: LlmProvider = provider.parse()?;

        let openai_key = optional(lookup, "OPENAI_API_KEY");
        let anthropic_key = optional(lookup, "ANTHROPIC_API_KEY");
        let cohere_key = optional(lookup, "COHERE_API_KEY");
        let local_llm_url = optional(lookup, "LOCAL_LLM_URL");

        let provider_ready = match llm_provider {
            LlmProvider::OpenAi => openai_key.is_some(),
            LlmProvider::Anthropic => anthropic_key.is_some(),
            LlmProvider::Cohere => cohere_key.is_some(),
            LlmProvider::Local => local_llm_url.is_some(),
        };
        if !provider_ready {
            return Err(BotError::Config(format!(
                "provider '{llm_provider}' is missing its API key or URL"
            )));
        }

        let tts_enabled = flag(lookup, "TTS_ENABLED");
        if tts_enabled && openai_key.is_none() {
            return Err(BotError::Config("TTS_ENABLED requires OPENAI_API_KEY".into()));
        }
        let tts = TtsConfig {
            enabled: tts_enabled,
            api_key: openai_key.clone(),
            model: optional(lookup, "TTS_MODEL").unwrap_or_else(|| "tts-1".into()),
            voice: optional(lookup, "TTS_VOICE").unwrap_or_else(|| "alloy".into()),
            filename: optional(lookup, "TTS_FILENAME")
                .unwrap_or_else(|| "tts_output.mp3".into())
                .into(),
        };

        let (grounding, pinecone) = if flag(lookup, "USE_GROUNDING") {
            let source = match required(lookup, "GROUNDING_SOURCE")?.as_str() {
                "local" => GroundingSource::Local,
                "pinecone" => GroundingSource::Pinecone,
                other => {
                    return Err(BotError::Config(format!("invalid GROUNDING_SOURCE: {other}")))
                }
            };
            let pinecone = match source {
                GroundingSource::Pinecone => Some(PineconeConfig::from_lookup(lookup)?),
                GroundingSource::Local => None,
            };
            let path = optional(lookup, "GROUNDING_PATH").unwrap_or_else(|| "grounding".into());
            (Some(GroundingConfig { source, path: path.into() }), pinecone)
        } else {
            (None, None)
        };

        Ok(Self {
            discord_token: required(lookup, "DISCORD_TOKEN")?,
            status_message: optional(lookup, "DISCORD_STATUS_MESSAGE")
                .unwrap_or_else(|| "Chatting".into()),
            guild_id: parsed(lookup, "GUILD_ID")?,
            allowed_channel_ids: id_list(lookup, "ALLOWED_CHANNEL_IDS")?,
            allowed_role_ids: id_list(lookup, "ALLOWED_ROLE_IDS")?,
            llm_provider,
            llm_model: model.to_string(),
            local_llm_url,
            system_prompt: required(lookup, "LLM_SYSTEM_PROMPT")?,
            model_settings: ModelSettings::parse(
                &optional(lookup, "LLM_SETTINGS").unwrap_or_default(),
            )?,
            openai_key,
            anthropic_key,
            cohere_key,
            max_text: parsed(lookup, "MAX_TEXT")?.unwrap_or(4000),
            max_messages: parsed(lookup, "MAX_MESSAGES")?.unwrap_or(20),
            max_requests: parsed(lookup, "MAX_REQUESTS_PER_MINUTE")?.unwrap_or(20),
            request_window: Duration::from_secs(parsed(lookup, "REQUEST_WINDOW")?.unwrap_or(60)),
            cooldown_rate: parsed(lookup, "COOLDOWN_RATE")?.unwrap_or(1),
            cooldown_per: Duration::from_secs(parsed(lookup, "COOLDOWN_PER")?.unwrap_or(5)),
            tts,
            grounding,
            pinecone,
            metrics_port: parsed(lookup, "METRICS_PORT")?,
        })
    }
}

/// Reads a value and drops any trailing `# comment`.
fn optional(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.split('#').next().unwrap_or_default().trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    optional(lookup, key)
        .ok_or_else(|| BotError::Config(format!("environment variable '{key}' is not set")))
}

fn flag(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> bool {
    optional(lookup, key).is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    optional(lookup, key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| BotError::Config(format!("invalid value for {key}: '{value}'")))
        })
        .transpose()
}

fn id_list(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<HashSet<u64>> {
    let Some(raw) = optional(lookup, key) else {
        return Ok(HashSet::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse::<u64>()
                .map_err(|_| BotError::Config(format!("invalid format for integer list: {raw}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DISCORD_TOKEN", "token"),
            ("LLM", "openai/gpt-4o-mini"),
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_SYSTEM_PROMPT", "You are helpful."),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(&|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAi);
        assert_eq!(cfg.llm_model, "gpt-4o-mini");
        assert_eq!(cfg.max_messages, 20);
        assert_eq!(cfg.max_requests, 20);
        assert_eq!(cfg.request_window, Duration::from_secs(60));
        assert!(cfg.allowed_channel_ids.is_empty());
        assert!(cfg.grounding.is_none());
        assert!(!cfg.tts.enabled);
    }

    #[test]
    fn missing_token_is_fatal() {
        let mut env = base_env();
        env.remove("DISCORD_TOKEN");
        let err = load(&env).err().unwrap();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
    }

    #[test]
    fn comments_are_stripped_and_lists_parsed() {
        let mut env = base_env();
        env.insert("ALLOWED_CHANNEL_IDS", "12, 34 # staff channels");
        env.insert("MAX_MESSAGES", "8 # keep it short");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.allowed_channel_ids, HashSet::from([12, 34]));
        assert_eq!(cfg.max_messages, 8);
    }

    #[test]
    fn malformed_id_list_is_rejected() {
        let mut env = base_env();
        env.insert("ALLOWED_ROLE_IDS", "12,abc");
        assert!(matches!(load(&env), Err(BotError::Config(_))));
    }

    #[test]
    fn llm_string_needs_a_single_slash() {
        let mut env = base_env();
        env.insert("LLM", "gpt-4o");
        assert!(load(&env).is_err());
        env.insert("LLM", "openai/org/gpt-4o");
        assert!(load(&env).is_err());
    }

    #[test]
    fn local_provider_needs_url() {
        let mut env = base_env();
        env.insert("LLM", "local/llama3");
        assert!(load(&env).is_err());
        env.insert("LOCAL_LLM_URL", "http://localhost:11434/v1");
        assert_eq!(load(&env).unwrap().llm_provider, LlmProvider::Local);
    }

    #[test]
    fn unknown_grounding_source_is_rejected() {
        let mut env = base_env();
        env.insert("USE_GROUNDING", "true");
        env.insert("GROUNDING_SOURCE", "ftp");
        let err = load(&env).err().unwrap();
        assert!(err.to_string().contains("GROUNDING_SOURCE"));
    }

    #[test]
    fn pinecone_grounding_requires_credentials() {
        let mut env = base_env();
        env.insert("USE_GROUNDING", "true");
        env.insert("GROUNDING_SOURCE", "pinecone");
        assert!(load(&env).is_err());
        env.insert("COHERE_API_KEY", "co");
        env.insert("PINECONE_API_KEY", "pc");
        env.insert("PINECONE_HOST", "https://index.pinecone.io");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.pinecone.unwrap().namespace, "default");
    }

    #[test]
    fn model_settings_parse_types() {
        let settings =
            ModelSettings::parse("max_tokens=512.0, temperature=0.7, top_p=0.9, stop=END, junk")
                .unwrap();
        assert_eq!(settings.max_tokens, Some(512));
        assert_eq!(settings.temperature, Some(0.7));
        assert_eq!(settings.extra["top_p"], serde_json::json!(0.9));
        assert_eq!(settings.extra["stop"], serde_json::json!("END"));
        assert_eq!(settings.extra.len(), 2);
    }
}
