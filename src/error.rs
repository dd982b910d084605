use thiserror::Error;

/// Error type shared by every collaborator the bot talks to.
#[derive(Debug, Error)]
pub enum BotError {
    /// Missing or malformed setting. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model provider rejected the request or returned an unusable body.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("speech synthesis error: {0}")]
    Speech(String),

    #[error("voice error: {0}")]
    Voice(String),

    #[error("discord error: {0}")]
    Discord(#[from] serenity::Error),

    /// Model output that could not be used as a trivia question.
    #[error("generation error: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, BotError>;
