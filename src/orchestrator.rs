//! Turns an inbound chat message into a reply: history, grounding, model
//! call, truncation and delivery chunking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::error::Result;
use crate::grounding::{format_context, Retriever};
use crate::history::{ChatTurn, ClearOutcome, ConversationStore};
use crate::llm::GovernedModel;
use crate::metrics::{CHAT_RESPONSES, RETRIEVAL_FAILURES};

pub const FALLBACK_REPLY: &str = "An unexpected error occurred. Please try again later.";

/// Hard limit on a single Discord message.
pub const DISCORD_MESSAGE_LIMIT: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Full (possibly truncated) reply text.
    pub text: String,
    /// `text` cut into messages the platform will accept, in send order.
    pub chunks: Vec<String>,
    /// True when `text` is the fallback apology rather than a model answer.
    pub is_fallback: bool,
}

impl Reply {
    fn fallback() -> Self {
        Self {
            text: FALLBACK_REPLY.to_string(),
            chunks: vec![FALLBACK_REPLY.to_string()],
            is_fallback: true,
        }
    }
}

pub struct ResponseOrchestrator {
    history: Arc<ConversationStore>,
    model: GovernedModel,
    retriever: Option<Arc<dyn Retriever>>,
    system_prompt: String,
    max_text: usize,
    max_message_len: usize,
    channel_locks: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseOrchestrator {
    pub fn new(
        history: Arc<ConversationStore>,
        model: GovernedModel,
        retriever: Option<Arc<dyn Retriever>>,
        system_prompt: String,
        max_text: usize,
    ) -> Self {
        Self {
            history,
            model,
            retriever,
            system_prompt,
            max_text: max_text.max(1),
            max_message_len: DISCORD_MESSAGE_LIMIT,
            channel_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.max_message_len = limit.max(1);
        self
    }

    fn channel_lock(&self, channel_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.channel_locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(channel_id).or_default().clone()
    }

    /// Answers `turn` in the context of the channel's history.
    ///
    /// Requests in one channel are handled one at a time so a reply is always
    /// stored directly after the message it answers. Never fails: errors are
    /// logged and replaced by [`FALLBACK_REPLY`], and the user's turn stays in
    /// the history.
    pub async fn respond(&self, channel_id: u64, turn: ChatTurn) -> Reply {
        let lock = self.channel_lock(channel_id);
        let _guard = lock.lock().await;

        let query = turn.content.clone();
        self.history.append(channel_id, turn);

        match self.generate(channel_id, &query).await {
            Ok(text) => {
                let text = truncate_chars(&text, self.max_text);
                self.history.append(channel_id, ChatTurn::assistant(text.clone()));
                CHAT_RESPONSES.inc();
                info!(channel_id, len = text.len(), "Chat reply generated");
                Reply {
                    chunks: split_message(&text, self.max_message_len),
                    text,
                    is_fallback: false,
                }
            }
            Err(err) => {
                error!(channel_id, error = %err, "Failed to generate chat reply");
                Reply::fallback()
            }
        }
    }

    /// A single prompt with no channel history, e.g. for translation.
    pub async fn one_shot(&self, prompt: &str) -> Result<String> {
        self.model
            .complete(&self.system_prompt, &[ChatTurn::user(prompt)])
            .await
    }

    pub fn clear_history(&self, channel_id: u64) -> ClearOutcome {
        self.history.clear(channel_id)
    }

    async fn generate(&self, channel_id: u64, query: &str) -> Result<String> {
        let system = self.system_instruction(query).await?;
        let messages = self.history.get(channel_id);
        debug!(channel_id, turns = messages.len(), "Calling model");
        self.model.complete(&system, &messages).await
    }

    async fn system_instruction(&self, query: &str) -> Result<String> {
        let Some(retriever) = &self.retriever else {
            return Ok(self.system_prompt.clone());
        };
        let docs = retriever.retrieve(query).await.inspect_err(|_| RETRIEVAL_FAILURES.inc())?;
        if docs.is_empty() {
            return Ok(self.system_prompt.clone());
        }
        Ok(format!(
            "{}\n\nGrounding Information:\n{}",
            self.system_prompt,
            format_context(&docs)
        ))
    }
}

/// Keeps at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push('…');
    truncated
}

/// Splits text into pieces of at most `limit` characters, breaking on a
/// newline or space when one is available.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(offset, _)| offset)
            .unwrap_or(rest.len());
        let window = &rest[..hard_end];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&pos| pos > 0)
            .unwrap_or(hard_end);

        chunks.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
