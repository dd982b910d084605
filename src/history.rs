use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One message of a conversation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared,
    NothingToClear,
}

/// Bounded per-channel chat history, oldest turn first.
pub struct ConversationStore {
    channels: Mutex<HashMap<u64, VecDeque<ChatTurn>>>,
    max_turns: usize,
}

impl ConversationStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, VecDeque<ChatTurn>>> {
        match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Appends a turn, evicting the oldest ones beyond the cap.
    pub fn append(&self, channel_id: u64, turn: ChatTurn) {
        let mut channels = self.lock();
        let history = channels.entry(channel_id).or_default();
        history.push_back(turn);
        while history.len() > self.max_turns {
            history.pop_front();
        }
    }

    pub fn get(&self, channel_id: u64) -> Vec<ChatTurn> {
        self.lock()
            .get(&channel_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, channel_id: u64) -> ClearOutcome {
        match self.lock().remove(&channel_id) {
            Some(history) if !history.is_empty() => ClearOutcome::Cleared,
            _ => ClearOutcome::NothingToClear,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }
}
