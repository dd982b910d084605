use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::metrics::ACTIVE_GAMES;

const INPUT_BUFFER: usize = 256;

/// A channel message forwarded to the game running in that channel.
#[derive(Debug, Clone)]
pub struct PlayerMessage {
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub content: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("A trivia game is already in progress in this channel!")]
    AlreadyActive,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StopError {
    #[error("There's no active trivia game in this channel.")]
    NotActive,
}

struct GameSlot {
    id: Uuid,
    inputs: mpsc::Sender<PlayerMessage>,
    cancel: CancellationToken,
}

/// The engine's end of a registered game.
pub struct GameSession {
    pub id: Uuid,
    pub channel_id: u64,
    pub inputs: mpsc::Receiver<PlayerMessage>,
    pub cancel: CancellationToken,
}

/// Process-wide registry of running games, at most one per channel.
#[derive(Default)]
pub struct ActiveGames {
    games: Mutex<HashMap<u64, GameSlot>>,
}

impl ActiveGames {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, GameSlot>> {
        match self.games.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Claims the channel for a new game. Leaves an existing game untouched.
    pub fn start(&self, channel_id: u64) -> Result<GameSession, StartError> {
        let mut games = self.lock();
        if games.contains_key(&channel_id) {
            return Err(StartError::AlreadyActive);
        }

        let (tx, rx) = mpsc::channel(INPUT_BUFFER);
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        games.insert(
            channel_id,
            GameSlot {
                id,
                inputs: tx,
                cancel: cancel.clone(),
            },
        );
        ACTIVE_GAMES.set(games.len() as i64);
        info!(channel_id, game_id = %id, "Trivia game registered");

        Ok(GameSession {
            id,
            channel_id,
            inputs: rx,
            cancel,
        })
    }

    /// Cancels the channel's game and frees the slot immediately.
    pub fn stop(&self, channel_id: u64) -> Result<(), StopError> {
        let mut games = self.lock();
        let slot = games.remove(&channel_id).ok_or(StopError::NotActive)?;
        slot.cancel.cancel();
        ACTIVE_GAMES.set(games.len() as i64);
        info!(channel_id, game_id = %slot.id, "Trivia game stopped");
        Ok(())
    }

    /// Releases the slot if it still belongs to game `id`.
    pub fn finish(&self, channel_id: u64, id: Uuid) {
        let mut games = self.lock();
        if games.get(&channel_id).is_some_and(|slot| slot.id == id) {
            games.remove(&channel_id);
            ACTIVE_GAMES.set(games.len() as i64);
            debug!(channel_id, game_id = %id, "Trivia game slot released");
        }
    }

    /// Hands a message to the channel's game. Returns false if none is running.
    pub fn route(&self, channel_id: u64, message: PlayerMessage) -> bool {
        let games = self.lock();
        let Some(slot) = games.get(&channel_id) else {
            return false;
        };
        if let Err(err) = slot.inputs.try_send(message) {
            debug!(channel_id, error = %err, "Dropped trivia input");
        }
        true
    }

    pub fn is_active(&self, channel_id: u64) -> bool {
        self.lock().contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(content: &str) -> PlayerMessage {
        PlayerMessage {
            author_id: 1,
            author_name: "alice".into(),
            author_is_bot: false,
            content: content.into(),
        }
    }

    #[test]
    fn second_start_is_rejected_without_touching_first() {
        let games = ActiveGames::new();
        let mut first = games.start(10).unwrap();

        assert_eq!(games.start(10).err(), Some(StartError::AlreadyActive));
        assert!(!first.cancel.is_cancelled());
        assert!(games.route(10, answer("A")));
        assert_eq!(first.inputs.try_recv().unwrap().content, "A");
        assert_eq!(games.len(), 1);
    }

    #[test]
    fn games_in_different_channels_coexist() {
        let games = ActiveGames::new();
        let _a = games.start(1).unwrap();
        let _b = games.start(2).unwrap();
        assert_eq!(games.len(), 2);
    }

    #[test]
    fn stop_cancels_and_frees_slot() {
        let games = ActiveGames::new();
        let session = games.start(3).unwrap();

        assert_eq!(games.stop(3), Ok(()));
        assert!(session.cancel.is_cancelled());
        assert!(!games.is_active(3));
        assert_eq!(games.stop(3), Err(StopError::NotActive));
        assert!(games.start(3).is_ok());
    }

    #[test]
    fn finish_only_removes_own_game() {
        let games = ActiveGames::new();
        let old = games.start(4).unwrap();
        games.stop(4).unwrap();
        let new = games.start(4).unwrap();

        games.finish(4, old.id);
        assert!(games.is_active(4));
        games.finish(4, new.id);
        assert!(!games.is_active(4));
    }

    #[test]
    fn route_without_game_is_ignored() {
        let games = ActiveGames::new();
        assert!(!games.route(5, answer("B")));
    }
}
