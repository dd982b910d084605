//! Voice-channel presence and playback of synthesized replies.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serenity::all::{ChannelId, Context, GuildId};
use songbird::input::File as AudioFile;
use songbird::tracks::PlayMode;
use songbird::Songbird;
use tracing::{debug, info};

use crate::error::{BotError, Result};

const PLAYBACK_POLL: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct Voice {
    manager: Arc<Songbird>,
}

impl Voice {
    /// Fetches the voice manager registered on the client.
    pub async fn from_context(ctx: &Context) -> Result<Self> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| BotError::Voice("voice client not initialised".into()))?;
        Ok(Self { manager })
    }

    pub async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        self.manager
            .join(guild_id, channel_id)
            .await
            .map_err(|err| BotError::Voice(err.to_string()))?;
        info!(guild_id = %guild_id, channel_id = %channel_id, "Joined voice channel");
        Ok(())
    }

    /// Returns false if the bot was not connected in that guild.
    pub async fn leave(&self, guild_id: GuildId) -> Result<bool> {
        if self.manager.get(guild_id).is_none() {
            return Ok(false);
        }
        self.manager
            .remove(guild_id)
            .await
            .map_err(|err| BotError::Voice(err.to_string()))?;
        info!(guild_id = %guild_id, "Left voice channel");
        Ok(true)
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.manager.get(guild_id).is_some()
    }

    /// Plays an audio file in the guild's voice call and waits for it to end.
    pub async fn play_file(&self, guild_id: GuildId, path: &Path) -> Result<()> {
        let call = self
            .manager
            .get(guild_id)
            .ok_or_else(|| BotError::Voice("not connected to a voice channel".into()))?;

        let handle = {
            let mut call = call.lock().await;
            call.play_input(AudioFile::new(path.to_path_buf()).into())
        };
        debug!(guild_id = %guild_id, path = %path.display(), "Playback started");

        loop {
            let info = handle.get_info().await;
            match playback_state(info.as_ref().ok().map(|state| &state.playing)) {
                Playback::Running => tokio::time::sleep(PLAYBACK_POLL).await,
                Playback::Finished => break,
                Playback::Failed(reason) => return Err(BotError::Voice(reason)),
            }
        }
        debug!(guild_id = %guild_id, "Playback finished");
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum Playback {
    Running,
    Finished,
    Failed(String),
}

/// A track whose state can no longer be read has finished.
fn playback_state(mode: Option<&PlayMode>) -> Playback {
    let Some(mode) = mode else {
        return Playback::Finished;
    };
    match mode {
        PlayMode::Errored(err) => Playback::Failed(err.to_string()),
        PlayMode::End | PlayMode::Stop => Playback::Finished,
        _ => Playback::Running,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_state_follows_play_mode() {
        assert_eq!(playback_state(Some(&PlayMode::Play)), Playback::Running);
        assert_eq!(playback_state(Some(&PlayMode::Pause)), Playback::Running);
        assert_eq!(playback_state(Some(&PlayMode::End)), Playback::Finished);
        assert_eq!(playback_state(Some(&PlayMode::Stop)), Playback::Finished);

        assert_eq!(playback_state(None), Playback::Finished);
    }
}
