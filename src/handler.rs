use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serenity::{
    all::{
        ActivityData, ChannelId, Command, CommandInteraction, ConnectionStage, CreateInteractionResponse,
        CreateInteractionResponseMessage, EditInteractionResponse, GuildId, Http, Interaction,
        ResumedEvent, ShardStageUpdateEvent,
    },
    async_trait,
    model::{channel::Message, gateway::Ready},
    prelude::*,
};
use tracing::{error, info, warn};

use crate::{
    access::AccessPolicy,
    commands::{self, BotCommand, ParseError, ADMIN_ONLY},
    config::Config,
    cooldown::Cooldown,
    error::Result,
    grounding::Retriever,
    health::HealthChecker,
    history::{ChatTurn, ClearOutcome},
    llm::GovernedModel,
    orchestrator::{truncate_chars, ResponseOrchestrator, DISCORD_MESSAGE_LIMIT},
    speech::{self, SpeechSynthesizer},
    trivia::{self, ActiveGames, GameChannel, PlayerMessage, TriviaSettings},
    voice::Voice,
};

const PLAYBACK_FAILED: &str = "I encountered an error while trying to play the audio response.";
const NOT_ALLOWED: &str = "You are not allowed to use this bot here.";

pub struct Handler {
    pub cfg: Arc<Config>,
    pub access: AccessPolicy,
    pub orchestrator: Arc<ResponseOrchestrator>,
    pub model: GovernedModel,
    pub games: Arc<ActiveGames>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub tts_enabled: AtomicBool,
    pub join_cooldown: Cooldown,
    pub health: Arc<HealthChecker>,
}

/// Posts trivia messages to a Discord channel.
pub struct DiscordChannel {
    http: Arc<Http>,
    channel_id: ChannelId,
}

#[async_trait]
impl GameChannel for DiscordChannel {
    async fn send(&self, text: String) -> Result<()> {
        self.channel_id.say(&self.http, text).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
        self.health.set_discord_connected(true);
        ctx.set_activity(Some(ActivityData::playing(&self.cfg.status_message)));

        let registered = match self.cfg.guild_id {
            Some(id) => GuildId::new(id)
                .set_commands(&ctx.http, commands::definitions())
                .await
                .map(|cmds| cmds.len()),
            None => Command::set_global_commands(&ctx.http, commands::definitions())
                .await
                .map(|cmds| cmds.len()),
        };
        match registered {
            Ok(count) => info!(count, guild_id = ?self.cfg.guild_id, "Slash commands registered"),
            Err(err) => error!("Failed to register slash commands: {err:?}"),
        }

        match &self.retriever {
            Some(retriever) => match retriever.reload().await {
                Ok(count) => {
                    self.health.set_grounding_loaded(true);
                    info!(count, "Grounding data loaded");
                }
                Err(err) => error!("Failed to load grounding data: {err}"),
            },
            None => info!("Grounding is disabled"),
        }
    }

    async fn shard_stage_update(&self, _ctx: Context, event: ShardStageUpdateEvent) {
        let connected = gateway_connected(event.new);
        if connected != gateway_connected(event.old) {
            info!(shard = %event.shard_id, stage = %event.new, "Gateway stage changed");
        }
        self.health.set_discord_connected(connected);
    }

    async fn resume(&self, _ctx: Context, _event: ResumedEvent) {
        info!("Gateway session resumed");
        self.health.set_discord_connected(true);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let roles: Vec<u64> = msg
            .member
            .as_ref()
            .map(|member| member.roles.iter().map(|role| role.get()).collect())
            .unwrap_or_default();
        if !self.access.allows(msg.channel_id.get(), &roles) {
            return;
        }

        self.games.route(
            msg.channel_id.get(),
            PlayerMessage {
                author_id: msg.author.id.get(),
                author_name: msg.author.name.clone(),
                author_is_bot: msg.author.bot,
                content: msg.content.clone(),
            },
        );

        let mentioned = msg.mentions_me(&ctx).await.unwrap_or(false);
        if mentioned || msg.guild_id.is_none() {
            self.chat(&ctx, &msg).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };

        let argument = command
            .data
            .options
            .first()
            .and_then(|option| option.value.as_str())
            .map(str::to_string);
        let parsed = match BotCommand::parse(&command.data.name, argument.as_deref()) {
            Ok(parsed) => parsed,
            Err(ParseError::MissingArgument(arg)) => {
                self.reply(&ctx, &command, format!("Missing required argument `{arg}`."), true).await;
                return;
            }
            Err(ParseError::Unknown(name)) => {
                warn!(command = %name, "Unknown slash command");
                return;
            }
        };

        let roles: Vec<u64> = command
            .member
            .as_ref()
            .map(|member| member.roles.iter().map(|role| role.get()).collect())
            .unwrap_or_default();
        if !self.access.allows(command.channel_id.get(), &roles) {
            self.reply(&ctx, &command, NOT_ALLOWED.to_string(), true).await;
            return;
        }

        let is_admin = command
            .member
            .as_ref()
            .and_then(|member| member.permissions)
            .is_some_and(|perms| perms.administrator());
        if parsed.requires_admin() && !is_admin {
            self.reply(&ctx, &command, ADMIN_ONLY.to_string(), true).await;
            return;
        }

        info!(command = %command.data.name, user = %command.user.name, "Processing slash command");
        self.run_command(&ctx, &command, parsed).await;
    }
}

/// Only a fully connected shard receives events.
fn gateway_connected(stage: ConnectionStage) -> bool {
    matches!(stage, ConnectionStage::Connected)
}

impl Handler {
    async fn chat(&self, ctx: &Context, msg: &Message) {
        let typing = msg.channel_id.start_typing(&ctx.http);
        let reply = self
            .orchestrator
            .respond(msg.channel_id.get(), ChatTurn::user(msg.content.clone()))
            .await;
        typing.stop();

        for (i, chunk) in reply.chunks.iter().enumerate() {
            let sent = if i == 0 {
                msg.reply(&ctx.http, chunk).await
            } else {
                msg.channel_id.say(&ctx.http, chunk).await
            };
            if let Err(err) = sent {
                error!("Cannot deliver chat reply: {err:?}");
                return;
            }
        }

        if !reply.is_fallback {
            if let Some(guild_id) = msg.guild_id {
                self.speak(ctx, guild_id, msg.channel_id, &reply.text).await;
            }
        }
    }

    /// Reads a reply aloud when TTS is on and the bot sits in a voice channel.
    async fn speak(&self, ctx: &Context, guild_id: GuildId, channel_id: ChannelId, text: &str) {
        let Some(speech) = &self.speech else {
            return;
        };
        if !self.tts_enabled.load(Ordering::Relaxed) {
            return;
        }
        let Ok(voice) = Voice::from_context(ctx).await else {
            return;
        };
        if !voice.is_connected(guild_id) {
            return;
        }

        let path = match speech.synthesize(text).await {
            Ok(path) => path,
            Err(err) => {
                error!("Error generating TTS: {err}");
                return;
            }
        };
        let played = voice.play_file(guild_id, &path).await;
        speech::cleanup(&path).await;

        if let Err(err) = played {
            error!("Error playing TTS: {err}");
            if let Err(err) = channel_id.say(&ctx.http, PLAYBACK_FAILED).await {
                error!("Cannot send playback notice: {err:?}");
            }
        }
    }

    async fn run_command(&self, ctx: &Context, command: &CommandInteraction, parsed: BotCommand) {
        let channel_id = command.channel_id.get();
        match parsed {
            BotCommand::ChatHelp => self.reply(ctx, command, commands::help_text(), false).await,
            BotCommand::Translate { text } => self.translate(ctx, command, &text).await,
            BotCommand::Trivia { topic } => self.start_trivia(ctx, command, topic).await,
            BotCommand::TriviaStop => {
                let text = match self.games.stop(channel_id) {
                    Ok(()) => "The trivia game has been stopped.".to_string(),
                    Err(err) => err.to_string(),
                };
                self.reply(ctx, command, text, false).await;
            }
            BotCommand::ClearHistory => {
                let text = match self.orchestrator.clear_history(channel_id) {
                    ClearOutcome::Cleared => "Conversation history cleared for this channel.",
                    ClearOutcome::NothingToClear => "No conversation history found for this channel.",
                };
                self.reply(ctx, command, text.to_string(), false).await;
            }
            BotCommand::LlmInfo => self.reply(ctx, command, commands::llm_info(&self.cfg), true).await,
            BotCommand::ToggleTts => {
                let text = if self.speech.is_none() {
                    "Text-to-Speech is unavailable: no speech provider is configured.".to_string()
                } else {
                    let enabled = !self.tts_enabled.fetch_xor(true, Ordering::Relaxed);
                    info!(enabled, "TTS toggled");
                    format!("Text-to-Speech is now {}.", if enabled { "enabled" } else { "disabled" })
                };
                self.reply(ctx, command, text, false).await;
            }
            BotCommand::SetStatus { status } => {
                ctx.set_activity(Some(ActivityData::playing(&status)));
                self.reply(ctx, command, format!("Status updated to: {status}"), false).await;
            }
            BotCommand::ReloadGrounding => self.reload_grounding(ctx, command).await,
            BotCommand::Join => self.join(ctx, command).await,
            BotCommand::Leave => self.leave(ctx, command).await,
        }
    }

    async fn translate(&self, ctx: &Context, command: &CommandInteraction, text: &str) {
        if let Err(err) = command.defer(&ctx.http).await {
            error!("Cannot defer /translate: {err:?}");
            return;
        }
        let content = match self.orchestrator.one_shot(&commands::translation_prompt(text)).await {
            Ok(translation) => truncate_chars(&format!("Translation: {translation}"), DISCORD_MESSAGE_LIMIT),
            Err(err) => {
                error!("Translation error: {err}");
                "An error occurred during translation. Please try again later.".to_string()
            }
        };
        if let Err(err) = command
            .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
            .await
        {
            error!("Cannot send translation: {err:?}");
        }
    }

    async fn start_trivia(&self, ctx: &Context, command: &CommandInteraction, topic: String) {
        let channel = DiscordChannel {
            http: ctx.http.clone(),
            channel_id: command.channel_id,
        };
        let started = trivia::start_game(
            self.games.clone(),
            command.channel_id.get(),
            topic.clone(),
            TriviaSettings::default(),
            self.model.clone(),
            channel,
        );
        let (text, ephemeral) = match started {
            Ok(_) => (format!("Trivia on **{topic}** requested by <@{}>.", command.user.id), false),
            Err(err) => (err.to_string(), true),
        };
        self.reply(ctx, command, text, ephemeral).await;
    }

    async fn reload_grounding(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(retriever) = &self.retriever else {
            let text = "Grounding is currently disabled. Enable it in the configuration to use this feature.";
            self.reply(ctx, command, text.to_string(), false).await;
            return;
        };
        let text = match retriever.reload().await {
            Ok(count) => {
                self.health.set_grounding_loaded(true);
                format!("Grounding data reloaded. {count} files loaded.")
            }
            Err(err) => {
                error!("Error reloading grounding data: {err}");
                "An error occurred while reloading grounding data. Please check the logs.".to_string()
            }
        };
        self.reply(ctx, command, text, false).await;
    }

    async fn join(&self, ctx: &Context, command: &CommandInteraction) {
        if let Err(retry) = self.join_cooldown.check(command.user.id.get()) {
            let text = format!("This command is on cooldown. Try again in {:.1}s.", retry.as_secs_f64());
            self.reply(ctx, command, text, true).await;
            return;
        }
        let Some(guild_id) = command.guild_id else {
            self.reply(ctx, command, "This command only works in a server.".to_string(), true).await;
            return;
        };
        let user_channel = guild_id.to_guild_cached(&ctx.cache).and_then(|guild| {
            guild
                .voice_states
                .get(&command.user.id)
                .and_then(|state| state.channel_id)
        });
        let Some(voice_channel) = user_channel else {
            let text = "You need to be in a voice channel to use this command.";
            self.reply(ctx, command, text.to_string(), true).await;
            return;
        };

        let joined = match Voice::from_context(ctx).await {
            Ok(voice) => voice.join(guild_id, voice_channel).await,
            Err(err) => Err(err),
        };
        let text = match joined {
            Ok(()) => format!("Joined <#{voice_channel}>"),
            Err(err) => {
                error!("Error joining voice channel: {err}");
                "I couldn't join the voice channel. Please check my permissions.".to_string()
            }
        };
        self.reply(ctx, command, text, false).await;
    }

    async fn leave(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(guild_id) = command.guild_id else {
            self.reply(ctx, command, "I'm not in a voice channel.".to_string(), true).await;
            return;
        };
        let left = match Voice::from_context(ctx).await {
            Ok(voice) => voice.leave(guild_id).await,
            Err(err) => Err(err),
        };
        let text = match left {
            Ok(true) => "Left the voice channel.",
            Ok(false) => "I'm not in a voice channel.",
            Err(err) => {
                error!("Error leaving voice channel: {err}");
                "I couldn't leave the voice channel."
            }
        };
        self.reply(ctx, command, text.to_string(), false).await;
    }

    async fn reply(&self, ctx: &Context, command: &CommandInteraction, content: String, ephemeral: bool) {
        let resp = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(ephemeral),
        );
        if let Err(err) = command.create_response(&ctx.http, resp).await {
            error!("Cannot respond to /{}: {err:?}", command.data.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_stage_counts_as_up() {
        assert!(gateway_connected(ConnectionStage::Connected));
        for stage in [
            ConnectionStage::Connecting,
            ConnectionStage::Disconnected,
            ConnectionStage::Handshake,
            ConnectionStage::Identifying,
            ConnectionStage::Resuming,
        ] {
            assert!(!gateway_connected(stage), "{stage:?}");
        }
    }
}
