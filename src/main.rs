use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dotenv::dotenv;
use serenity::prelude::*;
use songbird::SerenityInit;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use parley::{
    access::AccessPolicy,
    config::Config,
    cooldown::Cooldown,
    governor::RateGovernor,
    grounding::{self, Retriever},
    handler::Handler,
    health::HealthChecker,
    history::ConversationStore,
    llm::{GovernedModel, HttpChatModel},
    metrics::{self, MetricsRegistry},
    orchestrator::ResponseOrchestrator,
    speech::{OpenAiSpeech, SpeechSynthesizer},
    trivia::ActiveGames,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = match Config::from_env() {
        Ok(cfg) => Arc::new(cfg),
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    let handler = match build_handler(cfg.clone()) {
        Ok(handler) => handler,
        Err(err) => {
            error!("Failed to initialise bot: {err}");
            std::process::exit(1);
        }
    };

    if let Some(port) = cfg.metrics_port {
        let registry = Arc::new(MetricsRegistry::new());
        tokio::spawn(metrics::serve(port, registry, handler.health.clone()));
    }

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT;

    info!(provider = %cfg.llm_provider, model = %cfg.llm_model, "Starting bot");
    let mut client = match Client::builder(&cfg.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
    {
        Ok(client) => client,
        Err(err) => {
            error!("Error creating Discord client: {err:?}");
            std::process::exit(1);
        }
    };

    if let Err(err) = client.start().await {
        error!("Client error: {err:?}");
    }
}

fn build_handler(cfg: Arc<Config>) -> parley::error::Result<Handler> {
    let governor = Arc::new(RateGovernor::new(cfg.max_requests, cfg.request_window));
    let model = GovernedModel::new(
        Arc::new(HttpChatModel::from_config(&cfg)?),
        governor,
        cfg.model_settings.clone(),
    );
    let retriever: Option<Arc<dyn Retriever>> = grounding::from_config(&cfg).map(Arc::from);
    let history = Arc::new(ConversationStore::new(cfg.max_messages));
    let orchestrator = Arc::new(ResponseOrchestrator::new(
        history,
        model.clone(),
        retriever.clone(),
        cfg.system_prompt.clone(),
        cfg.max_text,
    ));

    let speech: Option<Arc<dyn SpeechSynthesizer>> = match OpenAiSpeech::from_config(&cfg.tts) {
        Ok(speech) => Some(Arc::new(speech)),
        Err(err) => {
            warn!("Text-to-Speech unavailable: {err}");
            None
        }
    };

    Ok(Handler {
        access: AccessPolicy::new(cfg.allowed_channel_ids.clone(), cfg.allowed_role_ids.clone()),
        orchestrator,
        model,
        games: Arc::new(ActiveGames::new()),
        health: Arc::new(HealthChecker::new(retriever.is_some())),
        retriever,
        speech,
        tts_enabled: AtomicBool::new(cfg.tts.enabled),
        join_cooldown: Cooldown::new(cfg.cooldown_rate, cfg.cooldown_per),
        cfg,
    })
}
