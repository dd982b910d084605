//! The timed multi-round quiz.
//!
//! A game moves through `Lobby -> AskingQuestion -> CollectingAnswers ->
//! RoundComplete`, looping back to `AskingQuestion` until the round budget is
//! spent (`GameComplete`) or an administrator cancels it (`Stopped`). Only
//! the natural end posts a scoreboard.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::question::{generation_prompt, AnswerCheck, TriviaQuestion};
use super::registry::{ActiveGames, GameSession, PlayerMessage, StartError};
use super::summary::{GameSummary, Scoreboard};
use crate::error::Result;
use crate::history::ChatTurn;
use crate::llm::GovernedModel;
use crate::metrics::{TRIVIA_GAMES_COMPLETED, TRIVIA_GAMES_STARTED, TRIVIA_GAMES_STOPPED, TRIVIA_ROUNDS_SKIPPED};

const HOST_PROMPT: &str = "You are a trivia host. Follow the requested output format exactly and \
                           make sure exactly one option is correct.";

#[derive(Debug, Clone)]
pub struct TriviaSettings {
    pub max_rounds: u32,
    pub answer_window: Duration,
    pub pacing: Duration,
    pub generation_attempts: u32,
}

impl Default for TriviaSettings {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            answer_window: Duration::from_secs(15),
            pacing: Duration::from_secs(2),
            generation_attempts: 5,
        }
    }
}

/// Where the game posts its messages.
#[async_trait]
pub trait GameChannel: Send + Sync {
    async fn send(&self, text: String) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Lobby,
    AskingQuestion,
    CollectingAnswers,
    RoundComplete,
    GameComplete,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameOutcome {
    Completed(GameSummary),
    Stopped { rounds_played: u32 },
}

enum Generation {
    Ready(TriviaQuestion),
    Exhausted,
    Cancelled,
}

enum Collect {
    Message(Option<PlayerMessage>),
    TimeUp,
    Cancelled,
}

pub struct TriviaGame<C> {
    topic: String,
    settings: TriviaSettings,
    state: GameState,
    round: u32,
    asked: Vec<String>,
    scoreboard: Scoreboard,
    current: Option<TriviaQuestion>,
    answered: HashSet<u64>,

    model: GovernedModel,
    channel: C,
    registry: Arc<ActiveGames>,
    session_id: uuid::Uuid,
    channel_id: u64,
    inputs: mpsc::Receiver<PlayerMessage>,
    cancel: CancellationToken,
}

impl<C: GameChannel> TriviaGame<C> {
    pub fn new(
        topic: String,
        settings: TriviaSettings,
        model: GovernedModel,
        channel: C,
        registry: Arc<ActiveGames>,
        session: GameSession,
    ) -> Self {
        Self {
            topic,
            settings,
            state: GameState::Lobby,
            round: 0,
            asked: Vec::new(),
            scoreboard: Scoreboard::default(),
            current: None,
            answered: HashSet::new(),
            model,
            channel,
            registry,
            session_id: session.id,
            channel_id: session.channel_id,
            inputs: session.inputs,
            cancel: session.cancel,
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    /// Plays every round and releases the channel's registry slot on exit.
    pub async fn run(mut self) -> GameOutcome {
        TRIVIA_GAMES_STARTED.inc();
        info!(channel_id = self.channel_id, topic = %self.topic, "Trivia game starting");

        let outcome = self.play().await;
        self.registry.finish(self.channel_id, self.session_id);

        match &outcome {
            GameOutcome::Completed(_) => TRIVIA_GAMES_COMPLETED.inc(),
            GameOutcome::Stopped { .. } => TRIVIA_GAMES_STOPPED.inc(),
        }
        info!(channel_id = self.channel_id, state = ?self.state, rounds = self.round, "Trivia game over");
        outcome
    }

    async fn play(&mut self) -> GameOutcome {
        self.say(format!("Starting a trivia game on the topic of {}! Get ready!", self.topic))
            .await;
        if !self.pause().await {
            return self.stopped();
        }

        while self.round < self.settings.max_rounds {
            if self.cancel.is_cancelled() {
                return self.stopped();
            }
            self.round += 1;
            self.state = GameState::AskingQuestion;

            let question = match self.generate_question().await {
                Generation::Ready(question) => question,
                Generation::Cancelled => return self.stopped(),
                Generation::Exhausted => {
                    TRIVIA_ROUNDS_SKIPPED.inc();
                    warn!(channel_id = self.channel_id, round = self.round, "Skipping round, no usable question");
                    self.say(format!(
                        "Error generating question: couldn't come up with a new question about {} after {} attempts. Skipping round {}.",
                        self.topic, self.settings.generation_attempts, self.round
                    ))
                    .await;
                    continue;
                }
            };

            // Anything typed between rounds is not an answer to this question.
            while self.inputs.try_recv().is_ok() {}

            self.say(question.render(self.round)).await;
            let reveal = question.correct_option();
            self.current = Some(question);
            self.answered.clear();
            self.state = GameState::CollectingAnswers;

            if !self.collect_answers().await {
                return self.stopped();
            }

            self.state = GameState::RoundComplete;
            self.current = None;
            self.say(format!("Time's up! The correct answer was: {reveal}")).await;

            if !self.pause().await {
                return self.stopped();
            }
        }

        self.state = GameState::GameComplete;
        let summary = GameSummary::new(&self.topic, self.round, &self.scoreboard);
        for message in summary.render() {
            self.say(message).await;
        }
        GameOutcome::Completed(summary)
    }

    fn stopped(&mut self) -> GameOutcome {
        self.state = GameState::Stopped;
        GameOutcome::Stopped {
            rounds_played: self.round,
        }
    }

    /// Inter-round delay. Returns false if the game was cancelled meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.settings.pacing) => true,
        }
    }

    async fn generate_question(&mut self) -> Generation {
        for attempt in 1..=self.settings.generation_attempts {
            let prompt = generation_prompt(&self.topic, self.round, self.settings.max_rounds, &self.asked);
            let messages = [ChatTurn::user(prompt)];

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Generation::Cancelled,
                response = self.model.complete(HOST_PROMPT, &messages) => response,
            };

            match response.and_then(|text| TriviaQuestion::parse(&text)) {
                Ok(question) if self.asked.contains(&question.text) => {
                    debug!(round = self.round, attempt, "Model repeated an earlier question");
                }
                Ok(question) => {
                    self.asked.push(question.text.clone());
                    return Generation::Ready(question);
                }
                Err(err) => {
                    debug!(round = self.round, attempt, error = %err, "Unusable question");
                }
            }
        }
        Generation::Exhausted
    }

    /// Runs the answer window. Returns false if the game was cancelled.
    async fn collect_answers(&mut self) -> bool {
        let deadline = Instant::now() + self.settings.answer_window;
        let mut inputs_open = true;

        loop {
            let cancel = self.cancel.clone();
            let inputs = &mut self.inputs;
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => Collect::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Collect::TimeUp,
                message = inputs.recv(), if inputs_open => Collect::Message(message),
            };

            match event {
                Collect::Cancelled => return false,
                Collect::TimeUp => return true,
                Collect::Message(None) => inputs_open = false,
                Collect::Message(Some(message)) => self.handle_answer(message).await,
            }
        }
    }

    async fn handle_answer(&mut self, message: PlayerMessage) {
        if message.author_is_bot || self.answered.contains(&message.author_id) {
            return;
        }
        let Some(question) = &self.current else {
            return;
        };

        let mention = format!("<@{}>", message.author_id);
        match question.check(&message.content) {
            AnswerCheck::Invalid => {
                self.say(format!("{mention}, please answer with a single letter: A, B, C or D."))
                    .await;
            }
            AnswerCheck::Correct => {
                self.answered.insert(message.author_id);
                self.scoreboard.award(message.author_id, &message.author_name);
                self.say(format!("Correct, {mention}!")).await;
            }
            AnswerCheck::Incorrect => {
                self.answered.insert(message.author_id);
                self.say(format!("Sorry {mention}, that's incorrect.")).await;
            }
        }
    }

    async fn say(&self, text: String) {
        if let Err(err) = self.channel.send(text).await {
            warn!(channel_id = self.channel_id, error = %err, "Failed to post trivia message");
        }
    }
}

/// Registers a game for `channel_id` and runs it in the background.
pub fn start_game<C: GameChannel + 'static>(
    registry: Arc<ActiveGames>,
    channel_id: u64,
    topic: String,
    settings: TriviaSettings,
    model: GovernedModel,
    channel: C,
) -> std::result::Result<tokio::task::JoinHandle<GameOutcome>, StartError> {
    let session = registry.start(channel_id)?;
    let game = TriviaGame::new(topic, settings, model, channel, registry, session);
    Ok(tokio::spawn(game.run()))
}
