//! Channel trivia games driven by the chat model.

mod game;
mod question;
mod registry;
mod summary;

pub use game::{start_game, GameChannel, GameOutcome, GameState, TriviaGame, TriviaSettings};
pub use question::{AnswerCheck, TriviaQuestion};
pub use registry::{ActiveGames, PlayerMessage, StartError, StopError};
pub use summary::{GameSummary, PlayerScore, Scoreboard};
