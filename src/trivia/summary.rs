#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerScore {
    pub player_id: u64,
    pub name: String,
    pub score: u32,
}

/// Points per player, in the order players first scored.
#[derive(Debug, Default)]
pub struct Scoreboard {
    entries: Vec<PlayerScore>,
}

impl Scoreboard {
    pub fn award(&mut self, player_id: u64, name: &str) {
        match self.entries.iter_mut().find(|e| e.player_id == player_id) {
            Some(entry) => entry.score += 1,
            None => self.entries.push(PlayerScore {
                player_id,
                name: name.to_string(),
                score: 1,
            }),
        }
    }

    pub fn score_of(&self, player_id: u64) -> u32 {
        self.entries
            .iter()
            .find(|e| e.player_id == player_id)
            .map(|e| e.score)
            .unwrap_or(0)
    }

    /// Highest score first; equal scores keep first-scored order.
    pub fn standings(&self) -> Vec<PlayerScore> {
        let mut standings = self.entries.clone();
        standings.sort_by(|a, b| b.score.cmp(&a.score));
        standings
    }
}

/// End-of-game report for a game that ran all of its rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSummary {
    pub topic: String,
    pub rounds: u32,
    pub standings: Vec<PlayerScore>,
}

impl GameSummary {
    pub fn new(topic: &str, rounds: u32, scoreboard: &Scoreboard) -> Self {
        Self {
            topic: topic.to_string(),
            rounds,
            standings: scoreboard.standings(),
        }
    }

    pub fn winner(&self) -> Option<&PlayerScore> {
        self.standings.first()
    }

    pub fn average_score(&self) -> f64 {
        if self.standings.is_empty() {
            return 0.0;
        }
        let total: u32 = self.standings.iter().map(|p| p.score).sum();
        f64::from(total) / self.standings.len() as f64
    }

    /// Messages to post, in order.
    pub fn render(&self) -> Vec<String> {
        let Some(winner) = self.winner() else {
            return vec!["The trivia game has ended. No one scored any points!".to_string()];
        };

        let announcement = format!(
            "The trivia game has ended! The winner is <@{}> with {}!",
            winner.player_id,
            points(winner.score)
        );

        let mut board = String::from("**Final Scores:**\n");
        for (rank, player) in self.standings.iter().enumerate() {
            board.push_str(&format!("{}. {}: {}\n", rank + 1, player.name, points(player.score)));
        }
        board.push_str("\n**Game Statistics:**\n");
        board.push_str(&format!("Topic: {}\n", self.topic));
        board.push_str(&format!("Total Rounds: {}\n", self.rounds));
        board.push_str(&format!("Total Players: {}\n", self.standings.len()));
        board.push_str(&format!("Average Score: {:.2}", self.average_score()));

        vec![announcement, board]
    }
}

fn points(score: u32) -> String {
    if score == 1 {
        "1 point".to_string()
    } else {
        format!("{score} points")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standings_sort_by_score_then_first_scored() {
        let mut board = Scoreboard::default();
        board.award(1, "alice");
        board.award(2, "bob");
        board.award(3, "carol");
        board.award(3, "carol");
        board.award(2, "bob");

        let order: Vec<u64> = board.standings().iter().map(|p| p.player_id).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(board.score_of(3), 2);
        assert_eq!(board.score_of(99), 0);
    }

    #[test]
    fn no_scores_renders_single_notice() {
        let summary = GameSummary::new("capitals", 5, &Scoreboard::default());
        assert_eq!(
            summary.render(),
            vec!["The trivia game has ended. No one scored any points!"]
        );
    }

    #[test]
    fn scoreboard_lists_everyone_with_statistics() {
        let mut board = Scoreboard::default();
        board.award(1, "alice");
        board.award(1, "alice");
        board.award(2, "bob");

        let summary = GameSummary::new("rivers", 5, &board);
        let messages = summary.render();
        assert_eq!(messages[0], "The trivia game has ended! The winner is <@1> with 2 points!");
        assert!(messages[1].contains("1. alice: 2 points\n2. bob: 1 point\n"));
        assert!(messages[1].contains("Total Rounds: 5"));
        assert!(messages[1].contains("Total Players: 2"));
        assert!(messages[1].contains("Average Score: 1.50"));
    }
}
