use regex::Regex;

use crate::error::{BotError, Result};

pub const OPTION_LABELS: [char; 4] = ['A', 'B', 'C', 'D'];

lazy_static::lazy_static! {
    static ref QUESTION_LINE: Regex = Regex::new(r"(?mi)^\s*\**question\**\s*(?:\d+\s*)?[:.]\**\s*(.+?)\s*$").unwrap();
    static ref OPTION_LINE: Regex = Regex::new(r"(?m)^\s*\(?([A-Da-d])[).:\]]\s*(.+?)\s*$").unwrap();
    static ref ANSWER_LINE: Regex = Regex::new(r"(?mi)^\s*\**(?:correct\s+)?answer\**\s*[:.]\**\s*\(?([A-D])\b").unwrap();
}

/// A generated multiple-choice question with exactly four options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriviaQuestion {
    pub text: String,
    /// Option texts in label order A-D.
    pub options: [String; 4],
    pub correct_label: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerCheck {
    Correct,
    Incorrect,
    /// Not a single letter A-D. Does not use up the player's attempt.
    Invalid,
}

impl TriviaQuestion {
    /// Extracts a question from model output. Anything that does not carry a
    /// question line, four labelled options and an answer letter is rejected.
    pub fn parse(response: &str) -> Result<Self> {
        let text = QUESTION_LINE
            .captures(response)
            .map(|caps| caps[1].trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| BotError::Generation("no question line".into()))?;

        let mut options: [Option<String>; 4] = Default::default();
        for caps in OPTION_LINE.captures_iter(response) {
            let label = caps[1].to_ascii_uppercase().chars().next().unwrap_or('?');
            let Some(slot) = OPTION_LABELS.iter().position(|l| *l == label) else {
                continue;
            };
            if options[slot].is_none() {
                options[slot] = Some(caps[2].to_string());
            }
        }
        let [Some(a), Some(b), Some(c), Some(d)] = options else {
            return Err(BotError::Generation("expected four options A-D".into()));
        };

        let correct_label = ANSWER_LINE
            .captures(response)
            .and_then(|caps| caps[1].to_ascii_uppercase().chars().next())
            .ok_or_else(|| BotError::Generation("no answer letter".into()))?;

        Ok(Self {
            text,
            options: [a, b, c, d],
            correct_label,
        })
    }

    pub fn check(&self, content: &str) -> AnswerCheck {
        let trimmed = content.trim();
        let mut chars = trimmed.chars();
        let (Some(letter), None) = (chars.next(), chars.next()) else {
            return AnswerCheck::Invalid;
        };
        let letter = letter.to_ascii_uppercase();
        if !OPTION_LABELS.contains(&letter) {
            AnswerCheck::Invalid
        } else if letter == self.correct_label {
            AnswerCheck::Correct
        } else {
            AnswerCheck::Incorrect
        }
    }

    /// `"B) Paris"`
    pub fn correct_option(&self) -> String {
        let slot = OPTION_LABELS
            .iter()
            .position(|l| *l == self.correct_label)
            .unwrap_or(0);
        format!("{}) {}", self.correct_label, self.options[slot])
    }

    pub fn render(&self, round: u32) -> String {
        let options = OPTION_LABELS
            .iter()
            .zip(&self.options)
            .map(|(label, text)| format!("{label}) {text}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("**Question {round}:** {}\n{options}\nReply with A, B, C or D.", self.text)
    }
}

/// Prompt asking the model for one more question on `topic`.
pub fn generation_prompt(topic: &str, round: u32, max_rounds: u32, asked: &[String]) -> String {
    let previous = if asked.is_empty() {
        "none".to_string()
    } else {
        asked.join(" | ")
    };
    format!(
        "Generate a unique multiple-choice trivia question about {topic}. \
         This is question number {round} out of {max_rounds}. \
         It must be different from these previously asked questions: {previous}. \
         Reply in exactly this format:\n\
         Question: [question]\n\
         A) [option]\n\
         B) [option]\n\
         C) [option]\n\
         D) [option]\n\
         Answer: [letter of the correct option]"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const WELL_FORMED: &str = "Question: What is the capital of France?\n\
                               A) Berlin\nB) Paris\nC) Rome\nD) Madrid\nAnswer: B";

    #[test]
    fn parses_well_formed_question() {
        let q = TriviaQuestion::parse(WELL_FORMED).unwrap();
        assert_eq!(q.text, "What is the capital of France?");
        assert_eq!(q.options[1], "Paris");
        assert_eq!(q.correct_label, 'B');
        assert_eq!(q.correct_option(), "B) Paris");
    }

    #[test]
    fn tolerates_chatty_models() {
        let response = "Sure! Here's one.\n\n**Question:** Which planet is largest?\n\
                        a. Mars\nb. Jupiter\nc. Venus\nd. Earth\n\n**Answer:** b) Jupiter";
        let q = TriviaQuestion::parse(response).unwrap();
        assert_eq!(q.text, "Which planet is largest?");
        assert_eq!(q.options, ["Mars", "Jupiter", "Venus", "Earth"].map(String::from));
        assert_eq!(q.correct_label, 'B');

        let response = response.replace("**Answer:** b) Jupiter", "Correct answer: (D)");
        assert_eq!(TriviaQuestion::parse(&response).unwrap().correct_label, 'D');
    }

    #[test]
    fn rejects_missing_options() {
        let response = "Question: 2 + 2?\nA) 3\nB) 4\nC) 5\nAnswer: B";
        assert!(matches!(TriviaQuestion::parse(response), Err(BotError::Generation(_))));
    }

    #[test]
    fn rejects_free_text_answers() {
        let response = "Question: Capital of Japan?\nAnswer: Tokyo";
        assert!(TriviaQuestion::parse(response).is_err());
    }

    #[test]
    fn checks_answers_case_insensitively() {
        let q = TriviaQuestion::parse(WELL_FORMED).unwrap();
        assert_eq!(q.check("b"), AnswerCheck::Correct);
        assert_eq!(q.check(" B "), AnswerCheck::Correct);
        assert_eq!(q.check("a"), AnswerCheck::Incorrect);
        assert_eq!(q.check("E"), AnswerCheck::Invalid);
        assert_eq!(q.check("Paris"), AnswerCheck::Invalid);
        assert_eq!(q.check(""), AnswerCheck::Invalid);
    }

    #[test]
    fn render_lists_options_in_order() {
        let q = TriviaQuestion::parse(WELL_FORMED).unwrap();
        let text = q.render(3);
        assert!(text.starts_with("**Question 3:** What is the capital of France?"));
        assert!(text.contains("A) Berlin\nB) Paris\nC) Rome\nD) Madrid"));
    }

    #[test]
    fn prompt_lists_previous_questions() {
        let asked = vec!["Q one?".to_string(), "Q two?".to_string()];
        let prompt = generation_prompt("capitals", 3, 5, &asked);
        assert!(prompt.contains("about capitals"));
        assert!(prompt.contains("number 3 out of 5"));
        assert!(prompt.contains("Q one? | Q two?"));
    }
}
