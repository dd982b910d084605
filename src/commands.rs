use serenity::all::{CommandOptionType, CreateCommand, CreateCommandOption, Permissions};

use crate::config::{Config, LlmProvider, ModelSettings};

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    ChatHelp,
    Translate { text: String },
    Trivia { topic: String },
    TriviaStop,
    ClearHistory,
    LlmInfo,
    ToggleTts,
    SetStatus { status: String },
    ReloadGrounding,
    Join,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    MissingArgument(&'static str),
}

struct Spec {
    name: &'static str,
    description: &'static str,
    argument: Option<(&'static str, &'static str)>,
    admin: bool,
}

const COMMANDS: &[Spec] = &[
    Spec { name: "chathelp", description: "Display help information for the chat commands", argument: None, admin: false },
    Spec { name: "translate", description: "Translate text to English", argument: Some(("text", "Text to translate")), admin: false },
    Spec { name: "trivia", description: "Start a trivia game", argument: Some(("topic", "Topic of the questions")), admin: false },
    Spec { name: "trivia_stop", description: "Stop the trivia game in this channel", argument: None, admin: true },
    Spec { name: "clear_history", description: "Clear conversation history for this channel", argument: None, admin: true },
    Spec { name: "llm_info", description: "Display current LLM information", argument: None, admin: true },
    Spec { name: "toggle_tts", description: "Toggle Text-to-Speech on/off", argument: None, admin: true },
    Spec { name: "setstatus", description: "Set a new status for the bot", argument: Some(("status", "New status text")), admin: true },
    Spec { name: "reload_grounding", description: "Reload grounding data", argument: None, admin: true },
    Spec { name: "join", description: "Join your current voice channel", argument: None, admin: false },
    Spec { name: "leave", description: "Leave the current voice channel", argument: None, admin: false },
];

pub const ADMIN_ONLY: &str = "You need administrator permissions to use this command.";

/// Slash command registrations. Admin commands default to administrators only.
pub fn definitions() -> Vec<CreateCommand> {
    COMMANDS
        .iter()
        .map(|spec| {
            let mut cmd = CreateCommand::new(spec.name).description(spec.description);
            if let Some((arg, description)) = spec.argument {
                cmd = cmd.add_option(
                    CreateCommandOption::new(CommandOptionType::String, arg, description).required(true),
                );
            }
            if spec.admin {
                cmd = cmd.default_member_permissions(Permissions::ADMINISTRATOR);
            }
            cmd
        })
        .collect()
}

impl BotCommand {
    /// `argument` is the command's single string option, if it has one.
    pub fn parse(name: &str, argument: Option<&str>) -> Result<Self, ParseError> {
        let spec = COMMANDS
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| ParseError::Unknown(name.to_string()))?;

        let arg = match spec.argument {
            Some((arg_name, _)) => Some(
                argument
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .ok_or(ParseError::MissingArgument(arg_name))?
                    .to_string(),
            ),
            None => None,
        };

        Ok(match (name, arg) {
            ("translate", Some(text)) => Self::Translate { text },
            ("trivia", Some(topic)) => Self::Trivia { topic },
            ("setstatus", Some(status)) => Self::SetStatus { status },
            ("chathelp", _) => Self::ChatHelp,
            ("trivia_stop", _) => Self::TriviaStop,
            ("clear_history", _) => Self::ClearHistory,
            ("llm_info", _) => Self::LlmInfo,
            ("toggle_tts", _) => Self::ToggleTts,
            ("reload_grounding", _) => Self::ReloadGrounding,
            ("join", _) => Self::Join,
            ("leave", _) => Self::Leave,
            _ => return Err(ParseError::Unknown(name.to_string())),
        })
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::TriviaStop
                | Self::ClearHistory
                | Self::LlmInfo
                | Self::ToggleTts
                | Self::SetStatus { .. }
                | Self::ReloadGrounding
        )
    }
}

pub fn help_text() -> String {
    let mut text = String::from("**Chat Commands:**\n");
    for spec in COMMANDS {
        let usage = match spec.argument {
            Some((arg, _)) => format!("/{} <{}>", spec.name, arg),
            None => format!("/{}", spec.name),
        };
        let admin = if spec.admin { " (Admin only)" } else { "" };
        text.push_str(&format!("`{usage}` - {}{admin}\n", spec.description));
    }
    text.push_str("Mention the bot or DM it to start a conversation");
    text
}

pub fn translation_prompt(text: &str) -> String {
    format!("Translate the following text to English: {text}")
}

pub fn llm_info(cfg: &Config) -> String {
    let mut info = format!("LLM Type: {}\nLLM Model: {}\n", cfg.llm_provider, cfg.llm_model);
    if cfg.llm_provider == LlmProvider::Local {
        if let Some(url) = &cfg.local_llm_url {
            info.push_str(&format!("Local LLM URL: {url}\n"));
        }
    }
    info.push_str("LLM Settings:\n");
    info.push_str(&settings_lines(&cfg.model_settings).join("\n"));
    format!("Current LLM configuration:\n```\n{info}\n```")
}

fn settings_lines(settings: &ModelSettings) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(max_tokens) = settings.max_tokens {
        lines.push(format!("max_tokens: {max_tokens}"));
    }
    if let Some(temperature) = settings.temperature {
        lines.push(format!("temperature: {temperature}"));
    }
    for (key, value) in &settings.extra {
        match value.as_str() {
            Some(text) => lines.push(format!("{key}: {text}")),
            None => lines.push(format!("{key}: {value}")),
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_registered_command() {
        for spec in COMMANDS {
            let arg = spec.argument.map(|_| "value");
            assert!(BotCommand::parse(spec.name, arg).is_ok(), "{}", spec.name);
        }
        assert_eq!(definitions().len(), COMMANDS.len());
    }

    #[test]
    fn arguments_are_required_and_trimmed() {
        assert_eq!(
            BotCommand::parse("trivia", Some("  world capitals ")),
            Ok(BotCommand::Trivia { topic: "world capitals".into() })
        );
        assert_eq!(
            BotCommand::parse("translate", Some("   ")),
            Err(ParseError::MissingArgument("text"))
        );
        assert_eq!(BotCommand::parse("setstatus", None), Err(ParseError::MissingArgument("status")));
        assert_eq!(BotCommand::parse("dance", None), Err(ParseError::Unknown("dance".into())));
    }

    #[test]
    fn admin_flags_match_registrations() {
        for spec in COMMANDS {
            let cmd = BotCommand::parse(spec.name, spec.argument.map(|_| "x")).unwrap();
            assert_eq!(cmd.requires_admin(), spec.admin, "{}", spec.name);
        }
    }

    #[test]
    fn help_marks_admin_commands() {
        let help = help_text();
        assert!(help.starts_with("**Chat Commands:**\n"));
        assert!(help.contains("`/translate <text>` - Translate text to English\n"));
        assert!(help.contains("`/clear_history` - Clear conversation history for this channel (Admin only)\n"));
        assert!(help.ends_with("Mention the bot or DM it to start a conversation"));
    }

    #[test]
    fn settings_render_one_per_line() {
        let settings = ModelSettings::parse("max_tokens=256,temperature=0.5,stop=END").unwrap();
        assert_eq!(
            settings_lines(&settings),
            vec!["max_tokens: 256", "temperature: 0.5", "stop: END"]
        );
    }
}
