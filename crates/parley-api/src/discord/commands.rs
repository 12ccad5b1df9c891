//! Slash command definitions and argument parsing.
//!
//! Serenity's interaction payload is flattened into [`CommandArgs`] first so
//! parsing into a [`SlashCommand`] stays independent of the gateway types.

use std::collections::HashMap;

use secrecy::SecretString;
use serenity::all::{
    CommandDataOptionValue, CommandInteraction, CommandOptionType, CreateCommand,
    CreateCommandOption, Permissions,
};

use parley_core::service::AdminError;
use parley_types::channel::{ChannelToggle, ChatModel};
use parley_types::chat::Attachment;

/// A resolved option value.
#[derive(Debug, Clone)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Attachment(Attachment),
}

/// Options of one invocation, keyed by option name.
#[derive(Debug, Default)]
pub struct CommandArgs(HashMap<String, ArgValue>);

impl CommandArgs {
    pub fn from_interaction(command: &CommandInteraction) -> Self {
        let mut args = HashMap::new();
        for option in &command.data.options {
            let value = match &option.value {
                CommandDataOptionValue::String(s) => ArgValue::String(s.clone()),
                CommandDataOptionValue::Integer(i) => ArgValue::Integer(*i),
                CommandDataOptionValue::Attachment(id) => {
                    match command.data.resolved.attachments.get(id) {
                        Some(a) => ArgValue::Attachment(Attachment {
                            filename: a.filename.clone(),
                            url: a.url.clone(),
                        }),
                        None => continue,
                    }
                }
                _ => continue,
            };
            args.insert(option.name.clone(), value);
        }
        Self(args)
    }

    pub fn insert(&mut self, name: &str, value: ArgValue) {
        self.0.insert(name.to_string(), value);
    }

    fn string(&self, name: &str) -> Option<&str> {
        match self.0.get(name) {
            Some(ArgValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn required_string(&self, name: &str) -> Result<&str, String> {
        self.string(name)
            .ok_or_else(|| format!("missing option `{name}`"))
    }

    fn positive(&self, name: &str) -> Result<u32, String> {
        match self.0.get(name) {
            Some(ArgValue::Integer(i)) => u32::try_from(*i)
                .ok()
                .filter(|v| *v >= 1)
                .ok_or_else(|| format!("`{name}` must be between 1 and {}", u32::MAX)),
            _ => Err(format!("missing option `{name}`")),
        }
    }

    fn attachment(&self, name: &str) -> Option<Attachment> {
        match self.0.get(name) {
            Some(ArgValue::Attachment(a)) => Some(a.clone()),
            _ => None,
        }
    }
}

/// A parsed slash command.
#[derive(Debug)]
pub enum SlashCommand {
    Say {
        message: String,
        image: Option<Attachment>,
    },
    Stop,
    Reset,
    Activate {
        prompt: Option<String>,
    },
    Deactivate,
    SetSystemPrompt {
        prompt: String,
    },
    ShowSystemPrompt,
    SetModel {
        model: ChatModel,
    },
    SetCompletionMarker {
        marker: String,
    },
    SetMaxTurns {
        turns: u32,
    },
    SetResetDelta {
        seconds: u32,
    },
    Toggle {
        setting: ChannelToggle,
    },
    Init {
        api_key: SecretString,
    },
    Revoke,
}

impl SlashCommand {
    pub fn parse(name: &str, args: &CommandArgs) -> Result<Self, String> {
        let command = match name {
            "say" => SlashCommand::Say {
                message: args.required_string("message")?.to_string(),
                image: args.attachment("image"),
            },
            "stop" => SlashCommand::Stop,
            "reset" => SlashCommand::Reset,
            "activate" => SlashCommand::Activate {
                prompt: args.string("prompt").map(str::to_string),
            },
            "deactivate" => SlashCommand::Deactivate,
            "set-system-prompt" => SlashCommand::SetSystemPrompt {
                prompt: args.required_string("prompt")?.to_string(),
            },
            "show-system-prompt" => SlashCommand::ShowSystemPrompt,
            "set-model" => SlashCommand::SetModel {
                model: args.required_string("model")?.parse()?,
            },
            "set-completion-marker" => SlashCommand::SetCompletionMarker {
                marker: args.required_string("emoji")?.to_string(),
            },
            "set-max-turns" => SlashCommand::SetMaxTurns {
                turns: args.positive("turns")?,
            },
            "set-reset-delta" => SlashCommand::SetResetDelta {
                seconds: args.positive("seconds")?,
            },
            "toggle" => SlashCommand::Toggle {
                setting: args.required_string("setting")?.parse()?,
            },
            "init" => SlashCommand::Init {
                api_key: SecretString::from(args.required_string("api-key")?.to_string()),
            },
            "revoke" => SlashCommand::Revoke,
            other => return Err(format!("unknown command `{other}`")),
        };
        Ok(command)
    }

    /// Commands only server administrators may run.
    pub fn requires_admin(&self) -> bool {
        !matches!(
            self,
            SlashCommand::Say { .. }
                | SlashCommand::Stop
                | SlashCommand::Reset
                | SlashCommand::ShowSystemPrompt
        )
    }

    /// Whether a successful run changes channel configuration.
    pub fn mutates_channel(&self) -> bool {
        matches!(
            self,
            SlashCommand::Activate { .. }
                | SlashCommand::Deactivate
                | SlashCommand::SetSystemPrompt { .. }
                | SlashCommand::SetModel { .. }
                | SlashCommand::SetCompletionMarker { .. }
                | SlashCommand::SetMaxTurns { .. }
                | SlashCommand::SetResetDelta { .. }
                | SlashCommand::Toggle { .. }
        )
    }
}

/// Every slash command the bot registers.
pub fn definitions() -> Vec<CreateCommand> {
    let admin = |command: CreateCommand| command.default_member_permissions(Permissions::ADMINISTRATOR);

    let mut model_option =
        CreateCommandOption::new(CommandOptionType::String, "model", "Completion model").required(true);
    for model in ChatModel::ALL {
        model_option = model_option.add_string_choice(model.api_name(), model.api_name());
    }

    vec![
        CreateCommand::new("say")
            .description("Talk to the assistant in this channel")
            .add_option(
                CreateCommandOption::new(CommandOptionType::String, "message", "What to say")
                    .required(true),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::Attachment,
                "image",
                "Image to include (png, jpg, gif)",
            )),
        CreateCommand::new("stop").description("Stop the reply currently being written"),
        CreateCommand::new("reset").description("Clear this channel's conversation history"),
        admin(
            CreateCommand::new("activate")
                .description("Enable the assistant in this channel")
                .add_option(CreateCommandOption::new(
                    CommandOptionType::String,
                    "prompt",
                    "System prompt (change later with /set-system-prompt)",
                )),
        ),
        admin(CreateCommand::new("deactivate").description("Disable the assistant in this channel")),
        admin(
            CreateCommand::new("set-system-prompt")
                .description("Change this channel's system prompt")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::String, "prompt", "New system prompt")
                        .required(true),
                ),
        ),
        CreateCommand::new("show-system-prompt").description("Show this channel's system prompt"),
        admin(
            CreateCommand::new("set-model")
                .description("Change the model used in this channel")
                .add_option(model_option),
        ),
        admin(
            CreateCommand::new("set-completion-marker")
                .description("Change the reaction added to finished replies")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::String, "emoji", "Unicode or server emoji")
                        .required(true),
                ),
        ),
        admin(
            CreateCommand::new("set-max-turns")
                .description("Replies kept before the history resets")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::Integer, "turns", "Number of replies")
                        .required(true)
                        .min_int_value(1),
                ),
        ),
        admin(
            CreateCommand::new("set-reset-delta")
                .description("Idle time before the history resets")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::Integer, "seconds", "Idle seconds")
                        .required(true)
                        .min_int_value(1),
                ),
        ),
        admin(
            CreateCommand::new("toggle")
                .description("Flip a channel setting")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::String, "setting", "Setting to flip")
                        .required(true)
                        .add_string_choice("Chat enabled", ChannelToggle::Enabled.to_string())
                        .add_string_choice(
                            "Keep recent messages on reset",
                            ChannelToggle::InheritOnReset.to_string(),
                        ),
                ),
        ),
        admin(
            CreateCommand::new("init")
                .description("Set or replace this server's OpenAI API key")
                .add_option(
                    CreateCommandOption::new(CommandOptionType::String, "api-key", "OpenAI API key")
                        .required(true),
                ),
        ),
        admin(
            CreateCommand::new("revoke")
                .description("Remove this server's API key and every active channel"),
        ),
    ]
}

/// Text shown to an administrator when a command fails.
pub fn admin_error_text(err: &AdminError) -> String {
    match err {
        AdminError::AlreadyActive => {
            "This channel is already active. Use /set-system-prompt, /set-model, \
             /set-completion-marker or /toggle to change it."
                .to_string()
        }
        AdminError::NotActive => "This channel is not active. Run /activate first.".to_string(),
        AdminError::InvalidApiKey => {
            "That does not look like an OpenAI API key (expected `sk-...`).".to_string()
        }
        AdminError::InvalidValue(msg) => format!("Invalid value: {msg}"),
        AdminError::Crypto(_) | AdminError::Repository(_) => {
            format!("❗ Unexpected error, contact the bot owner:\n```\n{err}\n```")
        }
    }
}
