//! Discord gateway adapter using serenity.
//!
//! Registers the slash commands on ready, dispatches every command
//! interaction to the administration services or the chat coordinator, and
//! keeps the gateway client alive with exponential backoff.

pub mod commands;
pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::Client;
use serenity::all::{
    ChannelId, Command, CommandInteraction, Context, CreateInteractionResponse,
    CreateInteractionResponseMessage, EventHandler, GatewayIntents, GuildId, Interaction, Ready,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use parley_core::chat::ChatError;
use parley_core::chat::coordinator::ChatRequest;
use parley_core::chat::notice;
use parley_core::service::AdminError;
use parley_types::chat::Attachment;

use crate::state::{AppState, ConcreteCoordinator};

use self::commands::{CommandArgs, SlashCommand, admin_error_text};

/// Everything a command interaction can reach.
pub struct DiscordBot {
    state: AppState,
    coordinator: Arc<ConcreteCoordinator>,
}

impl DiscordBot {
    pub fn new(state: AppState, coordinator: ConcreteCoordinator) -> Self {
        Self {
            state,
            coordinator: Arc::new(coordinator),
        }
    }

    /// Register slash commands on the configured guild, or globally.
    async fn register_commands(&self, ctx: &Context) {
        let definitions = commands::definitions();

        if let Some(guild_id) = self.state.config.command_guild_id {
            // Guild-scoped: instant propagation
            match GuildId::new(guild_id).set_commands(&ctx.http, definitions).await {
                Ok(registered) => info!(guild_id, count = registered.len(), "registered guild slash commands"),
                Err(e) => warn!(guild_id, error = %e, "failed to register guild slash commands"),
            }
        } else {
            // Global: up to an hour to propagate
            match Command::set_global_commands(&ctx.http, definitions).await {
                Ok(registered) => info!(count = registered.len(), "registered global slash commands"),
                Err(e) => warn!(error = %e, "failed to register global slash commands"),
            }
        }
    }

    async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) {
        let Some(guild_id) = command.guild_id.map(|g| g.get()) else {
            respond(ctx, command, "Commands only work inside a server.", true).await;
            return;
        };
        let channel_id = command.channel_id.get();

        let parsed = match SlashCommand::parse(&command.data.name, &CommandArgs::from_interaction(command)) {
            Ok(parsed) => parsed,
            Err(msg) => {
                respond(ctx, command, &msg, true).await;
                return;
            }
        };
        debug!(guild_id, channel_id, command = %command.data.name, "slash command received");

        if parsed.requires_admin() && !is_administrator(command) {
            respond(ctx, command, "Only server administrators can use this command.", true).await;
            return;
        }

        if let SlashCommand::Say { message, image } = parsed {
            let request = ChatRequest {
                guild_id,
                channel_id,
                user_id: command.user.id.get(),
                text: message,
                attachments: image.into_iter().collect::<Vec<Attachment>>(),
            };
            self.say(ctx, command, request).await;
            return;
        }

        let reply = self.execute(guild_id, channel_id, parsed).await;
        respond(ctx, command, &reply, true).await;
    }

    /// Echo the message, then run the exchange off the gateway task.
    async fn say(&self, ctx: &Context, command: &CommandInteraction, request: ChatRequest) {
        let channel_id = request.channel_id;
        let precondition = match self.coordinator.channel_config(channel_id) {
            None => Some(ChatError::ConfigMissing { channel_id }),
            Some(config) if !config.enabled => Some(ChatError::ChannelDisabled { channel_id }),
            Some(_) => None,
        };
        if let Some(err) = precondition {
            respond(ctx, command, &notice::for_chat_error(&err), true).await;
            return;
        }

        let echo = format!("{}: {}", command.user.name, request.text);
        if !respond(ctx, command, &echo, false).await {
            return;
        }

        let coordinator = self.coordinator.clone();
        let http = ctx.http.clone();
        tokio::spawn(async move {
            match coordinator.handle_chat(request).await {
                Ok(outcome) => debug!(channel_id, ?outcome, "exchange finished"),
                Err(e) => {
                    warn!(channel_id, error = %e, "exchange could not start");
                    if let Err(e) = ChannelId::new(channel_id)
                        .say(&http, notice::for_chat_error(&e))
                        .await
                    {
                        debug!(channel_id, error = %e, "failed to post chat error notice");
                    }
                }
            }
        });
    }

    /// Run a non-chat command and return the text to show the invoker.
    async fn execute(&self, guild_id: u64, channel_id: u64, command: SlashCommand) -> String {
        let mutates_channel = command.mutates_channel();
        let channels = &self.state.channel_service;
        let guilds = &self.state.guild_service;

        let result: Result<String, AdminError> = match command {
            SlashCommand::Say { .. } => Ok(String::new()),
            SlashCommand::Stop => Ok(if self.coordinator.stop_chat(channel_id) {
                "⏹️ Stopping the current reply.".to_string()
            } else {
                "Nothing is running in this channel.".to_string()
            }),
            SlashCommand::Reset => {
                if self.coordinator.is_running(channel_id) {
                    Ok("A reply is still being written. Wait for it or use /stop first.".to_string())
                } else if self.coordinator.channel_config(channel_id).is_none() {
                    Err(AdminError::NotActive)
                } else {
                    self.coordinator.force_reset(channel_id);
                    Ok(notice::RESET.to_string())
                }
            }
            SlashCommand::Activate { prompt } => {
                if !guilds.is_initialized(guild_id).await.unwrap_or(false) {
                    return "This server has no API key yet. Run /init first.".to_string();
                }
                channels
                    .activate(guild_id, channel_id, prompt)
                    .await
                    .map(|c| format!("✅ Activated in this channel (model `{}`).", c.model))
            }
            SlashCommand::Deactivate => channels
                .deactivate(guild_id, channel_id)
                .await
                .map(|()| "Deactivated. The conversation history was cleared.".to_string()),
            SlashCommand::SetSystemPrompt { prompt } => channels
                .set_system_prompt(guild_id, channel_id, &prompt)
                .await
                .map(|_| "System prompt updated. The conversation was reset.".to_string()),
            SlashCommand::ShowSystemPrompt => channels
                .show(guild_id, channel_id)
                .await
                .map(|c| format!("Current system prompt:\n```\n{}\n```", c.system_prompt)),
            SlashCommand::SetModel { model } => channels
                .set_model(guild_id, channel_id, model)
                .await
                .map(|c| format!("Model set to `{}`.", c.model)),
            SlashCommand::SetCompletionMarker { marker } => channels
                .set_completion_marker(guild_id, channel_id, &marker)
                .await
                .map(|c| format!("Finished replies will be marked with {}.", c.completion_marker)),
            SlashCommand::SetMaxTurns { turns } => channels
                .set_max_turns(guild_id, channel_id, turns)
                .await
                .map(|c| format!("History resets after {} replies.", c.max_turns)),
            SlashCommand::SetResetDelta { seconds } => channels
                .set_reset_delta(guild_id, channel_id, seconds)
                .await
                .map(|c| format!("History resets after {} idle seconds.", c.reset_delta_secs)),
            SlashCommand::Toggle { setting } => channels
                .toggle(guild_id, channel_id, setting)
                .await
                .map(|value| format!("`{setting}` is now {}.", if value { "on" } else { "off" })),
            SlashCommand::Init { api_key } => match guilds.set_api_key(guild_id, &api_key).await {
                Ok(()) => {
                    self.refresh_credentials().await;
                    Ok("🔑 API key updated.".to_string())
                }
                Err(e) => Err(e),
            },
            SlashCommand::Revoke => self.revoke(guild_id).await,
        };

        match result {
            Ok(text) => {
                if mutates_channel {
                    self.apply_channel_change(channel_id).await;
                }
                text
            }
            Err(e) => {
                if matches!(e, AdminError::Crypto(_) | AdminError::Repository(_)) {
                    error!(guild_id, channel_id, error = %e, "command failed");
                }
                admin_error_text(&e)
            }
        }
    }

    async fn revoke(&self, guild_id: u64) -> Result<String, AdminError> {
        let affected: Vec<u64> = self
            .state
            .channel_service
            .list()
            .await?
            .into_iter()
            .filter(|c| c.guild_id == guild_id)
            .map(|c| c.channel_id)
            .collect();

        let summary = self.state.guild_service.revoke(guild_id).await?;
        self.refresh_credentials().await;
        self.refresh_channels().await;
        for channel_id in affected {
            self.coordinator.force_reset(channel_id);
        }

        Ok(if summary.had_key {
            format!(
                "Revoked the API key and deactivated {} channel(s).",
                summary.channels_removed
            )
        } else {
            "This server had no API key.".to_string()
        })
    }

    /// New settings take effect on the channel's next exchange.
    async fn apply_channel_change(&self, channel_id: u64) {
        self.refresh_channels().await;
        self.coordinator.force_reset(channel_id);
    }

    async fn refresh_channels(&self) {
        if let Err(e) = self.coordinator.refresh_channel_config().await {
            error!(error = %e, "failed to refresh channel config cache");
        }
    }

    async fn refresh_credentials(&self) {
        if let Err(e) = self.coordinator.refresh_credentials().await {
            error!(error = %e, "failed to refresh credential cache");
        }
    }
}

fn is_administrator(command: &CommandInteraction) -> bool {
    command
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.administrator())
}

/// Reply to an interaction. Returns whether Discord accepted the response.
async fn respond(ctx: &Context, command: &CommandInteraction, content: &str, ephemeral: bool) -> bool {
    let message = CreateInteractionResponseMessage::new()
        .content(content)
        .ephemeral(ephemeral);
    match command
        .create_response(&ctx.http, CreateInteractionResponse::Message(message))
        .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(command = %command.data.name, error = %e, "failed to respond to interaction");
            false
        }
    }
}

struct Handler {
    bot: Arc<DiscordBot>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(user = %ready.user.name, guilds = ready.guilds.len(), "Discord bot connected");
        self.bot.register_commands(&ctx).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            self.bot.handle_command(&ctx, &command).await;
        }
    }
}

/// Restart delays for the gateway client: doubling from `initial` up to `max`,
/// back to `initial` after a run that lasted at least `stable_after`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    stable_after: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, stable_after: Duration) -> Self {
        Self {
            initial,
            max,
            stable_after,
            current: initial,
        }
    }

    /// Delay before the next start, given how long the last run lasted.
    pub fn next_delay(&mut self, ran_for: Duration) -> Duration {
        if ran_for >= self.stable_after {
            self.current = self.initial;
        }
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }
}

impl Default for Backoff {
    /// 5s → 10s → 20s → 40s → 60s cap.
    fn default() -> Self {
        Self::new(
            Duration::from_secs(5),
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
    }
}

enum ClientExit {
    Shutdown,
    Disconnected,
}

/// Run the gateway client until `shutdown` fires, restarting it on failure.
pub async fn run(bot: Arc<DiscordBot>, token: &str, shutdown: CancellationToken) {
    let mut backoff = Backoff::default();

    loop {
        info!("starting Discord client");
        let started = tokio::time::Instant::now();

        match run_client(bot.clone(), token, &shutdown).await {
            Ok(ClientExit::Shutdown) => break,
            Ok(ClientExit::Disconnected) => warn!("Discord client disconnected"),
            Err(e) => error!(error = %e, "Discord client error"),
        }

        let delay = backoff.next_delay(started.elapsed());
        warn!(backoff_secs = delay.as_secs(), "restarting Discord client");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    info!("Discord client stopped");
}

async fn run_client(
    bot: Arc<DiscordBot>,
    token: &str,
    shutdown: &CancellationToken,
) -> Result<ClientExit, serenity::Error> {
    let mut client = Client::builder(token, GatewayIntents::GUILDS)
        .event_handler(Handler { bot })
        .await?;
    let shard_manager = client.shard_manager.clone();

    tokio::select! {
        result = client.start() => result.map(|()| ClientExit::Disconnected),
        _ = shutdown.cancelled() => {
            shard_manager.shutdown_all().await;
            Ok(ClientExit::Shutdown)
        }
    }
}
