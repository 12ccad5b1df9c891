//! [`ChatSink`] over serenity's REST client.

use std::sync::Arc;

use serenity::all::{ChannelId, EditMessage, MessageId, ReactionType};
use serenity::http::{Http, HttpError};
use tracing::debug;

use parley_core::sink::{ChatSink, MessageHandle, SinkError};

/// Discord message character limit.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// JSON error code Discord returns for a reaction it cannot resolve.
const UNKNOWN_EMOJI: isize = 10014;

/// Posts, edits, and reacts to channel messages through the Discord REST API.
pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

impl ChatSink for DiscordSink {
    async fn send_message(&self, channel_id: u64, text: &str) -> Result<MessageHandle, SinkError> {
        let message = ChannelId::new(channel_id)
            .say(&self.http, fit_message(text))
            .await
            .map_err(transport_error)?;

        Ok(MessageHandle {
            channel_id,
            message_id: message.id.get(),
        })
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<(), SinkError> {
        ChannelId::new(handle.channel_id)
            .edit_message(
                &self.http,
                MessageId::new(handle.message_id),
                EditMessage::new().content(fit_message(text)),
            )
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn add_reaction(&self, handle: &MessageHandle, marker: &str) -> Result<(), SinkError> {
        let reaction = parse_marker(marker)?;
        self.http
            .create_reaction(
                ChannelId::new(handle.channel_id),
                MessageId::new(handle.message_id),
                &reaction,
            )
            .await
            .map_err(|e| {
                if discord_error_code(&e) == Some(UNKNOWN_EMOJI) {
                    debug!(marker, "discord rejected completion marker");
                    SinkError::UnknownEmoji(marker.to_string())
                } else {
                    transport_error(e)
                }
            })
    }
}

/// Unicode emoji or custom emoji mention (`<:name:id>`, `<a:name:id>`).
fn parse_marker(marker: &str) -> Result<ReactionType, SinkError> {
    let marker = marker.trim();
    if marker.is_empty() {
        return Err(SinkError::UnknownEmoji(String::new()));
    }
    ReactionType::try_from(marker).map_err(|_| SinkError::UnknownEmoji(marker.to_string()))
}

/// Clamp `text` to Discord's message limit, counted in characters.
fn fit_message(text: &str) -> String {
    match text.char_indices().nth(MAX_MESSAGE_LENGTH) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

fn discord_error_code(err: &serenity::Error) -> Option<isize> {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => Some(response.error.code),
        _ => None,
    }
}

fn transport_error(err: serenity::Error) -> SinkError {
    SinkError::Transport(err.to_string())
}
