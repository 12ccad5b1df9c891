//! User-facing status texts posted by the coordinator.

use parley_types::llm::LlmError;

use super::ChatError;

pub const BUSY: &str =
    "⏳ Still answering the previous message in this channel. Please wait, or use /stop.";

pub const AWAITING: &str = "💭 Awaiting response...";

pub const RETRYING: &str = "⌛ The provider did not respond in time, retrying...";

pub const RESET: &str = "🔄 Conversation history was reset.";

pub const RESET_INHERITED: &str =
    "🔄 Conversation history was reset, keeping the last few messages.";

pub const STOPPED_EMPTY: &str = "⏹️ Stopped before any reply arrived.";

pub const EMPTY_REPLY: &str = "🤐 The provider returned an empty reply.";

pub const TRUNCATED_EMPTY: &str =
    "⚠️ The response ended early without any text. Please try again.";

pub fn timed_out(attempts: u32) -> String {
    format!("⌛ The provider did not respond after {attempts} attempts. Please try again later.")
}

pub fn marker_missing(marker: &str) -> String {
    format!(
        "⚠️ The completion marker {marker} is no longer available. \
         Ask an administrator to pick another with /set-completion-marker."
    )
}

/// Text shown in place of the reply when the provider fails.
pub fn for_provider_error(err: &LlmError) -> String {
    match err {
        LlmError::RateLimited { message } => {
            with_detail("🚫 Request limit reached for this server's API key.", message)
        }
        LlmError::BadRequest { message } => with_detail(
            "⚠️ The request was rejected, possibly because the conversation is too long. \
             Use /reset and try again.",
            message,
        ),
        LlmError::ServerError { message } => with_detail(
            "🛠️ The provider had a server problem. Please try again later.",
            message,
        ),
        LlmError::Unauthorized { message } => with_detail(
            "🔑 The API key was rejected. Ask an administrator to run /init again.",
            message,
        ),
        LlmError::StreamTruncated(_) => TRUNCATED_EMPTY.to_string(),
        LlmError::Provider { message } => {
            format!("❗ Unexpected error, contact the bot owner:\n```\n{message}\n```")
        }
    }
}

/// Text shown when an exchange could not start.
pub fn for_chat_error(err: &ChatError) -> String {
    match err {
        ChatError::ConfigMissing { .. } => {
            "This channel is not active. Ask an administrator to run /activate.".to_string()
        }
        ChatError::ChannelDisabled { .. } => {
            "Chat is disabled in this channel. Ask an administrator to /toggle it on.".to_string()
        }
        ChatError::CredentialMissing { .. } => {
            "No API key is configured for this server. Ask an administrator to run /init."
                .to_string()
        }
        ChatError::CredentialInvalid { .. } => {
            "The stored API key could not be used. Ask an administrator to run /init again."
                .to_string()
        }
        other => format!("❗ Unexpected error, contact the bot owner:\n```\n{other}\n```"),
    }
}

fn with_detail(summary: &str, detail: &str) -> String {
    let detail = detail.trim();
    if detail.is_empty() {
        summary.to_string()
    } else {
        format!("{summary}\n> {detail}")
    }
}
