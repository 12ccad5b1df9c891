//! Outward message transport (send / edit / react).
//!
//! The coordinator writes everything users see through a [`ChatSink`]. The
//! Discord adapter in parley-api is the production implementation.

/// Address of a message posted through a [`ChatSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Errors from the outward transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The reaction could not be resolved (e.g. a deleted custom emoji).
    #[error("unknown emoji: {0}")]
    UnknownEmoji(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Outward message transport.
pub trait ChatSink: Send + Sync {
    /// Post a new message to a channel.
    fn send_message(
        &self,
        channel_id: u64,
        text: &str,
    ) -> impl std::future::Future<Output = Result<MessageHandle, SinkError>> + Send;

    /// Replace the content of a previously sent message.
    fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;

    /// React to a message with a unicode emoji or custom emoji mention.
    fn add_reaction(
        &self,
        handle: &MessageHandle,
        marker: &str,
    ) -> impl std::future::Future<Output = Result<(), SinkError>> + Send;
}
