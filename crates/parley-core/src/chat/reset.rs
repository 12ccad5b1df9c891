//! Turn-count and idle-time reset policy.

use chrono::{DateTime, Utc};

use parley_types::channel::ChannelConfig;

use super::session::ConversationSession;

/// What should happen to a session before the next exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetDecision {
    None,
    /// Replace the history with the system turn only.
    Hard,
    /// Replace the history with the system turn plus a short tail.
    Inherited,
}

/// Decide whether `session` is stale under `config` at `now`.
///
/// Either signal alone is enough: the channel has produced `max_turns`
/// assistant replies, or more than `reset_delta_secs` have passed since the
/// last activity.
pub fn evaluate(
    config: &ChannelConfig,
    session: &ConversationSession,
    now: DateTime<Utc>,
) -> ResetDecision {
    let turns_exceeded = session.assistant_turn_count() >= config.max_turns as usize;

    let idle = now.signed_duration_since(session.last_activity);
    let time_exceeded = idle > chrono::Duration::seconds(i64::from(config.reset_delta_secs));

    if !turns_exceeded && !time_exceeded {
        ResetDecision::None
    } else if config.inherit_on_reset {
        ResetDecision::Inherited
    } else {
        ResetDecision::Hard
    }
}
