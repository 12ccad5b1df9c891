//! Per-channel conversation state.
//!
//! The [`SessionStore`] maps channel ids to their running conversation.
//! Sessions are created lazily on first chat activity, seeded from the
//! channel's configured system prompt, and live until an explicit reset or
//! channel deactivation removes them.
//!
//! All mutation is single-key: every method takes the shard lock for one
//! channel, does its work synchronously, and releases it. No guard is ever
//! held across an `.await`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use parley_types::chat::{Role, Turn};

use super::ChatError;
use super::config_cache::ChannelConfigCache;

/// One channel's conversation.
///
/// `turns[0]` is always the system turn built from the channel's prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSession {
    pub channel_id: u64,
    pub turns: Vec<Turn>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(channel_id: u64, system_prompt: &str) -> Self {
        Self {
            channel_id,
            turns: vec![Turn::system(system_prompt)],
            last_activity: Utc::now(),
        }
    }

    pub fn assistant_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::Assistant).count()
    }
}

/// Concurrent mapping from channel id to conversation.
pub struct SessionStore {
    sessions: DashMap<u64, ConversationSession>,
    configs: Arc<ChannelConfigCache>,
}

impl SessionStore {
    pub fn new(configs: Arc<ChannelConfigCache>) -> Self {
        Self {
            sessions: DashMap::new(),
            configs,
        }
    }

    /// Return the channel's session, creating it from the cached config if needed.
    ///
    /// When the configured system prompt differs from the session's system
    /// turn, the system turn is replaced before the snapshot is returned.
    pub fn get_or_create(&self, channel_id: u64) -> Result<ConversationSession, ChatError> {
        let config = self
            .configs
            .lookup(channel_id)
            .ok_or(ChatError::ConfigMissing { channel_id })?;

        let mut entry = self
            .sessions
            .entry(channel_id)
            .or_insert_with(|| ConversationSession::new(channel_id, &config.system_prompt));

        let system = Turn::system(&config.system_prompt);
        let session = entry.value_mut();
        if session.turns.first().is_some_and(Turn::is_system) {
            if session.turns[0] != system {
                session.turns[0] = system;
            }
        } else {
            session.turns.insert(0, system);
        }

        Ok(entry.value().clone())
    }

    /// Append a turn to an existing session.
    ///
    /// Returns `false` when the session no longer exists (it was removed by a
    /// concurrent deactivation), in which case the turn is dropped.
    pub fn append_turn(&self, channel_id: u64, turn: Turn) -> bool {
        match self.sessions.get_mut(&channel_id) {
            Some(mut session) => {
                session.turns.push(turn);
                true
            }
            None => false,
        }
    }

    /// Replace the conversation with `[system]`, or `[system] + last tail non-system turns`
    /// when `inherit` is set.
    ///
    /// The replacement happens under the channel's entry lock, so readers see
    /// either the old or the new sequence. A channel with no active config has
    /// its session removed instead.
    pub fn reset(&self, channel_id: u64, inherit: bool, tail: usize) {
        let Some(config) = self.configs.lookup(channel_id) else {
            self.sessions.remove(&channel_id);
            return;
        };

        let mut entry = self
            .sessions
            .entry(channel_id)
            .or_insert_with(|| ConversationSession::new(channel_id, &config.system_prompt));

        let mut turns = vec![Turn::system(&config.system_prompt)];
        if inherit {
            let history: Vec<&Turn> = entry.turns.iter().filter(|t| !t.is_system()).collect();
            let start = history.len().saturating_sub(tail);
            turns.extend(history[start..].iter().map(|t| (*t).clone()));
        }
        entry.turns = turns;
    }

    /// Mark the session as active now.
    pub fn touch(&self, channel_id: u64) {
        if let Some(mut session) = self.sessions.get_mut(&channel_id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn remove(&self, channel_id: u64) -> Option<ConversationSession> {
        self.sessions.remove(&channel_id).map(|(_, s)| s)
    }

    /// Cloned copy of the session, if one exists.
    pub fn snapshot(&self, channel_id: u64) -> Option<ConversationSession> {
        self.sessions.get(&channel_id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, channel_id: u64, at: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.get_mut(&channel_id) {
            session.last_activity = at;
        }
    }
}
