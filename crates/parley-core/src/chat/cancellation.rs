//! Per-channel cancellation handles for in-flight streams.
//!
//! Each attempt of an exchange registers a fresh [`CancellationToken`] for its
//! channel, replacing (and cancelling) whatever was there. An explicit stop
//! cancels and removes the live token. Handles are leased: dropping the
//! [`CancellationLease`] removes the registration, but only if it is still the
//! one the lease created.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct Registration {
    id: u64,
    token: CancellationToken,
}

/// Concurrent map from channel id to the live cancellation handle.
pub struct CancellationRegistry {
    handles: DashMap<u64, Registration>,
    next_id: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a fresh handle for `channel_id`, invalidating any previous one.
    pub fn acquire(&self, channel_id: u64) -> CancellationLease<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.handles.insert(
            channel_id,
            Registration {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        CancellationLease {
            registry: self,
            channel_id,
            id,
            token,
        }
    }

    /// Cancel and remove the live handle. Returns whether one existed.
    pub fn cancel(&self, channel_id: u64) -> bool {
        match self.handles.remove(&channel_id) {
            Some((_, registration)) => {
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the channel's handle without cancelling it.
    pub fn release(&self, channel_id: u64) {
        self.handles.remove(&channel_id);
    }

    pub fn is_registered(&self, channel_id: u64) -> bool {
        self.handles.contains_key(&channel_id)
    }

    fn is_current(&self, channel_id: u64, id: u64) -> bool {
        self.handles
            .get(&channel_id)
            .is_some_and(|r| r.id == id)
    }

    fn release_if_current(&self, channel_id: u64, id: u64) {
        self.handles.remove_if(&channel_id, |_, r| r.id == id);
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One attempt's registration in a [`CancellationRegistry`].
pub struct CancellationLease<'a> {
    registry: &'a CancellationRegistry,
    channel_id: u64,
    id: u64,
    token: CancellationToken,
}

impl CancellationLease<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this lease is still the channel's live handle.
    ///
    /// False once an explicit stop removed it or a newer attempt replaced it.
    pub fn is_current(&self) -> bool {
        self.registry.is_current(self.channel_id, self.id)
    }
}

impl Drop for CancellationLease<'_> {
    fn drop(&mut self) {
        self.registry.release_if_current(self.channel_id, self.id);
    }
}
