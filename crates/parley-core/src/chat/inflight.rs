//! Single-flight gate: at most one exchange per channel.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Set of channels currently generating a response.
///
/// Each membership carries a generation number so that a forced removal
/// followed by a new acquisition is never undone by the older guard.
pub struct InFlightSet {
    members: DashMap<u64, u64>,
    next_generation: AtomicU64,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Claim `channel_id`. Returns `None` when it is already claimed.
    pub fn try_acquire(&self, channel_id: u64) -> Option<InFlightGuard<'_>> {
        match self.members.entry(channel_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                vacant.insert(generation);
                Some(InFlightGuard {
                    set: self,
                    channel_id,
                    generation,
                })
            }
        }
    }

    pub fn contains(&self, channel_id: u64) -> bool {
        self.members.contains_key(&channel_id)
    }

    /// Drop the membership regardless of which guard holds it.
    pub fn force_remove(&self, channel_id: u64) -> bool {
        self.members.remove(&channel_id).is_some()
    }
}

impl Default for InFlightSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership of one channel in an [`InFlightSet`], released on drop.
pub struct InFlightGuard<'a> {
    set: &'a InFlightSet,
    channel_id: u64,
    generation: u64,
}

impl InFlightGuard<'_> {
    /// False once the membership was force-removed (and possibly re-acquired).
    pub fn is_current(&self) -> bool {
        self.set
            .members
            .get(&self.channel_id)
            .is_some_and(|g| *g == self.generation)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.set
            .members
            .remove_if(&self.channel_id, |_, g| *g == generation);
    }
}
