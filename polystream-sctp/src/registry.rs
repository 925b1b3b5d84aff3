//! Live-association bookkeeping for one-to-many sockets.
//!
//! The registry caches what the kernel reports through association-change
//! notifications. It never invents ids. Mutations (observed state changes
//! and peel-off) take the write lock; lookups on the read/write paths share
//! the read lock.
//!
//! Peeled-off ids are remembered as tombstones so the shared socket can drop
//! any message for them that was already queued when the peel-off ran. Only
//! the most recent [`MAX_TOMBSTONES`] are kept; older ones are evicted first.

use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;
use parking_lot::RwLock;
use polystream_core::assoc::AssocId;
use polystream_core::error::{Result, SctpError};
use polystream_core::monitor::SocketEvent;
use tracing::trace;

use crate::notification::{AssociationState, Notification};

/// Stream counts negotiated for a live association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssocEntry {
    pub outbound_streams: u16,
    pub inbound_streams: u16,
}

/// Peeled-off ids remembered at most.
pub const MAX_TOMBSTONES: usize = 1024;

/// Insertion-ordered set of peeled-off ids, capped at [`MAX_TOMBSTONES`].
#[derive(Debug, Default)]
struct Tombstones {
    ids: HashSet<AssocId>,
    order: VecDeque<AssocId>,
}

impl Tombstones {
    fn insert(&mut self, id: AssocId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > MAX_TOMBSTONES {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
                trace!("[REGISTRY] evicted tombstone of association {}", oldest);
            }
        }
    }

    fn remove(&mut self, id: AssocId) {
        if self.ids.remove(&id) {
            self.order.retain(|x| *x != id);
        }
    }

    fn contains(&self, id: AssocId) -> bool {
        self.ids.contains(&id)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.order.clear();
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    live: HashMap<AssocId, AssocEntry>,
    peeled: Tombstones,
}

#[derive(Debug, Default)]
pub struct AssociationRegistry {
    state: RwLock<RegistryState>,
}

impl AssociationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a notification. Returns the lifecycle event it produced, if any.
    pub fn observe(&self, notification: &Notification) -> Option<SocketEvent> {
        let Notification::AssociationChange {
            state,
            outbound_streams,
            inbound_streams,
            assoc_id,
            ..
        } = notification
        else {
            return None;
        };

        let id = *assoc_id;
        let mut guard = self.state.write();
        match state {
            AssociationState::CommUp | AssociationState::Restart => {
                guard.peeled.remove(id);
                let entry = AssocEntry {
                    outbound_streams: *outbound_streams,
                    inbound_streams: *inbound_streams,
                };
                let fresh = guard.live.insert(id, entry).is_none();
                trace!("[REGISTRY] {} on association {}", state, id);
                fresh.then_some(SocketEvent::AssociationUp(id))
            }
            AssociationState::CommLost
            | AssociationState::ShutdownComplete
            | AssociationState::CantStartAssoc => {
                let known = guard.live.remove(&id).is_some();
                trace!("[REGISTRY] {} on association {}", state, id);
                known.then_some(SocketEvent::AssociationDown(id))
            }
        }
    }

    pub fn is_live(&self, id: AssocId) -> bool {
        self.state.read().live.contains_key(&id)
    }

    /// Whether `id` was moved to its own descriptor.
    pub fn is_peeled(&self, id: AssocId) -> bool {
        self.state.read().peeled.contains(id)
    }

    /// Peeled-off ids still remembered; never above [`MAX_TOMBSTONES`].
    pub fn tombstone_count(&self) -> usize {
        self.state.read().peeled.len()
    }

    pub fn get(&self, id: AssocId) -> Option<AssocEntry> {
        self.state.read().live.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.state.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().live.is_empty()
    }

    /// Snapshot of live ids, sorted.
    pub fn live_ids(&self) -> Vec<AssocId> {
        let mut ids: Vec<AssocId> = self.state.read().live.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Association a one-to-many write should be tagged with.
    ///
    /// `NONE` resolves to the sole live association; with several live it is
    /// ambiguous. A peeled-off id no longer belongs to this socket.
    pub fn resolve_target(&self, id: AssocId) -> Result<AssocId> {
        let guard = self.state.read();
        if id.is_none() {
            return match guard.live.len() {
                0 => Ok(AssocId::NONE),
                1 => Ok(guard.live.keys().next().copied().unwrap_or(AssocId::NONE)),
                live => Err(SctpError::AmbiguousAssociation { live }),
            };
        }
        if guard.peeled.contains(id) {
            return Err(SctpError::UnknownAssociation(id));
        }
        Ok(id)
    }

    /// Run `detach` with `id` held exclusively, then retire the id.
    ///
    /// The id is retired before this returns, so no reader can observe it as
    /// live once the caller holds the result. If `detach` fails the
    /// association stays registered.
    pub fn peel_off<T, F>(&self, id: AssocId, detach: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut guard = self.state.write();
        if !guard.live.contains_key(&id) {
            return Err(SctpError::UnknownAssociation(id));
        }
        let detached = detach()?;
        guard.live.remove(&id);
        guard.peeled.insert(id);
        Ok(detached)
    }

    /// Forget everything (on close).
    pub fn clear(&self) {
        let mut guard = self.state.write();
        guard.live.clear();
        guard.peeled.clear();
    }
}
