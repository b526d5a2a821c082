//! Viewer registry
//!
//! Holds non-owning handles to the sessions that receive broadcast frames,
//! plus the controller slot. A handle whose session has gone away is pruned
//! the next time it is visited.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::error::HubError;
use super::frame::TextFrame;
use crate::session::Session;

/// Weak session handles keyed by session ID
pub struct ViewerSet {
    viewers: Mutex<BTreeMap<u64, Weak<Session>>>,
    controller: Mutex<Option<(u64, Weak<Session>)>>,
}

impl ViewerSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            viewers: Mutex::new(BTreeMap::new()),
            controller: Mutex::new(None),
        }
    }

    fn lock_viewers(&self) -> MutexGuard<'_, BTreeMap<u64, Weak<Session>>> {
        self.viewers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_controller(&self) -> MutexGuard<'_, Option<(u64, Weak<Session>)>> {
        self.controller.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a session; returns false if it was already present
    pub fn insert(&self, session: &Arc<Session>) -> bool {
        self.lock_viewers()
            .insert(session.id(), Arc::downgrade(session))
            .is_none()
    }

    /// Remove a session by ID
    ///
    /// Expired handles are pruned as well. Returns whether `id` was present.
    pub fn remove(&self, id: u64) -> bool {
        let mut viewers = self.lock_viewers();
        let removed = viewers.remove(&id).is_some();
        viewers.retain(|_, weak| weak.strong_count() > 0);
        removed
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: u64) -> bool {
        self.lock_viewers().contains_key(&id)
    }

    /// Drop every handle
    pub fn clear(&self) {
        self.lock_viewers().clear();
    }

    /// Live registered sessions
    pub fn len(&self) -> usize {
        self.lock_viewers()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether no live session is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `frame` on every live session
    ///
    /// Dead handles are removed in the same pass. Sessions are collected
    /// under the lock and fed after it is released, so a session's own queue
    /// lock is never taken while the registry is locked. Returns the number
    /// of sessions the frame was queued on.
    pub fn broadcast(&self, frame: &TextFrame) -> usize {
        let targets: Vec<Arc<Session>> = {
            let mut viewers = self.lock_viewers();
            let mut live = Vec::with_capacity(viewers.len());
            viewers.retain(|_, weak| match weak.upgrade() {
                Some(session) => {
                    live.push(session);
                    true
                }
                None => false,
            });
            live
        };

        for session in &targets {
            session.send_frame(frame.clone());
        }

        targets.len()
    }

    /// Take the controller slot
    ///
    /// Fails while another live session holds it. Reclaiming the slot with
    /// the session that already holds it succeeds.
    pub fn claim_controller(&self, session: &Arc<Session>) -> Result<(), HubError> {
        let mut slot = self.lock_controller();

        if let Some((id, weak)) = slot.as_ref() {
            if *id != session.id() && weak.strong_count() > 0 && !is_closed(weak) {
                return Err(HubError::ControllerTaken);
            }
        }

        *slot = Some((session.id(), Arc::downgrade(session)));
        Ok(())
    }

    /// Release the controller slot if `id` holds it
    pub fn release_controller(&self, id: u64) -> bool {
        let mut slot = self.lock_controller();
        match slot.as_ref() {
            Some((held, _)) if *held == id => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// ID of the live controller
    pub fn controller_id(&self) -> Option<u64> {
        match self.lock_controller().as_ref() {
            Some((id, weak)) if weak.strong_count() > 0 => Some(*id),
            _ => None,
        }
    }

    /// Whether a live controller is connected
    pub fn has_controller(&self) -> bool {
        self.controller_id().is_some()
    }
}

impl Default for ViewerSet {
    fn default() -> Self {
        Self::new()
    }
}

fn is_closed(weak: &Weak<Session>) -> bool {
    weak.upgrade().map(|s| s.is_closed()).unwrap_or(true)
}
