//! Deferred probe mutations
//!
//! Registrations and removals that arrive while a snapshot pass is iterating
//! the live set are queued here and replayed at the start of the next update:
//! kills first, then creates.

use std::collections::VecDeque;

use crate::probe::ProbeHandle;

/// A structural change to the live probe set
#[derive(Clone, Debug)]
pub enum ProbeUpdate {
    /// Add a probe to the live set
    Create(ProbeHandle),
    /// Remove a probe and tear down its slot and neighbor edges
    Kill(ProbeHandle),
}

/// Queue of deferred probe mutations
#[derive(Clone, Debug, Default)]
pub struct ProbeUpdateQueue {
    creates: VecDeque<ProbeHandle>,
    kills: VecDeque<ProbeHandle>,
}

impl ProbeUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, update: ProbeUpdate) {
        match update {
            ProbeUpdate::Create(handle) => self.creates.push_back(handle),
            ProbeUpdate::Kill(handle) => {
                // A probe created and killed within the same pass never goes live
                if self.cancel_create(&handle) {
                    return;
                }
                if !self.kills.iter().any(|h| h.ptr_eq(&handle)) {
                    self.kills.push_back(handle);
                }
            }
        }
    }

    /// Drop a pending creation; false if `handle` was not waiting
    pub fn cancel_create(&mut self, handle: &ProbeHandle) -> bool {
        match self.creates.iter().position(|h| h.ptr_eq(handle)) {
            Some(pos) => {
                self.creates.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Next pending mutation, kills before creates
    pub fn pop(&mut self) -> Option<ProbeUpdate> {
        if let Some(handle) = self.kills.pop_front() {
            return Some(ProbeUpdate::Kill(handle));
        }
        self.creates.pop_front().map(ProbeUpdate::Create)
    }

    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.kills.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.kills.len()
    }

    /// Pending creations
    pub fn pending_creates(&self) -> usize {
        self.creates.len()
    }

    /// Pending removals
    pub fn pending_kills(&self) -> usize {
        self.kills.len()
    }

    /// Probes waiting to be created
    pub fn creates(&self) -> impl Iterator<Item = &ProbeHandle> {
        self.creates.iter()
    }

    /// Whether `handle` is waiting to be created
    pub fn is_pending_create(&self, handle: &ProbeHandle) -> bool {
        self.creates.iter().any(|h| h.ptr_eq(handle))
    }

    pub fn clear(&mut self) {
        self.creates.clear();
        self.kills.clear();
    }
}
