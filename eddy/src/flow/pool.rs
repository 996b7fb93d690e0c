use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use dashmap::{DashMap, mapref::entry::Entry};
use eddy_queue::{FlowId, FlowLinks};

use crate::flow::{FlowKey, FlowRecord};

/// Payload of one flow slot. `None` while the slot is spare.
pub type FlowSlot = Option<FlowRecord>;

/// Fixed-capacity flow storage plus the key lookup table.
///
/// Slot `i` pairs the payload mutex `slots[i]` with entry `i` of the shared
/// link arena, so a [`FlowId`] names both.
pub struct FlowPool {
    links: Arc<FlowLinks>,
    slots: Box<[Mutex<FlowSlot>]>,
    table: DashMap<FlowKey, FlowId>,
}

impl FlowPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            links: Arc::new(FlowLinks::with_capacity(capacity)),
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            table: DashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn links(&self) -> &Arc<FlowLinks> {
        &self.links
    }

    /// Locks the payload of `flow`, blocking.
    pub fn lock(&self, flow: FlowId) -> MutexGuard<'_, FlowSlot> {
        self.slots[flow.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the payload of `flow` only if it is free.
    pub fn try_lock(&self, flow: FlowId) -> Option<MutexGuard<'_, FlowSlot>> {
        match self.slots[flow.index()].try_lock() {
            Ok(slot) => Some(slot),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Slot currently bound to `key`. The answer may be stale by the time the
    /// slot is locked; callers re-check the record's key under the lock.
    pub fn lookup(&self, key: &FlowKey) -> Option<FlowId> {
        self.table.get(key).map(|entry| *entry)
    }

    /// Binds `key` to `flow`. Fails with the current holder when another
    /// worker bound the key first.
    pub fn bind(&self, key: FlowKey, flow: FlowId) -> Result<(), FlowId> {
        match self.table.entry(key) {
            Entry::Occupied(entry) => Err(*entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(flow);
                Ok(())
            }
        }
    }

    /// Removes the binding of `key` if it still points at `flow`.
    pub fn unbind(&self, key: &FlowKey, flow: FlowId) -> bool {
        self.table.remove_if(key, |_, bound| *bound == flow).is_some()
    }

    /// Number of keys currently bound to a slot.
    pub fn active_count(&self) -> usize {
        self.table.len()
    }
}
