//! Flow handles and the link arena that threads them onto queues.
//!
//! A flow never carries its own pointers. Its two links live in a
//! [`FlowLinks`] slot addressed by a [`FlowId`], and every queue built over
//! the same arena patches those slots while holding its own lock. Link words
//! are atomics only so that the arena can be shared without `unsafe`; the
//! owning queue's mutex is what orders the accesses, so `Relaxed` is enough.

use std::{
    fmt,
    sync::atomic::{AtomicU32, Ordering},
};

/// Sentinel stored in a link word when there is no neighbour / no owner.
const NIL: u32 = u32::MAX;

/// Handle naming one flow slot of a [`FlowLinks`] arena.
///
/// Handles are minted by [`FlowLinks::flow_id`] and [`FlowLinks::ids`], so a
/// handle is always in bounds for the arena that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u32);

impl FlowId {
    /// Slot index inside the arena, usable to index parallel payload storage.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    fn encode(flow: Option<FlowId>) -> u32 {
        flow.map_or(NIL, |f| f.0)
    }

    fn decode(raw: u32) -> Option<FlowId> {
        (raw != NIL).then_some(FlowId(raw))
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}

/// Process-unique identity of a [`crate::FlowQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u32);

impl QueueId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        assert!(id != NIL, "queue id space exhausted");
        QueueId(id)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

#[derive(Debug)]
struct Link {
    toward_top: AtomicU32,
    toward_bottom: AtomicU32,
    // Queue the flow is currently linked into. Only read by contract checks
    // and diagnostics, never to decide where a flow goes.
    owner: AtomicU32,
}

impl Link {
    fn unlinked() -> Self {
        Self {
            toward_top: AtomicU32::new(NIL),
            toward_bottom: AtomicU32::new(NIL),
            owner: AtomicU32::new(NIL),
        }
    }
}

/// Fixed-capacity arena holding the queue links of every flow slot.
///
/// The arena knows nothing about flow payloads. Whoever owns the flows keeps
/// their state in storage indexed by [`FlowId::index`].
#[derive(Debug)]
pub struct FlowLinks {
    links: Box<[Link]>,
}

impl FlowLinks {
    /// Creates an arena with `capacity` unqueued slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not fit below the `u32` sentinel.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity < NIL as usize,
            "flow arena capacity {capacity} exceeds the handle range"
        );
        Self {
            links: (0..capacity).map(|_| Link::unlinked()).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.links.len()
    }

    /// Returns the handle for slot `index`, or `None` if it is out of range.
    pub fn flow_id(&self, index: usize) -> Option<FlowId> {
        (index < self.links.len()).then(|| FlowId(index as u32))
    }

    /// Iterates over the handles of every slot in the arena.
    pub fn ids(&self) -> impl Iterator<Item = FlowId> + '_ {
        (0..self.links.len() as u32).map(FlowId)
    }

    /// Whether `flow` is currently linked into some queue.
    ///
    /// Reading this without holding the owning queue's lock gives a snapshot
    /// that may already be stale.
    pub fn is_queued(&self, flow: FlowId) -> bool {
        self.owner(flow).is_some()
    }

    pub(crate) fn owner(&self, flow: FlowId) -> Option<QueueId> {
        let raw = self.slot(flow).owner.load(Ordering::Relaxed);
        (raw != NIL).then_some(QueueId(raw))
    }

    pub(crate) fn set_owner(&self, flow: FlowId, owner: QueueId) {
        self.slot(flow).owner.store(owner.0, Ordering::Relaxed);
    }

    pub(crate) fn toward_top(&self, flow: FlowId) -> Option<FlowId> {
        FlowId::decode(self.slot(flow).toward_top.load(Ordering::Relaxed))
    }

    pub(crate) fn toward_bottom(&self, flow: FlowId) -> Option<FlowId> {
        FlowId::decode(self.slot(flow).toward_bottom.load(Ordering::Relaxed))
    }

    pub(crate) fn set_toward_top(&self, flow: FlowId, link: Option<FlowId>) {
        self.slot(flow)
            .toward_top
            .store(FlowId::encode(link), Ordering::Relaxed);
    }

    pub(crate) fn set_toward_bottom(&self, flow: FlowId, link: Option<FlowId>) {
        self.slot(flow)
            .toward_bottom
            .store(FlowId::encode(link), Ordering::Relaxed);
    }

    /// Resets both links and the owner tag; the flow is unqueued afterwards.
    pub(crate) fn clear(&self, flow: FlowId) {
        let slot = self.slot(flow);
        slot.toward_top.store(NIL, Ordering::Relaxed);
        slot.toward_bottom.store(NIL, Ordering::Relaxed);
        slot.owner.store(NIL, Ordering::Relaxed);
    }

    fn slot(&self, flow: FlowId) -> &Link {
        &self.links[flow.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_id_bounds() {
        let links = FlowLinks::with_capacity(4);

        assert_eq!(links.capacity(), 4);
        assert_eq!(links.flow_id(3).map(FlowId::index), Some(3));
        assert!(links.flow_id(4).is_none());
        assert_eq!(links.ids().count(), 4);
    }

    #[test]
    fn test_new_slots_are_unqueued() {
        let links = FlowLinks::with_capacity(2);

        for flow in links.ids() {
            assert!(!links.is_queued(flow));
            assert_eq!(links.toward_top(flow), None);
            assert_eq!(links.toward_bottom(flow), None);
        }
    }

    #[test]
    fn test_clear_resets_links_and_owner() {
        let links = FlowLinks::with_capacity(3);
        let a = links.flow_id(0).unwrap();
        let b = links.flow_id(1).unwrap();
        let c = links.flow_id(2).unwrap();

        links.set_toward_top(b, Some(a));
        links.set_toward_bottom(b, Some(c));
        links.set_owner(b, QueueId::next());
        assert!(links.is_queued(b));

        links.clear(b);
        assert!(!links.is_queued(b));
        assert_eq!(links.toward_top(b), None);
        assert_eq!(links.toward_bottom(b), None);
    }

    #[test]
    fn test_queue_ids_are_unique() {
        let a = QueueId::next();
        let b = QueueId::next();
        assert_ne!(a, b);
    }
}
