//! The flow queue: a mutex-guarded doubly linked list of [`FlowId`]s.
//!
//! `top` is the insertion end used by [`QueueGuard::enqueue`]; `bottom` is
//! the removal end used by [`QueueGuard::dequeue`] and the append end used by
//! transfers. All structural state, including the links of every member flow,
//! is guarded by the queue's lock.

use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError},
    time::Duration,
};

use tracing::{trace, warn};

use crate::node::{FlowId, FlowLinks, QueueId};

#[derive(Debug, Default)]
struct QueueState {
    top: Option<FlowId>,
    bottom: Option<FlowId>,
    len: usize,
    max_len: usize,
}

/// Point-in-time length figures of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub len: usize,
    /// Largest length observed on insertion. Stays `0` when the `stats`
    /// feature is disabled.
    pub max_len: usize,
}

/// A lifecycle queue of flows.
///
/// Queues never own flows. They only hold handles into a shared
/// [`FlowLinks`] arena, and every queue a flow may travel between must be
/// built over the same arena.
#[derive(Debug)]
pub struct FlowQueue {
    id: QueueId,
    name: String,
    links: Arc<FlowLinks>,
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl FlowQueue {
    /// Creates an empty queue over `links`.
    pub fn new(name: impl Into<String>, links: Arc<FlowLinks>) -> Self {
        let queue = Self {
            id: QueueId::next(),
            name: name.into(),
            links,
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
        };
        trace!(
            event.name = "flow_queue.created",
            queue.name = %queue.name,
            queue.id = %queue.id,
            "flow queue created"
        );
        queue
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn links(&self) -> &Arc<FlowLinks> {
        &self.links
    }

    /// Acquires the queue lock, blocking until it is available.
    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            queue: self,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Acquires the queue lock only if nobody else holds it.
    pub fn try_lock(&self) -> Option<QueueGuard<'_>> {
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(QueueGuard { queue: self, state })
    }

    /// Removes the oldest flow, or returns `None` right away when empty.
    pub fn dequeue(&self) -> Option<FlowId> {
        self.lock().dequeue()
    }

    /// Enqueues `flow` at the top and wakes one waiting consumer.
    pub fn publish(&self, flow: FlowId) {
        self.lock().enqueue(flow);
        self.not_empty.notify_one();
    }

    /// Dequeues, sleeping up to `timeout` for a flow to be published when the
    /// queue is empty. Returns `None` if it is still empty when the wait ends.
    pub fn wait_dequeue(&self, timeout: Duration) -> Option<FlowId> {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .not_empty
            .wait_timeout_while(guard, timeout, |state| state.len == 0)
            .unwrap_or_else(PoisonError::into_inner);
        QueueGuard { queue: self, state }.dequeue()
    }

    /// Wakes every consumer blocked in [`FlowQueue::wait_dequeue`].
    pub fn notify_all(&self) {
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let guard = self.lock();
        QueueStats {
            len: guard.state.len,
            max_len: guard.state.max_len,
        }
    }

    /// Tears the queue down.
    ///
    /// Member flows are not touched. The caller is expected to have drained
    /// the queue; if it did not, the leftover flows keep links that point at
    /// each other and are reported here once.
    pub fn destroy(self) {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        if state.len != 0 {
            warn!(
                event.name = "flow_queue.destroyed_non_empty",
                queue.name = %self.name,
                queue.len = state.len,
                "flow queue destroyed while flows are still linked into it"
            );
        }
        trace!(
            event.name = "flow_queue.destroyed",
            queue.name = %self.name,
            queue.max_len = state.max_len,
            "flow queue destroyed"
        );
    }
}

/// Moves `flow` from `src` (or from nowhere) to the bottom of `dst`.
///
/// Locks `src` for the unlink and releases it before locking `dst`, so no two
/// queue locks are ever held at once. When `src` and `dst` are the same queue
/// the flow is moved to the bottom under a single acquisition. A caller that
/// already holds the source lock uses [`QueueGuard::requeue`] instead.
pub fn requeue(flow: FlowId, src: Option<&FlowQueue>, dst: &FlowQueue) {
    match src {
        Some(src) => src.lock().requeue(flow, dst),
        None => {
            debug_assert!(
                !dst.links.is_queued(flow),
                "{flow} requeued without a source but is still linked"
            );
            dst.lock().append(flow);
        }
    }
}

/// Exclusive access to a queue's structure, released on drop.
pub struct QueueGuard<'q> {
    queue: &'q FlowQueue,
    state: MutexGuard<'q, QueueState>,
}

impl<'q> QueueGuard<'q> {
    pub fn queue(&self) -> &'q FlowQueue {
        self.queue
    }

    pub fn len(&self) -> usize {
        self.state.len
    }

    pub fn is_empty(&self) -> bool {
        self.state.len == 0
    }

    /// Most recently enqueued flow.
    pub fn top(&self) -> Option<FlowId> {
        self.state.top
    }

    /// Oldest flow; the next one [`QueueGuard::dequeue`] returns.
    pub fn bottom(&self) -> Option<FlowId> {
        self.state.bottom
    }

    /// Inserts an unqueued flow as the new top.
    pub fn enqueue(&mut self, flow: FlowId) {
        self.debug_assert_unqueued(flow);
        let links = &*self.queue.links;

        links.set_toward_top(flow, None);
        links.set_toward_bottom(flow, self.state.top);
        match self.state.top {
            Some(old_top) => links.set_toward_top(old_top, Some(flow)),
            None => self.state.bottom = Some(flow),
        }
        self.state.top = Some(flow);

        links.set_owner(flow, self.queue.id);
        self.state.len += 1;
        self.observe_len();
    }

    /// Removes and returns the bottom flow with its links cleared.
    pub fn dequeue(&mut self) -> Option<FlowId> {
        let flow = self.state.bottom?;
        let links = &*self.queue.links;

        match links.toward_top(flow) {
            Some(above) => {
                links.set_toward_bottom(above, None);
                self.state.bottom = Some(above);
            }
            None => {
                self.state.top = None;
                self.state.bottom = None;
            }
        }

        self.state.len -= 1;
        links.clear(flow);
        Some(flow)
    }

    /// Unlinks a member flow from wherever it sits in the chain.
    pub fn detach(&mut self, flow: FlowId) {
        debug_assert_eq!(
            self.queue.links.owner(flow),
            Some(self.queue.id),
            "{flow} is not a member of queue {}",
            self.queue.name
        );
        let links = &*self.queue.links;
        let above = links.toward_top(flow);
        let below = links.toward_bottom(flow);

        if self.state.top == Some(flow) {
            self.state.top = below;
        }
        if self.state.bottom == Some(flow) {
            self.state.bottom = above;
        }
        if let Some(above) = above {
            links.set_toward_bottom(above, below);
        }
        if let Some(below) = below {
            links.set_toward_top(below, above);
        }

        self.state.len -= 1;
        links.clear(flow);
    }

    /// Links an unqueued flow in as the new bottom.
    pub fn append(&mut self, flow: FlowId) {
        self.debug_assert_unqueued(flow);
        let links = &*self.queue.links;

        links.set_toward_top(flow, self.state.bottom);
        links.set_toward_bottom(flow, None);
        match self.state.bottom {
            Some(old_bottom) => links.set_toward_bottom(old_bottom, Some(flow)),
            None => self.state.top = Some(flow),
        }
        self.state.bottom = Some(flow);

        links.set_owner(flow, self.queue.id);
        self.state.len += 1;
        self.observe_len();
    }

    /// Moves the bottom flow to the top without it ever leaving the queue.
    ///
    /// Returns the rotated flow, or `None` when the queue is empty.
    pub fn rotate(&mut self) -> Option<FlowId> {
        let flow = self.dequeue()?;
        self.enqueue(flow);
        Some(flow)
    }

    /// Moves member `flow` to the bottom of `dst`, consuming this guard.
    ///
    /// When `dst` is a different queue the lock held by this guard is
    /// released before `dst` is locked. When `dst` is this queue the flow is
    /// re-appended and the lock released afterwards.
    ///
    /// Either way the caller no longer holds the source lock on return. A
    /// caller scanning the source must lock it again before looking at the
    /// next flow, and must not reuse positions read under the old guard.
    pub fn requeue(mut self, flow: FlowId, dst: &FlowQueue) {
        debug_assert!(
            Arc::ptr_eq(&self.queue.links, &dst.links),
            "queues {} and {} do not share a flow arena",
            self.queue.name,
            dst.name
        );

        self.detach(flow);
        if self.queue.id == dst.id {
            self.append(flow);
            return;
        }
        drop(self);

        dst.lock().append(flow);
    }

    /// Iterates over member flows from bottom (oldest) to top.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            links: &self.queue.links,
            next: self.state.bottom,
            remaining: self.state.len,
        }
    }

    /// Flows reached by following toward-bottom links from `top`.
    ///
    /// The walk stops after `len + 1` steps so a corrupted cycle still ends.
    pub fn walk_from_top(&self) -> Vec<FlowId> {
        let links = &*self.queue.links;
        std::iter::successors(self.state.top, |flow| links.toward_bottom(*flow))
            .take(self.state.len + 1)
            .collect()
    }

    /// Flows reached by following toward-top links from `bottom`.
    pub fn walk_from_bottom(&self) -> Vec<FlowId> {
        let links = &*self.queue.links;
        std::iter::successors(self.state.bottom, |flow| links.toward_top(*flow))
            .take(self.state.len + 1)
            .collect()
    }

    /// Verifies the structural invariants of the list.
    pub fn check_links(&self) -> Result<(), LinkError> {
        let state = &*self.state;
        if state.top.is_none() != state.bottom.is_none()
            || state.top.is_none() != (state.len == 0)
        {
            return Err(LinkError::EndsMismatch { len: state.len });
        }

        let down = self.walk_from_top();
        if down.len() != state.len || down.last().copied() != state.bottom {
            return Err(LinkError::TopWalk {
                len: state.len,
                walked: down.len(),
            });
        }
        let up = self.walk_from_bottom();
        if up.len() != state.len || up.last().copied() != state.top {
            return Err(LinkError::BottomWalk {
                len: state.len,
                walked: up.len(),
            });
        }
        if let Some(flow) = down.iter().rev().zip(&up).find_map(|(a, b)| (a != b).then_some(*b)) {
            return Err(LinkError::Asymmetric { flow });
        }
        if let Some(&flow) = down
            .iter()
            .find(|flow| self.queue.links.owner(**flow) != Some(self.queue.id))
        {
            return Err(LinkError::ForeignMember { flow });
        }
        Ok(())
    }

    fn observe_len(&mut self) {
        #[cfg(feature = "stats")]
        if self.state.len > self.state.max_len {
            self.state.max_len = self.state.len;
        }
    }

    fn debug_assert_unqueued(&self, flow: FlowId) {
        debug_assert!(
            !self.queue.links.is_queued(flow),
            "{flow} inserted into queue {} while still linked elsewhere",
            self.queue.name
        );
    }
}

impl fmt::Debug for QueueGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueGuard")
            .field("queue", &self.queue.name)
            .field("len", &self.state.len)
            .field("top", &self.state.top)
            .field("bottom", &self.state.bottom)
            .finish()
    }
}

/// Bottom-to-top iterator over the members of a locked queue.
pub struct Iter<'g> {
    links: &'g FlowLinks,
    next: Option<FlowId>,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = FlowId;

    fn next(&mut self) -> Option<FlowId> {
        if self.remaining == 0 {
            return None;
        }
        let flow = self.next?;
        self.remaining -= 1;
        self.next = self.links.toward_top(flow);
        Some(flow)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// A broken structural invariant found by [`QueueGuard::check_links`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// `top`, `bottom` and `len` disagree on whether the queue is empty.
    EndsMismatch { len: usize },
    /// Walking down from `top` did not reach `bottom` in `len` steps.
    TopWalk { len: usize, walked: usize },
    /// Walking up from `bottom` did not reach `top` in `len` steps.
    BottomWalk { len: usize, walked: usize },
    /// The two walks visit members in different orders.
    Asymmetric { flow: FlowId },
    /// A linked flow is tagged as belonging to another queue.
    ForeignMember { flow: FlowId },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::EndsMismatch { len } => {
                write!(f, "top/bottom do not agree with length {len}")
            }
            LinkError::TopWalk { len, walked } => {
                write!(f, "walk from top visited {walked} flows, length is {len}")
            }
            LinkError::BottomWalk { len, walked } => {
                write!(f, "walk from bottom visited {walked} flows, length is {len}")
            }
            LinkError::Asymmetric { flow } => {
                write!(f, "forward and backward links disagree at {flow}")
            }
            LinkError::ForeignMember { flow } => {
                write!(f, "{flow} is linked but owned by another queue")
            }
        }
    }
}

impl std::error::Error for LinkError {}
