//! Lifecycle queues for flows shared between packet workers and a flow
//! manager.
//!
//! Flows live in storage owned by the caller. This crate only tracks which
//! queue a flow is linked into and where:
//!
//! - [`FlowLinks`] is a fixed arena holding the two links of every flow slot,
//!   addressed by [`FlowId`].
//! - [`FlowQueue`] is a doubly linked list over that arena with its own lock
//!   and a "became non-empty" condition variable.
//! - [`QueueGuard`] is a held queue lock. Operations that need the caller to
//!   hold the lock ([`QueueGuard::enqueue`], [`QueueGuard::detach`],
//!   [`QueueGuard::append`]) live on the guard; self-locking operations
//!   ([`FlowQueue::dequeue`], [`FlowQueue::publish`], [`requeue`]) live on the
//!   queue.
//!
//! No operation holds two queue locks at the same time. A transfer between two
//! different queues unlinks under the source lock, releases it, then links
//! under the destination lock, so transfers running in opposite directions
//! between the same pair of queues cannot deadlock.
//!
//! ```
//! use std::sync::Arc;
//!
//! use eddy_queue::{FlowLinks, FlowQueue, requeue};
//!
//! let links = Arc::new(FlowLinks::with_capacity(2));
//! let active = FlowQueue::new("active", links.clone());
//! let spare = FlowQueue::new("spare", links.clone());
//!
//! let flow = links.flow_id(0).unwrap();
//! active.publish(flow);
//! requeue(flow, Some(&active), &spare);
//!
//! assert!(active.is_empty());
//! assert_eq!(spare.dequeue(), Some(flow));
//! ```

mod node;
mod queue;

pub use node::{FlowId, FlowLinks, QueueId};
pub use queue::{FlowQueue, Iter, LinkError, QueueGuard, QueueStats, requeue};
