//! Flow state shared between packet workers and the flow manager.
//!
//! Lock order: a flow's payload lock ([`FlowPool::lock`]) is taken before any
//! queue lock. Code that starts from a queue lock (the manager) only ever
//! `try_lock`s payloads. A flow changes *which* queue it belongs to only while
//! its payload lock is held; its position inside a queue may change under the
//! queue lock alone.

mod key;
mod pool;
mod queues;
mod record;

pub use key::FlowKey;
pub use pool::FlowPool;
pub use queues::FlowQueues;
pub use record::{FlowRecord, FlowState, ReleaseReason, ReleasedFlow};
