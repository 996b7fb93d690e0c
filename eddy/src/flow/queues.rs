use eddy_queue::FlowQueue;
use tracing::debug;

use crate::flow::{FlowPool, FlowState};

/// The lifecycle queue set. Every flow slot is a member of exactly one of
/// these queues except while a worker or the manager has it in hand.
#[derive(Debug)]
pub struct FlowQueues {
    pub new: FlowQueue,
    pub established: FlowQueue,
    pub closed: FlowQueue,
    /// Free slots.
    pub spare: FlowQueue,
}

impl FlowQueues {
    /// Builds the queues over the pool's arena and fills `spare` with every
    /// slot.
    pub fn new(pool: &FlowPool) -> Self {
        let links = pool.links();
        let queues = Self {
            new: FlowQueue::new("new", links.clone()),
            established: FlowQueue::new("established", links.clone()),
            closed: FlowQueue::new("closed", links.clone()),
            spare: FlowQueue::new("spare", links.clone()),
        };

        let mut spare = queues.spare.lock();
        for flow in links.ids() {
            spare.enqueue(flow);
        }
        drop(spare);

        queues
    }

    pub fn for_state(&self, state: FlowState) -> &FlowQueue {
        match state {
            FlowState::New => &self.new,
            FlowState::Established => &self.established,
            FlowState::Closed => &self.closed,
        }
    }

    /// Queues holding tracked flows, in the order the manager visits them.
    pub fn active(&self) -> [(FlowState, &FlowQueue); 3] {
        [
            (FlowState::New, &self.new),
            (FlowState::Established, &self.established),
            (FlowState::Closed, &self.closed),
        ]
    }

    pub fn log_stats(&self) {
        for queue in [&self.new, &self.established, &self.closed, &self.spare] {
            let stats = queue.stats();
            debug!(
                event.name = "flow_queues.stats",
                queue.name = %queue.name(),
                queue.len = stats.len,
                queue.max_len = stats.max_len,
                "flow queue stats"
            );
        }
    }

    /// Destroys all four queues. Call only once every thread using them has
    /// been joined.
    pub fn destroy(self) {
        self.log_stats();
        self.new.destroy();
        self.established.destroy();
        self.closed.destroy();
        self.spare.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_slots_start_in_spare() {
        let pool = FlowPool::new(8);
        let queues = FlowQueues::new(&pool);

        assert_eq!(queues.spare.len(), 8);
        for (_, queue) in queues.active() {
            assert!(queue.is_empty());
        }
        assert_eq!(queues.spare.lock().check_links(), Ok(()));
        assert_eq!(queues.spare.dequeue(), pool.links().flow_id(0));
    }

    #[test]
    fn test_for_state_matches_active_order() {
        let pool = FlowPool::new(1);
        let queues = FlowQueues::new(&pool);

        for (state, queue) in queues.active() {
            assert_eq!(queues.for_state(state).id(), queue.id());
        }
        assert_eq!(queues.for_state(FlowState::Closed).name(), "closed");
    }
}
