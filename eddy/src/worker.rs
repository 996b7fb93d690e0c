use std::{sync::Arc, time::Duration};

use crossbeam::channel::{Receiver, Sender};
use eddy_queue::{FlowId, requeue};
use tracing::{debug, trace};

use crate::{
    engine::{EngineStats, FlowEngine},
    flow::{FlowKey, FlowRecord},
    packet::{parser::parse_ethernet_frame, types::ParsedPacket},
    source::{DataLink, Packet, Timestamp},
};

/// Decodes packets and keeps the flow table and lifecycle queues current.
pub struct PacketWorker {
    id: usize,
    engine: Arc<FlowEngine>,
    manager_wake: Sender<()>,
    wait_timeout: Duration,
}

impl PacketWorker {
    pub fn new(
        id: usize,
        engine: Arc<FlowEngine>,
        manager_wake: Sender<()>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            id,
            engine,
            manager_wake,
            wait_timeout,
        }
    }

    /// Processes packets until the channel is closed and drained.
    pub fn run(self, packets: Receiver<Packet>) {
        debug!(
            event.name = "worker.started",
            worker.id = self.id,
            "packet worker started"
        );
        let mut processed = 0u64;
        while let Ok(packet) = packets.recv() {
            self.process(&packet);
            processed += 1;
        }
        debug!(
            event.name = "worker.stopped",
            worker.id = self.id,
            worker.packets = processed,
            "packet worker stopped"
        );
    }

    pub fn process(&self, packet: &Packet) {
        let stats = &self.engine.stats;
        stats.record_packet(packet.data.len());
        self.engine.clock.advance(packet.ts);

        let decoded = match packet.datalink {
            DataLink::Ethernet => parse_ethernet_frame(&packet.data),
        };
        match decoded {
            Ok(parsed) => self.track(&parsed, packet.ts, packet.data.len()),
            Err(e) => {
                EngineStats::incr(&stats.undecodable);
                trace!(
                    event.name = "worker.packet_undecodable",
                    worker.id = self.id,
                    error = %e,
                    "skipping packet that could not be decoded"
                );
            }
        }
    }

    fn track(&self, parsed: &ParsedPacket, ts: Timestamp, len: usize) {
        let FlowEngine {
            pool,
            queues,
            stats,
            ..
        } = &*self.engine;
        let key = FlowKey::from(&parsed.five_tuple);

        loop {
            if let Some(flow) = pool.lookup(&key) {
                let mut slot = pool.lock(flow);
                // The manager may have recycled the slot between lookup and
                // lock; look the key up again.
                let Some(record) = slot.as_mut().filter(|record| record.key() == key) else {
                    continue;
                };
                let before = record.update(parsed, ts, len);
                let after = record.state;
                if before != after {
                    requeue(flow, Some(queues.for_state(before)), queues.for_state(after));
                    trace!(
                        event.name = "worker.flow_state_changed",
                        worker.id = self.id,
                        flow.id = %flow,
                        flow.state.before = ?before,
                        flow.state.after = ?after,
                        "flow changed lifecycle state"
                    );
                }
                return;
            }

            let Some(flow) = self.spare_slot() else {
                EngineStats::incr(&stats.table_full_drops);
                debug!(
                    event.name = "worker.flow_table_full",
                    worker.id = self.id,
                    flow.tuple = ?parsed.five_tuple,
                    "no spare flow slot, dropping packet"
                );
                return;
            };

            let mut slot = pool.lock(flow);
            if pool.bind(key, flow).is_err() {
                // Another worker created this flow first.
                drop(slot);
                queues.spare.publish(flow);
                continue;
            }
            let record = FlowRecord::new(parsed, ts, len);
            let queue = queues.for_state(record.state);
            *slot = Some(record);
            queue.publish(flow);
            drop(slot);

            EngineStats::incr(&stats.flows_created);
            trace!(
                event.name = "worker.flow_created",
                worker.id = self.id,
                flow.id = %flow,
                "new flow tracked"
            );
            return;
        }
    }

    /// Takes a free slot, asking the manager for one and waiting up to
    /// `wait_timeout` when none is left.
    fn spare_slot(&self) -> Option<FlowId> {
        let spare = &self.engine.queues.spare;
        if let Some(flow) = spare.dequeue() {
            return Some(flow);
        }
        // A full wake channel means a sweep is already pending.
        let _ = self.manager_wake.try_send(());
        spare.wait_dequeue(self.wait_timeout)
    }
}

#[cfg(test)]
mod tests {
    use crossbeam::channel;

    use super::*;
    use crate::{
        flow::FlowState,
        packet::{
            parser::tests::{tcp_v4_frame, udp_v4_frame},
            types::tcp_flags,
        },
    };

    const CLIENT: ([u8; 4], u16) = ([10, 1, 0, 1], 51000);
    const SERVER: ([u8; 4], u16) = ([10, 1, 0, 2], 443);

    fn packet(sec: u64, data: Vec<u8>) -> Packet {
        Packet {
            ts: Timestamp::new(sec, 0),
            datalink: DataLink::Ethernet,
            data,
        }
    }

    fn worker(max_flows: usize) -> (PacketWorker, Arc<FlowEngine>, Receiver<()>) {
        let engine = Arc::new(FlowEngine::new(max_flows));
        let (wake_tx, wake_rx) = channel::bounded(1);
        let worker = PacketWorker::new(0, engine.clone(), wake_tx, Duration::from_millis(10));
        (worker, engine, wake_rx)
    }

    fn record_of(engine: &FlowEngine, flow: FlowId) -> FlowRecord {
        engine.pool.lock(flow).clone().expect("slot holds a record")
    }

    #[test]
    fn test_tcp_flow_walks_through_lifecycle_queues() {
        let (worker, engine, _wake) = worker(4);
        let queues = &engine.queues;

        worker.process(&packet(1, tcp_v4_frame(CLIENT, SERVER, tcp_flags::SYN)));
        assert_eq!(queues.new.len(), 1);
        assert_eq!(queues.spare.len(), 3);
        let flow = queues.new.lock().bottom().unwrap();

        worker.process(&packet(
            2,
            tcp_v4_frame(SERVER, CLIENT, tcp_flags::SYN | tcp_flags::ACK),
        ));
        assert!(queues.new.is_empty());
        assert_eq!(queues.established.lock().bottom(), Some(flow));
        assert_eq!(record_of(&engine, flow).state, FlowState::Established);

        worker.process(&packet(3, tcp_v4_frame(CLIENT, SERVER, tcp_flags::FIN)));
        assert!(queues.established.is_empty());
        assert_eq!(queues.closed.lock().bottom(), Some(flow));

        let record = record_of(&engine, flow);
        assert_eq!(record.packets_toserver, 2);
        assert_eq!(record.packets_toclient, 1);
        assert_eq!(engine.pool.active_count(), 1);
        assert_eq!(engine.clock.now(), Timestamp::new(3, 0));
        assert_eq!(engine.stats.snapshot().flows_created, 1);
    }

    #[test]
    fn test_distinct_flows_take_distinct_slots() {
        let (worker, engine, _wake) = worker(4);

        worker.process(&packet(1, udp_v4_frame(([1, 1, 1, 1], 1), ([2, 2, 2, 2], 53))));
        worker.process(&packet(1, udp_v4_frame(([1, 1, 1, 1], 2), ([2, 2, 2, 2], 53))));
        worker.process(&packet(1, udp_v4_frame(([1, 1, 1, 1], 1), ([2, 2, 2, 2], 53))));

        assert_eq!(engine.queues.new.len(), 2);
        assert_eq!(engine.pool.active_count(), 2);
        let report = engine.stats.snapshot();
        assert_eq!(report.packets, 3);
        assert_eq!(report.max_packet_len, 42);
        assert_eq!(report.avg_packet_len, 42);
    }

    #[test]
    fn test_full_table_drops_and_wakes_manager() {
        let (worker, engine, wake) = worker(1);

        worker.process(&packet(1, udp_v4_frame(([1, 1, 1, 1], 1), ([2, 2, 2, 2], 2))));
        worker.process(&packet(1, udp_v4_frame(([3, 3, 3, 3], 3), ([4, 4, 4, 4], 4))));

        let report = engine.stats.snapshot();
        assert_eq!(report.flows_created, 1);
        assert_eq!(report.table_full_drops, 1);
        assert!(wake.try_recv().is_ok());
    }

    #[test]
    fn test_undecodable_packet_is_counted() {
        let (worker, engine, _wake) = worker(1);

        worker.process(&packet(1, vec![0u8; 6]));

        let report = engine.stats.snapshot();
        assert_eq!(report.packets, 1);
        assert_eq!(report.undecodable, 1);
        assert_eq!(engine.queues.spare.len(), 1);
    }

    #[test]
    fn test_run_drains_channel() {
        let (worker, engine, _wake) = worker(8);
        let (tx, rx) = channel::bounded(4);

        let handle = std::thread::spawn(move || worker.run(rx));
        for port in 1..=3 {
            tx.send(packet(1, udp_v4_frame(([9, 9, 9, 9], port), ([8, 8, 8, 8], 53))))
                .unwrap();
        }
        drop(tx);
        handle.join().unwrap();

        assert_eq!(engine.tracked(), 3);
    }
}
