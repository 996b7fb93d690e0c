//! State shared by the packet workers and the flow manager.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::{
    flow::{FlowPool, FlowQueues},
    source::Timestamp,
};

/// Newest packet timestamp seen by any worker. Flow expiry is measured
/// against this clock rather than wall time.
#[derive(Debug, Default)]
pub struct PacketClock(AtomicU64);

impl PacketClock {
    pub fn advance(&self, ts: Timestamp) {
        self.0.fetch_max(ts.as_micros(), Ordering::Relaxed);
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Default)]
pub struct EngineStats {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
    pub max_packet_len: AtomicU64,
    pub undecodable: AtomicU64,
    pub table_full_drops: AtomicU64,
    pub flows_created: AtomicU64,
    pub flows_timed_out: AtomicU64,
    pub flows_flushed: AtomicU64,
}

impl EngineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Accounts one packet of `len` bytes handed to a worker.
    pub fn record_packet(&self, len: usize) {
        let len = len as u64;
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(len, Ordering::Relaxed);
        self.max_packet_len.fetch_max(len, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineReport {
        let packets = self.packets.load(Ordering::Relaxed);
        let bytes = self.bytes.load(Ordering::Relaxed);
        EngineReport {
            packets,
            bytes,
            avg_packet_len: bytes.checked_div(packets).unwrap_or(0),
            max_packet_len: self.max_packet_len.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            table_full_drops: self.table_full_drops.load(Ordering::Relaxed),
            flows_created: self.flows_created.load(Ordering::Relaxed),
            flows_timed_out: self.flows_timed_out.load(Ordering::Relaxed),
            flows_flushed: self.flows_flushed.load(Ordering::Relaxed),
        }
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    /// Packets handed to workers.
    pub packets: u64,
    pub bytes: u64,
    pub avg_packet_len: u64,
    pub max_packet_len: u64,
    pub undecodable: u64,
    /// Packets of unknown flows dropped because no slot was free.
    pub table_full_drops: u64,
    pub flows_created: u64,
    pub flows_timed_out: u64,
    /// Flows still tracked at shutdown and released then.
    pub flows_flushed: u64,
}

pub struct FlowEngine {
    pub pool: FlowPool,
    pub queues: FlowQueues,
    pub clock: PacketClock,
    pub stats: EngineStats,
}

impl FlowEngine {
    pub fn new(max_flows: usize) -> Self {
        let pool = FlowPool::new(max_flows);
        let queues = FlowQueues::new(&pool);
        Self {
            pool,
            queues,
            clock: PacketClock::default(),
            stats: EngineStats::default(),
        }
    }

    /// Number of slots currently holding a flow.
    pub fn tracked(&self) -> usize {
        self.queues
            .active()
            .iter()
            .map(|(_, queue)| queue.len())
            .sum()
    }
}
