use std::time::Duration;

use serde::Serialize;

use crate::{
    flow::FlowKey,
    packet::types::{FiveTuple, IpProto, ParsedPacket, tcp_flags},
    source::Timestamp,
};

/// Lifecycle state of a tracked flow. Each state has its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    /// Traffic seen in one direction only.
    New,
    /// Traffic seen in both directions.
    Established,
    /// A TCP FIN or RST was seen.
    Closed,
}

/// Conversation state kept for one flow slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowRecord {
    pub state: FlowState,
    /// Tuple of the first packet; its source is the client side.
    pub tuple: FiveTuple,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub packets_toserver: u64,
    pub packets_toclient: u64,
    pub bytes_toserver: u64,
    pub bytes_toclient: u64,
    pub tcp_flags_toserver: u8,
    pub tcp_flags_toclient: u8,
}

impl FlowRecord {
    pub fn new(packet: &ParsedPacket, ts: Timestamp, len: usize) -> Self {
        let mut record = Self {
            state: FlowState::New,
            tuple: packet.five_tuple,
            first_seen: ts,
            last_seen: ts,
            packets_toserver: 0,
            packets_toclient: 0,
            bytes_toserver: 0,
            bytes_toclient: 0,
            tcp_flags_toserver: 0,
            tcp_flags_toclient: 0,
        };
        record.update(packet, ts, len);
        record
    }

    pub fn key(&self) -> FlowKey {
        FlowKey::from(&self.tuple)
    }

    /// Accounts one packet and advances the state machine. Returns the state
    /// before the update so the caller can move the flow between queues.
    pub fn update(&mut self, packet: &ParsedPacket, ts: Timestamp, len: usize) -> FlowState {
        let previous = self.state;
        let toserver = packet.five_tuple.src_ip == self.tuple.src_ip
            && packet.five_tuple.src_port == self.tuple.src_port;

        if toserver {
            self.packets_toserver += 1;
            self.bytes_toserver += len as u64;
            self.tcp_flags_toserver |= packet.tcp_flags;
        } else {
            self.packets_toclient += 1;
            self.bytes_toclient += len as u64;
            self.tcp_flags_toclient |= packet.tcp_flags;
        }
        if ts > self.last_seen {
            self.last_seen = ts;
        }

        let closing = self.tuple.protocol == IpProto::Tcp
            && packet.tcp_flags & (tcp_flags::FIN | tcp_flags::RST) != 0;
        self.state = match self.state {
            FlowState::Closed => FlowState::Closed,
            _ if closing => FlowState::Closed,
            FlowState::New if !toserver => FlowState::Established,
            state => state,
        };
        previous
    }

    /// Whether no packet was seen for longer than `timeout` as of `now`.
    pub fn is_idle(&self, now: Timestamp, timeout: Duration) -> bool {
        now.saturating_since(self.last_seen) > timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseReason {
    Timeout,
    Shutdown,
}

/// A flow handed to the exporter when it leaves the flow table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleasedFlow {
    pub reason: ReleaseReason,
    #[serde(flatten)]
    pub record: FlowRecord,
}
