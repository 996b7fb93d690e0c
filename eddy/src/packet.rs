//! Decoding of captured frames into the 5-tuple that identifies a flow.
//!
//! Only what flow tracking needs is decoded: Ethernet (with at most one VLAN
//! tag), IPv4/IPv6 addresses, TCP/UDP ports and TCP flags, ICMP type/code.

pub mod parser;
pub mod types;
