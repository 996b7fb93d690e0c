use std::{fmt, net::IpAddr};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpProto {
    Icmp,
    Tcp,
    Udp,
    Ipv6Icmp,
    Other(u8),
}

impl From<u8> for IpProto {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProto::Icmp,
            6 => IpProto::Tcp,
            17 => IpProto::Udp,
            58 => IpProto::Ipv6Icmp,
            other => IpProto::Other(other),
        }
    }
}

impl From<IpProto> for u8 {
    fn from(proto: IpProto) -> Self {
        match proto {
            IpProto::Icmp => 1,
            IpProto::Tcp => 6,
            IpProto::Udp => 17,
            IpProto::Ipv6Icmp => 58,
            IpProto::Other(other) => other,
        }
    }
}

impl fmt::Display for IpProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProto::Icmp => write!(f, "icmp"),
            IpProto::Tcp => write!(f, "tcp"),
            IpProto::Udp => write!(f, "udp"),
            IpProto::Ipv6Icmp => write!(f, "ipv6-icmp"),
            IpProto::Other(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for IpProto {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Vlan,
    Other(u16),
}

impl From<u16> for EtherType {
    fn from(value: u16) -> Self {
        match value {
            0x0800 => EtherType::Ipv4,
            0x86dd => EtherType::Ipv6,
            0x8100 => EtherType::Vlan,
            other => EtherType::Other(other),
        }
    }
}

/// Five-tuple of a packet, in the packet's own direction.
///
/// For ICMP the type and code are packed into `src_port` as
/// `type << 8 | code`, `dst_port` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FiveTuple {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: IpProto,
}

pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const RST: u8 = 0x04;
    #[cfg(test)]
    pub const SYN: u8 = 0x02;
    #[cfg(test)]
    pub const ACK: u8 = 0x10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket {
    pub five_tuple: FiveTuple,
    /// TCP flags byte, zero for other protocols.
    pub tcp_flags: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("packet too short")]
    TooShort,
    #[error("invalid header")]
    InvalidHeader,
    #[error("unsupported ether type {0:#06x}")]
    UnsupportedEtherType(u16),
}
