use std::net::IpAddr;

use crate::packet::types::{FiveTuple, IpProto};

/// Direction-independent identity of a conversation.
///
/// Both directions of the same conversation map to the same key: the
/// endpoint that orders lower (address, then port) is stored first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    lo: (IpAddr, u16),
    hi: (IpAddr, u16),
    protocol: IpProto,
}

impl From<&FiveTuple> for FlowKey {
    fn from(t: &FiveTuple) -> Self {
        let src = (t.src_ip, t.src_port);
        let dst = (t.dst_ip, t.dst_port);
        let (lo, hi) = if src <= dst { (src, dst) } else { (dst, src) };
        Self {
            lo,
            hi,
            protocol: t.protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn tuple(src: ([u8; 4], u16), dst: ([u8; 4], u16), protocol: IpProto) -> FiveTuple {
        FiveTuple {
            src_ip: IpAddr::V4(Ipv4Addr::from(src.0)),
            dst_ip: IpAddr::V4(Ipv4Addr::from(dst.0)),
            src_port: src.1,
            dst_port: dst.1,
            protocol,
        }
    }

    #[test]
    fn test_both_directions_share_a_key() {
        let request = tuple(([10, 0, 0, 9], 443), ([10, 0, 0, 1], 50000), IpProto::Tcp);
        let reply = tuple(([10, 0, 0, 1], 50000), ([10, 0, 0, 9], 443), IpProto::Tcp);
        assert_eq!(FlowKey::from(&request), FlowKey::from(&reply));
    }

    #[test]
    fn test_protocol_is_part_of_the_key() {
        let tcp = tuple(([1, 1, 1, 1], 53), ([2, 2, 2, 2], 53), IpProto::Tcp);
        let udp = FiveTuple {
            protocol: IpProto::Udp,
            ..tcp
        };
        assert_ne!(FlowKey::from(&tcp), FlowKey::from(&udp));
    }

    #[test]
    fn test_ports_distinguish_same_hosts() {
        let a = tuple(([1, 1, 1, 1], 1000), ([2, 2, 2, 2], 80), IpProto::Tcp);
        let b = tuple(([1, 1, 1, 1], 1001), ([2, 2, 2, 2], 80), IpProto::Tcp);
        assert_ne!(FlowKey::from(&a), FlowKey::from(&b));
    }
}
