use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::packet::types::{EtherType, FiveTuple, IpProto, ParseError, ParsedPacket};

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// Parse an Ethernet frame down to its transport ports.
pub fn parse_ethernet_frame(data: &[u8]) -> Result<ParsedPacket, ParseError> {
    let mut offset = 0;

    let mut ether_type = parse_ethernet(data, &mut offset)?;
    if ether_type == EtherType::Vlan {
        ether_type = parse_vlan(data, &mut offset)?;
    }

    let (src_ip, dst_ip, protocol) = match ether_type {
        EtherType::Ipv4 => parse_ipv4(data, &mut offset)?,
        EtherType::Ipv6 => parse_ipv6(data, &mut offset)?,
        EtherType::Vlan => return Err(ParseError::UnsupportedEtherType(0x8100)),
        EtherType::Other(raw) => return Err(ParseError::UnsupportedEtherType(raw)),
    };

    let (src_port, dst_port, tcp_flags) = match protocol {
        IpProto::Tcp => parse_tcp(data, offset)?,
        IpProto::Udp => {
            let (src_port, dst_port) = parse_ports(data, offset)?;
            (src_port, dst_port, 0)
        }
        IpProto::Icmp | IpProto::Ipv6Icmp => (parse_icmp_type_code(data, offset)?, 0, 0),
        IpProto::Other(_) => (0, 0, 0),
    };

    Ok(ParsedPacket {
        five_tuple: FiveTuple {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        },
        tcp_flags,
    })
}

fn parse_ethernet(data: &[u8], offset: &mut usize) -> Result<EtherType, ParseError> {
    if data.len() < *offset + ETH_HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    let ether_type = u16::from_be_bytes([data[*offset + 12], data[*offset + 13]]);
    *offset += ETH_HEADER_LEN;
    Ok(EtherType::from(ether_type))
}

fn parse_vlan(data: &[u8], offset: &mut usize) -> Result<EtherType, ParseError> {
    if data.len() < *offset + VLAN_TAG_LEN {
        return Err(ParseError::TooShort);
    }
    let ether_type = u16::from_be_bytes([data[*offset + 2], data[*offset + 3]]);
    *offset += VLAN_TAG_LEN;
    Ok(EtherType::from(ether_type))
}

fn parse_ipv4(data: &[u8], offset: &mut usize) -> Result<(IpAddr, IpAddr, IpProto), ParseError> {
    if data.len() < *offset + IPV4_MIN_HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    if data[*offset] >> 4 != 4 {
        return Err(ParseError::InvalidHeader);
    }
    let ihl = usize::from(data[*offset] & 0x0f) * 4;
    if ihl < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::InvalidHeader);
    }

    let protocol = IpProto::from(data[*offset + 9]);
    let src_ip = Ipv4Addr::new(
        data[*offset + 12],
        data[*offset + 13],
        data[*offset + 14],
        data[*offset + 15],
    );
    let dst_ip = Ipv4Addr::new(
        data[*offset + 16],
        data[*offset + 17],
        data[*offset + 18],
        data[*offset + 19],
    );

    *offset += ihl;
    Ok((IpAddr::V4(src_ip), IpAddr::V4(dst_ip), protocol))
}

fn parse_ipv6(data: &[u8], offset: &mut usize) -> Result<(IpAddr, IpAddr, IpProto), ParseError> {
    if data.len() < *offset + IPV6_HEADER_LEN {
        return Err(ParseError::TooShort);
    }
    if data[*offset] >> 4 != 6 {
        return Err(ParseError::InvalidHeader);
    }

    // Extension headers are not walked; the next header is taken as is.
    let next_hdr = IpProto::from(data[*offset + 6]);

    let mut src_ip_bytes = [0u8; 16];
    let mut dst_ip_bytes = [0u8; 16];
    src_ip_bytes.copy_from_slice(&data[*offset + 8..*offset + 24]);
    dst_ip_bytes.copy_from_slice(&data[*offset + 24..*offset + 40]);

    *offset += IPV6_HEADER_LEN;
    Ok((
        IpAddr::V6(Ipv6Addr::from(src_ip_bytes)),
        IpAddr::V6(Ipv6Addr::from(dst_ip_bytes)),
        next_hdr,
    ))
}

fn parse_ports(data: &[u8], offset: usize) -> Result<(u16, u16), ParseError> {
    if data.len() < offset + 4 {
        return Err(ParseError::TooShort);
    }
    let src_port = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let dst_port = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
    Ok((src_port, dst_port))
}

fn parse_tcp(data: &[u8], offset: usize) -> Result<(u16, u16, u8), ParseError> {
    if data.len() < offset + 14 {
        return Err(ParseError::TooShort);
    }
    let (src_port, dst_port) = parse_ports(data, offset)?;
    Ok((src_port, dst_port, data[offset + 13]))
}

fn parse_icmp_type_code(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    if data.len() < offset + 2 {
        return Err(ParseError::TooShort);
    }
    Ok(u16::from(data[offset]) << 8 | u16::from(data[offset + 1]))
}
