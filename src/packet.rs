//! Layered decoding of frames read from a raw IP socket.
//!
//! Decoding starts at the layer named by a [`DecodeHint`] and walks down
//! through the transport header. It stops at the first layer that cannot be
//! parsed, keeping everything decoded so far.

use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmpv6::Icmpv6Packet;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// First layer to decode a frame as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeHint {
    Ipv4,
    Ipv6,
}

impl DecodeHint {
    /// `ip6*` networks decode as IPv6; every other network as IPv4.
    pub fn for_network(network: &str) -> Self {
        if network.starts_with("ip6") {
            DecodeHint::Ipv6
        } else {
            DecodeHint::Ipv4
        }
    }
}

/// One decoded protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Ipv4 {
        source: Ipv4Addr,
        destination: Ipv4Addr,
        ttl: u8,
        protocol: u8,
        total_length: u16,
    },
    Ipv6 {
        source: Ipv6Addr,
        destination: Ipv6Addr,
        hop_limit: u8,
        next_header: u8,
        payload_length: u16,
    },
    Icmp {
        icmp_type: u8,
        code: u8,
    },
    Icmpv6 {
        icmp_type: u8,
        code: u8,
    },
    Udp {
        source_port: u16,
        destination_port: u16,
        length: u16,
    },
    Tcp {
        source_port: u16,
        destination_port: u16,
        sequence: u32,
        acknowledgement: u32,
    },
    /// Bytes past the last understood header.
    Payload {
        length: usize,
    },
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Ipv4 {
                source,
                destination,
                ttl,
                protocol,
                total_length,
            } => write!(
                f,
                "IPv4 {source} > {destination} ttl={ttl} proto={protocol} len={total_length}"
            ),
            Layer::Ipv6 {
                source,
                destination,
                hop_limit,
                next_header,
                payload_length,
            } => write!(
                f,
                "IPv6 {source} > {destination} hlim={hop_limit} next={next_header} len={payload_length}"
            ),
            Layer::Icmp { icmp_type, code } => write!(f, "ICMP type={icmp_type} code={code}"),
            Layer::Icmpv6 { icmp_type, code } => {
                write!(f, "ICMPv6 type={icmp_type} code={code}")
            }
            Layer::Udp {
                source_port,
                destination_port,
                length,
            } => write!(f, "UDP {source_port} > {destination_port} len={length}"),
            Layer::Tcp {
                source_port,
                destination_port,
                sequence,
                acknowledgement,
            } => write!(
                f,
                "TCP {source_port} > {destination_port} seq={sequence} ack={acknowledgement}"
            ),
            Layer::Payload { length } => write!(f, "Payload {length} bytes"),
        }
    }
}

/// Why decoding stopped early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{layer}: {reason}")]
pub struct DecodeError {
    pub layer: &'static str,
    pub reason: String,
}

impl DecodeError {
    fn truncated(layer: &'static str, available: usize) -> Self {
        DecodeError {
            layer,
            reason: format!("packet too short ({available} bytes)"),
        }
    }
}

/// Result of decoding one frame: the layers understood plus the error that
/// stopped decoding, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedPacket {
    pub layers: Vec<Layer>,
    pub error: Option<DecodeError>,
}

impl DecodedPacket {
    pub fn error_layer(&self) -> Option<&DecodeError> {
        self.error.as_ref()
    }
}

impl fmt::Display for DecodedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{layer}")?;
        }
        if let Some(err) = &self.error {
            if !self.layers.is_empty() {
                f.write_str(" | ")?;
            }
            write!(f, "DecodeFailure({err})")?;
        }
        Ok(())
    }
}

/// Decode `data` starting at the layer named by `hint`.
pub fn decode(data: &[u8], hint: DecodeHint) -> DecodedPacket {
    let mut packet = DecodedPacket::default();
    let result = match hint {
        DecodeHint::Ipv4 => decode_ipv4(data, &mut packet.layers),
        DecodeHint::Ipv6 => decode_ipv6(data, &mut packet.layers),
    };
    packet.error = result.err();
    packet
}

fn decode_ipv4(data: &[u8], layers: &mut Vec<Layer>) -> Result<(), DecodeError> {
    let ip = Ipv4Packet::new(data).ok_or_else(|| DecodeError::truncated("IPv4", data.len()))?;

    if ip.get_version() != 4 {
        return Err(DecodeError {
            layer: "IPv4",
            reason: format!("invalid version {}", ip.get_version()),
        });
    }
    let header_len = usize::from(ip.get_header_length()) * 4;
    if header_len < 20 || header_len > data.len() {
        return Err(DecodeError {
            layer: "IPv4",
            reason: format!("invalid header length {header_len}"),
        });
    }

    let protocol = ip.get_next_level_protocol();
    layers.push(Layer::Ipv4 {
        source: ip.get_source(),
        destination: ip.get_destination(),
        ttl: ip.get_ttl(),
        protocol: protocol.0,
        total_length: ip.get_total_length(),
    });

    decode_transport(protocol, ip.payload(), layers)
}

fn decode_ipv6(data: &[u8], layers: &mut Vec<Layer>) -> Result<(), DecodeError> {
    let ip = Ipv6Packet::new(data).ok_or_else(|| DecodeError::truncated("IPv6", data.len()))?;

    if ip.get_version() != 6 {
        return Err(DecodeError {
            layer: "IPv6",
            reason: format!("invalid version {}", ip.get_version()),
        });
    }

    let next_header = ip.get_next_header();
    layers.push(Layer::Ipv6 {
        source: ip.get_source(),
        destination: ip.get_destination(),
        hop_limit: ip.get_hop_limit(),
        next_header: next_header.0,
        payload_length: ip.get_payload_length(),
    });

    decode_transport(next_header, ip.payload(), layers)
}

fn decode_transport(
    protocol: IpNextHeaderProtocol,
    data: &[u8],
    layers: &mut Vec<Layer>,
) -> Result<(), DecodeError> {
    let rest = if protocol == IpNextHeaderProtocols::Icmp {
        let icmp = IcmpPacket::new(data).ok_or_else(|| DecodeError::truncated("ICMP", data.len()))?;
        layers.push(Layer::Icmp {
            icmp_type: icmp.get_icmp_type().0,
            code: icmp.get_icmp_code().0,
        });
        data.len().saturating_sub(IcmpPacket::minimum_packet_size())
    } else if protocol == IpNextHeaderProtocols::Icmpv6 {
        let icmp =
            Icmpv6Packet::new(data).ok_or_else(|| DecodeError::truncated("ICMPv6", data.len()))?;
        layers.push(Layer::Icmpv6 {
            icmp_type: icmp.get_icmpv6_type().0,
            code: icmp.get_icmpv6_code().0,
        });
        data.len().saturating_sub(Icmpv6Packet::minimum_packet_size())
    } else if protocol == IpNextHeaderProtocols::Udp {
        let udp = UdpPacket::new(data).ok_or_else(|| DecodeError::truncated("UDP", data.len()))?;
        layers.push(Layer::Udp {
            source_port: udp.get_source(),
            destination_port: udp.get_destination(),
            length: udp.get_length(),
        });
        udp.payload().len()
    } else if protocol == IpNextHeaderProtocols::Tcp {
        let tcp = TcpPacket::new(data).ok_or_else(|| DecodeError::truncated("TCP", data.len()))?;
        layers.push(Layer::Tcp {
            source_port: tcp.get_source(),
            destination_port: tcp.get_destination(),
            sequence: tcp.get_sequence(),
            acknowledgement: tcp.get_acknowledgement(),
        });
        tcp.payload().len()
    } else {
        data.len()
    };

    if rest > 0 {
        layers.push(Layer::Payload { length: rest });
    }
    Ok(())
}
