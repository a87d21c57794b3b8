use network_types::{tcp::TcpHdr, udp::UdpHdr};

use crate::classify::Skip;
use crate::frame::Frame;
use crate::network::Transport;

/// Bytes that must be readable at the transport offset before either
/// transport parser runs: the larger of the fixed TCP and UDP headers.
///
/// A UDP datagram shorter than a TCP header is therefore reported as
/// truncated.
pub const TRANSPORT_HDR_MIN: usize = if TcpHdr::LEN > UdpHdr::LEN {
    TcpHdr::LEN
} else {
    UdpHdr::LEN
};

const SRC_PORT_OFFSET: usize = 0;
const DST_PORT_OFFSET: usize = 2;
const TCP_FLAGS_OFFSET: usize = 13;

const TCP_SYN: u8 = 0x02;
const TCP_ACK: u8 = 0x10;

/// Source and destination ports as raw network-order bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub src: [u8; 2],
    pub dst: [u8; 2],
}

/// The 8-bit flags field of a TCP header (CWR..FIN).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    #[inline(always)]
    pub fn syn(self) -> bool {
        self.0 & TCP_SYN != 0
    }

    #[inline(always)]
    pub fn ack(self) -> bool {
        self.0 & TCP_ACK != 0
    }
}

/// A transport segment worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// SYN or SYN-ACK.
    Tcp { ports: Ports, flags: TcpFlags },
    Udp { ports: Ports },
}

impl Segment {
    #[inline(always)]
    pub fn ports(&self) -> Ports {
        match self {
            Segment::Tcp { ports, .. } | Segment::Udp { ports } => *ports,
        }
    }
}

/// Parse the transport header at `offset`. TCP segments without SYN are
/// skipped; every UDP datagram is kept.
#[inline(always)]
pub fn parse_segment<F: Frame + ?Sized>(
    frame: &F,
    offset: usize,
    transport: Transport,
) -> Result<Segment, Skip> {
    match transport {
        Transport::Tcp => {
            let [flags] = frame.load::<1>(offset + TCP_FLAGS_OFFSET)?;
            let flags = TcpFlags(flags);
            if !flags.syn() {
                return Err(Skip::NotSyn);
            }
            Ok(Segment::Tcp {
                ports: read_ports(frame, offset)?,
                flags,
            })
        }
        Transport::Udp => Ok(Segment::Udp {
            ports: read_ports(frame, offset)?,
        }),
    }
}

#[inline(always)]
fn read_ports<F: Frame + ?Sized>(frame: &F, offset: usize) -> Result<Ports, Skip> {
    Ok(Ports {
        src: frame.load::<2>(offset + SRC_PORT_OFFSET)?,
        dst: frame.load::<2>(offset + DST_PORT_OFFSET)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn test_min_header_is_tcp_sized() {
        assert_eq!(TRANSPORT_HDR_MIN, 20);
    }

    #[test]
    fn test_tcp_syn() {
        let seg = tcp(443, 51000, SYN);
        let parsed = parse_segment(&seg[..], 0, Transport::Tcp).unwrap();
        match parsed {
            Segment::Tcp { ports, flags } => {
                assert_eq!(ports.src, 443u16.to_be_bytes());
                assert_eq!(ports.dst, 51000u16.to_be_bytes());
                assert!(flags.syn());
                assert!(!flags.ack());
            }
            other => panic!("unexpected segment {other:?}"),
        }
    }

    #[test]
    fn test_tcp_without_syn_is_skipped() {
        for flags in [ACK, FIN | ACK, RST, PSH | ACK, 0] {
            let seg = tcp(80, 1234, flags);
            assert_eq!(
                parse_segment(&seg[..], 0, Transport::Tcp),
                Err(Skip::NotSyn),
                "flags {flags:#04x}"
            );
        }
    }

    #[test]
    fn test_udp_keeps_every_datagram() {
        let seg = udp(53, 40000, 12);
        let parsed = parse_segment(&seg[..], 0, Transport::Udp).unwrap();
        assert_eq!(
            parsed,
            Segment::Udp {
                ports: Ports {
                    src: 53u16.to_be_bytes(),
                    dst: 40000u16.to_be_bytes(),
                }
            }
        );
    }

    #[test]
    fn test_segment_at_offset() {
        let frame = [vec![0u8; 34], udp(1000, 2000, 0)].concat();
        let parsed = parse_segment(&frame[..], 34, Transport::Udp).unwrap();
        assert_eq!(parsed.ports().src, 1000u16.to_be_bytes());
        assert_eq!(parsed.ports().dst, 2000u16.to_be_bytes());
    }
}
