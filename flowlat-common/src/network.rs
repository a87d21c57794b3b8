use network_types::{
    eth::EthHdr,
    ip::{Ipv4Hdr, Ipv6Hdr},
};

use crate::classify::Skip;
use crate::frame::Frame;
use crate::record::{ipv4_mapped, IPPROTO_TCP, IPPROTO_UDP};

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;

const ETH_DST_OFFSET: usize = 0;
const ETH_TYPE_OFFSET: usize = 12;

const IPV4_TTL_OFFSET: usize = 8;
const IPV4_PROTO_OFFSET: usize = 9;
const IPV4_SRC_OFFSET: usize = 12;
const IPV4_DST_OFFSET: usize = 16;

const IPV6_NEXT_HDR_OFFSET: usize = 6;
const IPV6_HOP_LIMIT_OFFSET: usize = 7;
const IPV6_SRC_OFFSET: usize = 8;
const IPV6_DST_OFFSET: usize = 24;

/// Transport protocols the classifier reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    #[inline(always)]
    pub fn from_number(proto: u8) -> Option<Self> {
        match proto {
            IPPROTO_TCP => Some(Transport::Tcp),
            IPPROTO_UDP => Some(Transport::Udp),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn number(self) -> u8 {
        match self {
            Transport::Tcp => IPPROTO_TCP,
            Transport::Udp => IPPROTO_UDP,
        }
    }
}

/// Network-layer fields of a frame carrying TCP or UDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkHeader {
    /// Source address, IPv4 addresses already mapped into IPv6 space.
    pub src: [u8; 16],
    pub dst: [u8; 16],
    pub transport: Transport,
    pub ttl: u8,
    /// Byte offset of the transport header from the start of the frame.
    pub transport_offset: usize,
}

/// Destination MAC of an Ethernet frame.
pub fn dst_mac<F: Frame + ?Sized>(frame: &F) -> Result<[u8; 6], Skip> {
    Ok(frame.load::<6>(ETH_DST_OFFSET)?)
}

/// Dispatch on the ethertype and parse the IPv4 or IPv6 header that follows
/// the Ethernet header.
#[inline(always)]
pub fn parse_network<F: Frame + ?Sized>(frame: &F) -> Result<NetworkHeader, Skip> {
    let ether_type = u16::from_be_bytes(frame.load::<2>(ETH_TYPE_OFFSET)?);
    match ether_type {
        ETH_P_IP => parse_ipv4(frame, EthHdr::LEN),
        ETH_P_IPV6 => parse_ipv6(frame, EthHdr::LEN),
        other => Err(Skip::EtherType(other)),
    }
}

/// Fixed 20-byte header; IP options are not skipped.
#[inline(always)]
fn parse_ipv4<F: Frame + ?Sized>(frame: &F, offset: usize) -> Result<NetworkHeader, Skip> {
    frame.ensure(offset, Ipv4Hdr::LEN)?;

    let [proto] = frame.load::<1>(offset + IPV4_PROTO_OFFSET)?;
    let transport = Transport::from_number(proto).ok_or(Skip::Protocol(proto))?;

    let [ttl] = frame.load::<1>(offset + IPV4_TTL_OFFSET)?;
    let src = frame.load::<4>(offset + IPV4_SRC_OFFSET)?;
    let dst = frame.load::<4>(offset + IPV4_DST_OFFSET)?;

    Ok(NetworkHeader {
        src: ipv4_mapped(src),
        dst: ipv4_mapped(dst),
        transport,
        ttl,
        transport_offset: offset + Ipv4Hdr::LEN,
    })
}

/// Fixed 40-byte header; extension headers are not walked, so a next-header
/// other than TCP or UDP is skipped.
#[inline(always)]
fn parse_ipv6<F: Frame + ?Sized>(frame: &F, offset: usize) -> Result<NetworkHeader, Skip> {
    frame.ensure(offset, Ipv6Hdr::LEN)?;

    let [next_hdr] = frame.load::<1>(offset + IPV6_NEXT_HDR_OFFSET)?;
    let transport = Transport::from_number(next_hdr).ok_or(Skip::Protocol(next_hdr))?;

    let [hop_limit] = frame.load::<1>(offset + IPV6_HOP_LIMIT_OFFSET)?;
    let src = frame.load::<16>(offset + IPV6_SRC_OFFSET)?;
    let dst = frame.load::<16>(offset + IPV6_DST_OFFSET)?;

    Ok(NetworkHeader {
        src,
        dst,
        transport,
        ttl: hop_limit,
        transport_offset: offset + Ipv6Hdr::LEN,
    })
}
