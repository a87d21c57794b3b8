use core::net::{IpAddr, Ipv6Addr};

use network_types::ip::IpProto;

pub const IPPROTO_TCP: u8 = IpProto::Tcp as u8;
pub const IPPROTO_UDP: u8 = IpProto::Udp as u8;

/// Flow record passed from the TC hook to userspace via the `EVENTS` RingBuf.
///
/// The byte layout is the wire contract with the consumer:
///
/// | offset | size | field      |
/// |--------|------|------------|
/// | 0      | 16   | `src_ip`   |
/// | 16     | 16   | `dst_ip`   |
/// | 32     | 2    | `src_port` |
/// | 34     | 2    | `dst_port` |
/// | 36     | 1    | `protocol` |
/// | 37     | 1    | `ttl`      |
/// | 38     | 1    | `syn`      |
/// | 39     | 1    | `ack`      |
/// | 40     | 8    | `ts`       |
///
/// IPv4 addresses are stored IPv4-mapped (`::ffff:a.b.c.d`) so both address
/// families share one shape.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "user", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowRecord {
    /// Source address, 16 bytes in network order.
    pub src_ip: [u8; 16],
    /// Destination address, 16 bytes in network order.
    pub dst_ip: [u8; 16],
    /// Source port in network byte order.
    pub src_port: u16,
    /// Destination port in network byte order.
    pub dst_port: u16,
    /// IP protocol number: 6 = TCP, 17 = UDP.
    pub protocol: u8,
    /// IPv4 TTL or IPv6 hop limit.
    pub ttl: u8,
    /// TCP SYN flag, 0 or 1. Always 0 for UDP.
    pub syn: u8,
    /// TCP ACK flag, 0 or 1. Always 0 for UDP.
    pub ack: u8,
    /// Monotonic capture time in nanoseconds, native byte order.
    pub ts: u64,
}

pub const FLOW_RECORD_LEN: usize = core::mem::size_of::<FlowRecord>();

const _: () = assert!(FLOW_RECORD_LEN == 48);

#[cfg(feature = "user")]
unsafe impl aya::Pod for FlowRecord {}

/// Embed an IPv4 address as `::ffff:a.b.c.d`.
#[inline(always)]
pub fn ipv4_mapped(addr: [u8; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[10] = 0xff;
    out[11] = 0xff;
    out[12] = addr[0];
    out[13] = addr[1];
    out[14] = addr[2];
    out[15] = addr[3];
    out
}

impl FlowRecord {
    /// Decode one ring buffer entry. Returns `None` if the entry is shorter
    /// than a record.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FLOW_RECORD_LEN {
            return None;
        }
        // SAFETY: length checked above and every bit pattern is a valid FlowRecord.
        Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const FlowRecord) })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be(self.src_port)
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be(self.dst_port)
    }

    pub fn src_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.src_ip)
    }

    pub fn dst_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.dst_ip)
    }

    /// Source address with IPv4-mapped addresses unmapped.
    pub fn src_ip(&self) -> IpAddr {
        self.src_addr().to_canonical()
    }

    /// Destination address with IPv4-mapped addresses unmapped.
    pub fn dst_ip(&self) -> IpAddr {
        self.dst_addr().to_canonical()
    }

    pub fn is_tcp(&self) -> bool {
        self.protocol == IPPROTO_TCP
    }

    pub fn is_udp(&self) -> bool {
        self.protocol == IPPROTO_UDP
    }

    pub fn syn(&self) -> bool {
        self.syn != 0
    }

    pub fn ack(&self) -> bool {
        self.ack != 0
    }

    pub fn protocol_name(&self) -> &'static str {
        match self.protocol {
            IPPROTO_TCP => "TCP",
            IPPROTO_UDP => "UDP",
            _ => "IP",
        }
    }
}
