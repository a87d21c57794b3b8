//! Hand-built frames for tests.

use core::net::Ipv6Addr;

pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PSH: u8 = 0x08;
pub const ACK: u8 = 0x10;

const SRC_MAC: [u8; 6] = [0, 1, 2, 3, 4, 5];
const DST_MAC: [u8; 6] = [5, 4, 3, 2, 1, 0];

pub fn v6(addr: &str) -> [u8; 16] {
    addr.parse::<Ipv6Addr>().unwrap().octets()
}

pub fn eth(ether_type: u16) -> Vec<u8> {
    eth_to(DST_MAC, ether_type)
}

pub fn eth_to(dst: [u8; 6], ether_type: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(14);
    out.extend_from_slice(&dst);
    out.extend_from_slice(&SRC_MAC);
    out.extend_from_slice(&ether_type.to_be_bytes());
    out
}

/// 20-byte IPv4 header without options. Checksum is left zero.
pub fn ipv4(proto: u8, ttl: u8, src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
    let mut out = vec![0u8; 20];
    out[0] = 0x45;
    out[2..4].copy_from_slice(&20u16.to_be_bytes());
    out[8] = ttl;
    out[9] = proto;
    out[12..16].copy_from_slice(&src);
    out[16..20].copy_from_slice(&dst);
    out
}

pub fn ipv6(next_hdr: u8, hop_limit: u8, src: [u8; 16], dst: [u8; 16]) -> Vec<u8> {
    let mut out = vec![0u8; 40];
    out[0] = 0x60;
    out[6] = next_hdr;
    out[7] = hop_limit;
    out[8..24].copy_from_slice(&src);
    out[24..40].copy_from_slice(&dst);
    out
}

/// 20-byte TCP header without options.
pub fn tcp(src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
    let mut out = vec![0u8; 20];
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[12] = 5 << 4;
    out[13] = flags;
    out[14..16].copy_from_slice(&64240u16.to_be_bytes());
    out
}

/// UDP header followed by `payload_len` zero bytes.
pub fn udp(src_port: u16, dst_port: u16, payload_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; 8 + payload_len];
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[4..6].copy_from_slice(&((8 + payload_len) as u16).to_be_bytes());
    out
}
