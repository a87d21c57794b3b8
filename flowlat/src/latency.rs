use crate::flowtable::{flow_hash, FlowTable};
use flowlat_common::FlowRecord;
use serde::Serialize;
use std::fmt;

/// One measured round trip: TCP SYN to SYN-ACK, or a UDP datagram to the
/// first datagram coming back on the same flow.
#[derive(Debug, Clone, Serialize)]
pub struct FlowLatency {
    /// Wall-clock time of the measurement, ms since the Unix epoch.
    pub timestamp: i64,
    pub protocol: String,
    /// Side that opened the flow.
    pub src_ip: String,
    pub src_port: u16,
    /// Side that answered.
    pub dst_ip: String,
    pub dst_port: u16,
    /// TTL / hop limit of the reply.
    pub ttl: u8,
    pub latency_ms: f64,
    pub src_hostname: Option<String>,
    pub dst_hostname: Option<String>,
}

impl FlowLatency {
    /// Build a measurement from the reply record and the timestamp of the
    /// record that opened the flow. The reply travels responder -> initiator,
    /// so its destination is reported as the source.
    pub fn from_reply(reply: &FlowRecord, first_ts: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            protocol: reply.protocol_name().to_string(),
            src_ip: reply.dst_ip().to_string(),
            src_port: reply.dst_port(),
            dst_ip: reply.src_ip().to_string(),
            dst_port: reply.src_port(),
            ttl: reply.ttl,
            latency_ms: reply.ts.saturating_sub(first_ts) as f64 / 1_000_000.0,
            src_hostname: None,
            dst_hostname: None,
        }
    }
}

impl fmt::Display for FlowLatency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}) Flow | src: {}:{} | dst: {}:{} | TTL: {} |\tlatency: {:.3} ms",
            self.protocol,
            self.src_hostname.as_deref().unwrap_or(&self.src_ip),
            self.src_port,
            self.dst_hostname.as_deref().unwrap_or(&self.dst_ip),
            self.dst_port,
            self.ttl,
            self.latency_ms,
        )
    }
}

/// Feed one record into the flow table.
///
/// A SYN (or any UDP datagram) without an open entry opens one. An ACK-bearing
/// record (SYN-ACK) or a UDP datagram that finds an open entry closes it and
/// yields the measurement. Everything else is ignored.
pub fn observe(record: &FlowRecord, table: &FlowTable) -> Option<FlowLatency> {
    if !record.is_tcp() && !record.is_udp() {
        tracing::warn!("unexpected protocol number {} in flow record", record.protocol);
        return None;
    }

    let hash = flow_hash(record);
    match table.get(hash) {
        None if record.syn() || record.is_udp() => {
            table.insert(hash, record.ts);
            None
        }
        Some(first_ts) if record.ack() || record.is_udp() => {
            table.remove(hash);
            Some(FlowLatency::from_reply(record, first_ts))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tcp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, ack: bool, ts: u64) -> FlowRecord {
        FlowRecord {
            src_ip: Ipv4Addr::from(src).to_ipv6_mapped().octets(),
            dst_ip: Ipv4Addr::from(dst).to_ipv6_mapped().octets(),
            src_port: sport.to_be(),
            dst_port: dport.to_be(),
            protocol: 6,
            ttl: 57,
            syn: 1,
            ack: ack as u8,
            ts,
        }
    }

    fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, ts: u64) -> FlowRecord {
        FlowRecord {
            src_ip: Ipv4Addr::from(src).to_ipv6_mapped().octets(),
            dst_ip: Ipv4Addr::from(dst).to_ipv6_mapped().octets(),
            src_port: sport.to_be(),
            dst_port: dport.to_be(),
            protocol: 17,
            ttl: 120,
            ts,
            ..Default::default()
        }
    }

    const LOCAL: [u8; 4] = [192, 168, 0, 156];
    const REMOTE: [u8; 4] = [1, 1, 1, 1];

    #[test]
    fn test_syn_then_syn_ack() {
        let table = FlowTable::new();
        let syn = tcp(LOCAL, 51000, REMOTE, 443, false, 1_000_000);
        let syn_ack = tcp(REMOTE, 443, LOCAL, 51000, true, 13_500_000);

        assert!(observe(&syn, &table).is_none());
        assert_eq!(table.len(), 1);

        let m = observe(&syn_ack, &table).unwrap();
        assert_eq!(m.protocol, "TCP");
        assert_eq!(m.src_ip, "192.168.0.156");
        assert_eq!(m.src_port, 51000);
        assert_eq!(m.dst_ip, "1.1.1.1");
        assert_eq!(m.dst_port, 443);
        assert_eq!(m.ttl, 57);
        assert!((m.latency_ms - 12.5).abs() < f64::EPSILON);
        assert!(table.is_empty());
    }

    #[test]
    fn test_retransmitted_syn_keeps_first_timestamp() {
        let table = FlowTable::new();
        observe(&tcp(LOCAL, 51000, REMOTE, 443, false, 1_000_000), &table);
        observe(&tcp(LOCAL, 51000, REMOTE, 443, false, 2_000_000), &table);

        let m = observe(&tcp(REMOTE, 443, LOCAL, 51000, true, 5_000_000), &table).unwrap();
        assert!((m.latency_ms - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_udp_request_response() {
        let table = FlowTable::new();
        assert!(observe(&udp(LOCAL, 53264, REMOTE, 53, 10_000_000), &table).is_none());

        let m = observe(&udp(REMOTE, 53, LOCAL, 53264, 30_250_000), &table).unwrap();
        assert_eq!(m.protocol, "UDP");
        assert_eq!(m.src_ip, "192.168.0.156");
        assert_eq!(m.dst_port, 53);
        assert_eq!(m.ttl, 120);
        assert!((m.latency_ms - 20.25).abs() < 1e-9);
        assert!(table.is_empty());
    }

    #[test]
    fn test_display_format() {
        let table = FlowTable::new();
        observe(&udp(LOCAL, 53264, REMOTE, 53, 0), &table);
        let m = observe(&udp(REMOTE, 53, LOCAL, 53264, 1_500_000), &table).unwrap();
        assert_eq!(
            m.to_string(),
            "(UDP) Flow | src: 192.168.0.156:53264 | dst: 1.1.1.1:53 | TTL: 120 |\tlatency: 1.500 ms"
        );
    }

    #[test]
    fn test_clock_skew_does_not_underflow() {
        let table = FlowTable::new();
        observe(&udp(LOCAL, 1, REMOTE, 2, 5_000), &table);
        let m = observe(&udp(REMOTE, 2, LOCAL, 1, 1_000), &table).unwrap();
        assert_eq!(m.latency_ms, 0.0);
    }
}
