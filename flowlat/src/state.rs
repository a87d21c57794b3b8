use dashmap::DashMap;
use flowlat_common::FlowRecord;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use crate::latency::FlowLatency;

/// Running latency figures for one responder (`PROTO ip:port`).
#[derive(Debug, Serialize, Clone)]
pub struct PeerStats {
    pub samples: u64,
    pub last_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    #[serde(skip)]
    pub last_seen: Instant,
}

impl PeerStats {
    fn first(latency_ms: f64) -> Self {
        Self {
            samples: 1,
            last_ms: latency_ms,
            min_ms: latency_ms,
            max_ms: latency_ms,
            mean_ms: latency_ms,
            last_seen: Instant::now(),
        }
    }

    fn add(&mut self, latency_ms: f64) {
        self.samples += 1;
        self.last_ms = latency_ms;
        self.min_ms = self.min_ms.min(latency_ms);
        self.max_ms = self.max_ms.max(latency_ms);
        self.mean_ms += (latency_ms - self.mean_ms) / self.samples as f64;
        self.last_seen = Instant::now();
    }
}

pub struct TrafficState {
    pub peers: DashMap<String, PeerStats>,
    pub total_records: AtomicU64,
    pub tcp_records: AtomicU64,
    pub udp_records: AtomicU64,
    pub flows_measured: AtomicU64,
    pub decode_errors: AtomicU64,
}

impl TrafficState {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            total_records: AtomicU64::new(0),
            tcp_records: AtomicU64::new(0),
            udp_records: AtomicU64::new(0),
            flows_measured: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        }
    }

    /// Count one record drained from the ring buffer.
    pub fn record(&self, record: &FlowRecord) {
        self.total_records.fetch_add(1, Ordering::Relaxed);
        if record.is_tcp() {
            self.tcp_records.fetch_add(1, Ordering::Relaxed);
        } else if record.is_udp() {
            self.udp_records.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe(&self, flow: &FlowLatency) {
        let key = format!("{} {}:{}", flow.protocol, flow.dst_ip, flow.dst_port);

        self.peers
            .entry(key)
            .and_modify(|stats| stats.add(flow.latency_ms))
            .or_insert_with(|| PeerStats::first(flow.latency_ms));

        self.flows_measured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_peers(&self) -> usize {
        self.peers.len()
    }

    pub fn cleanup_stale_peers(&self, timeout: tokio::time::Duration) {
        let now = Instant::now();
        self.peers
            .retain(|_, stats| now.duration_since(stats.last_seen) <= timeout);
    }
}

impl Default for TrafficState {
    fn default() -> Self {
        Self::new()
    }
}
