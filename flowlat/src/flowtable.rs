use dashmap::DashMap;
use flowlat_common::FlowRecord;
use std::hash::{DefaultHasher, Hash, Hasher};
use tokio::time::{Duration, Instant};

/// Direction-independent key of a flow.
///
/// Each endpoint is hashed on its own and the results are summed, so a
/// request and its reply (endpoints swapped) land on the same key.
pub fn flow_hash(record: &FlowRecord) -> u64 {
    let src = endpoint_hash(&record.src_ip, record.src_port());
    let dst = endpoint_hash(&record.dst_ip, record.dst_port());

    let mut hasher = DefaultHasher::new();
    u16::from(record.protocol).hash(&mut hasher);

    src.wrapping_add(dst).wrapping_add(hasher.finish())
}

fn endpoint_hash(addr: &[u8; 16], port: u16) -> u64 {
    let mut hasher = DefaultHasher::new();
    addr.hash(&mut hasher);
    port.hash(&mut hasher);
    hasher.finish()
}

struct FlowEntry {
    /// Kernel timestamp of the first record of the flow.
    first_ts: u64,
    inserted_at: Instant,
}

/// Open flows waiting for their reply, keyed by [`flow_hash`].
#[derive(Default)]
pub struct FlowTable {
    entries: DashMap<u64, FlowEntry>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hash: u64, timestamp: u64) {
        self.entries.insert(
            hash,
            FlowEntry {
                first_ts: timestamp,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, hash: u64) -> Option<u64> {
        self.entries.get(&hash).map(|entry| entry.first_ts)
    }

    pub fn remove(&self, hash: u64) -> Option<u64> {
        let removed = self.entries.remove(&hash).map(|(_, entry)| entry.first_ts);
        if removed.is_none() {
            tracing::debug!("hash {} is not in flow table", hash);
        }
        removed
    }

    /// Drop entries older than `timeout`. Returns how many were removed.
    pub fn prune(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|hash, entry| {
            let stale = now.duration_since(entry.inserted_at) > timeout;
            if stale {
                tracing::debug!("pruning stale entry from flow table: {}", hash);
            }
            !stale
        });
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
