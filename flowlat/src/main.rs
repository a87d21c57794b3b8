use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aya::maps::{MapData, RingBuf};

use flowlat_common::FlowRecord;

mod api;
mod config;
mod dns;
mod filter;
mod flowtable;
mod latency;
mod probe;
mod state;
mod storage;

use config::{CliArgs, Config};
use filter::FilterConfig;
use flowtable::FlowTable;
use latency::FlowLatency;
use probe::Probe;
use state::TrafficState;

/// Peers without a new measurement for this long drop out of the live view.
const PEER_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();

    // Load config from file if provided, otherwise use defaults.
    let mut config = if let Some(ref config_path) = cli.config {
        Config::from_file(Path::new(config_path))?
    } else {
        Config::default()
    };
    config.merge_cli(&cli);

    // Logging.
    if config.quiet {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new("error"))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
            ))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    config.validate()?;

    // ── eBPF setup ────────────────────────────────────────────────────
    let mut probe = Probe::load(Path::new(&config.ebpf_object))?;
    probe.attach(&config.interface, config.direction)?;
    let ring_buf = probe.events()?;

    let filter = FilterConfig::from(&config);
    if filter.is_active() {
        tracing::info!("Filtering results on ip={:?}, port={:?}", filter.ip, filter.port);
    }

    // ── Channels ──────────────────────────────────────────────────────
    let (tx, rx) = mpsc::channel::<FlowLatency>(10000);

    // ── State & Storage ───────────────────────────────────────────────
    let traffic_state = Arc::new(TrafficState::new());
    let flow_table = Arc::new(FlowTable::new());
    let storage = Arc::new(storage::Storage::new(&config.db_path)?);

    // ── Storage Writer Task ───────────────────────────────────────────
    let storage_clone = storage.clone();
    let writer = tokio::spawn(async move {
        storage_clone.run_writer(rx).await;
    });

    // ── DNS Cache (optional) ──────────────────────────────────────────
    let dns_cache = if config.resolve_dns {
        tracing::info!("Reverse DNS resolution enabled");
        Some(Arc::new(dns::DnsCache::new(
            Duration::from_secs(300),
            Duration::from_secs(2),
        )))
    } else {
        None
    };

    // ── Flow Table Prune Task ─────────────────────────────────────────
    let flow_table_prune = flow_table.clone();
    let traffic_state_cleanup = traffic_state.clone();
    let dns_prune = dns_cache.clone();
    let flow_timeout = Duration::from_secs(config.flow_timeout);
    let prune_interval = config.prune_interval;
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(prune_interval));
        loop {
            ticker.tick().await;
            let pruned = flow_table_prune.prune(flow_timeout);
            if pruned > 0 {
                tracing::debug!(
                    "Pruned {} stale flows, {} still open",
                    pruned,
                    flow_table_prune.len()
                );
            }
            traffic_state_cleanup.cleanup_stale_peers(PEER_TIMEOUT);
            if let Some(ref cache) = dns_prune {
                let expired = cache.prune();
                if expired > 0 {
                    tracing::debug!(
                        "Expired {} DNS entries, {} cached",
                        expired,
                        cache.len()
                    );
                }
            }
        }
    });

    // ── Data Retention Task ───────────────────────────────────────────
    if let Some(retention_seconds) = config.data_retention_seconds {
        let storage_retention = storage.clone();
        tokio::spawn(async move {
            let mut retention_interval = interval(Duration::from_secs(60));
            loop {
                retention_interval.tick().await;
                match storage_retention.delete_old_data(retention_seconds) {
                    Ok(deleted) if deleted > 0 => {
                        tracing::info!("Data retention: deleted {} old flows", deleted);
                    }
                    Err(e) => {
                        tracing::error!("Data retention cleanup failed: {}", e);
                    }
                    _ => {}
                }
            }
        });
    }

    // ── RingBuf Poller ────────────────────────────────────────────────
    let poller = Poller {
        tx,
        traffic: traffic_state.clone(),
        flows: flow_table.clone(),
        filter,
        dns_cache,
        print_flows: !config.quiet,
    };
    let poller = tokio::spawn(poller.run(ring_buf));

    // ── HTTP API ──────────────────────────────────────────────────────
    let app_state = Arc::new(api::AppState {
        traffic: traffic_state.clone(),
        storage: storage.clone(),
        flows: flow_table.clone(),
        start_time: std::time::Instant::now(),
    });

    let app = api::router(app_state, &config.allowed_ips);

    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("Server running on http://0.0.0.0:{}", config.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The poller owns the only sender; stopping it closes the channel and
    // lets the writer flush what it has buffered.
    poller.abort();
    let _ = poller.await;
    if let Err(e) = writer.await {
        tracing::error!("Storage writer failed: {}", e);
    }

    probe.close();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Caught signal... detaching and exiting");
}

/// Drains flow records from the classifier and turns them into latency
/// measurements.
struct Poller {
    tx: mpsc::Sender<FlowLatency>,
    traffic: Arc<TrafficState>,
    flows: Arc<FlowTable>,
    filter: FilterConfig,
    dns_cache: Option<Arc<dns::DnsCache>>,
    print_flows: bool,
}

impl Poller {
    /// Continuously poll the eBPF RingBuf. Entries are copied out before any
    /// await so the ring buffer slots are released promptly.
    async fn run(self, mut ring_buf: RingBuf<MapData>) {
        let mut batch = Vec::new();
        loop {
            while let Some(item) = ring_buf.next() {
                match FlowRecord::from_bytes(&item) {
                    Some(record) => batch.push(record),
                    None => {
                        tracing::warn!("Could not decode flow record of {} bytes", item.len());
                        self.traffic.decode_error();
                    }
                }
            }

            if batch.is_empty() {
                // Yield briefly to avoid busy-spinning when the ring buffer is empty.
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }

            for record in batch.drain(..) {
                self.handle(&record).await;
            }
        }
    }

    async fn handle(&self, record: &FlowRecord) {
        if !self.filter.matches(record) {
            return;
        }
        self.traffic.record(record);

        let Some(mut flow) = latency::observe(record, &self.flows) else {
            return;
        };

        if let Some(ref cache) = self.dns_cache {
            flow.src_hostname = cache.resolve(record.dst_ip()).await;
            flow.dst_hostname = cache.resolve(record.src_ip()).await;
        }

        if self.print_flows {
            println!("{flow}");
        }
        self.traffic.observe(&flow);
        if let Err(e) = self.tx.send(flow).await {
            tracing::warn!("Storage writer gone, dropping measurement: {}", e.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::Ordering;

    fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, ts: u64) -> FlowRecord {
        FlowRecord {
            src_ip: Ipv4Addr::from(src).to_ipv6_mapped().octets(),
            dst_ip: Ipv4Addr::from(dst).to_ipv6_mapped().octets(),
            src_port: sport.to_be(),
            dst_port: dport.to_be(),
            protocol: flowlat_common::IPPROTO_UDP,
            ttl: 64,
            ts,
            ..Default::default()
        }
    }

    fn poller(tx: mpsc::Sender<FlowLatency>) -> Poller {
        Poller {
            tx,
            traffic: Arc::new(TrafficState::new()),
            flows: Arc::new(FlowTable::new()),
            filter: FilterConfig::default(),
            dns_cache: None,
            print_flows: false,
        }
    }

    #[tokio::test]
    async fn test_measurement_reaches_writer() {
        let (tx, mut rx) = mpsc::channel(4);
        let poller = poller(tx);

        poller.handle(&udp([10, 0, 0, 1], 5353, [10, 0, 0, 2], 53, 1_000)).await;
        poller.handle(&udp([10, 0, 0, 2], 53, [10, 0, 0, 1], 5353, 2_001_000)).await;

        let flow = rx.recv().await.unwrap();
        assert_eq!(flow.dst_port, 53);
        assert_eq!(poller.traffic.total_records.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_closed_writer_does_not_stop_measuring() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let poller = poller(tx);

        poller.handle(&udp([10, 0, 0, 1], 5353, [10, 0, 0, 2], 53, 1_000)).await;
        poller.handle(&udp([10, 0, 0, 2], 53, [10, 0, 0, 1], 5353, 2_001_000)).await;

        assert_eq!(poller.traffic.flows_measured.load(Ordering::Relaxed), 1);
        assert!(poller.flows.is_empty());
    }
}
