use crate::flowtable::FlowTable;
use crate::state::TrafficState;
use crate::storage::Storage;
use axum::{
    extract::{ConnectInfo, Query, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ipnet::IpNet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub traffic: Arc<TrafficState>,
    pub storage: Arc<Storage>,
    pub flows: Arc<FlowTable>,
    pub start_time: Instant,
}

// ── Prometheus Metrics ────────────────────────────────────────────────────────

struct Metrics {
    registry: Registry,
    records_total: Counter,
    flows_measured_total: Counter,
    decode_errors_total: Counter,
    open_flows: Gauge,
    peers: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let mut registry = Registry::default();
        let records_total = Counter::default();
        let flows_measured_total = Counter::default();
        let decode_errors_total = Counter::default();
        let open_flows = Gauge::default();
        let peers = Gauge::default();

        registry.register(
            "flowlat_records",
            "Flow records drained from the classifier",
            records_total.clone(),
        );
        registry.register(
            "flowlat_flows_measured",
            "Flows with a completed latency measurement",
            flows_measured_total.clone(),
        );
        registry.register(
            "flowlat_decode_errors",
            "Ring buffer entries that could not be decoded",
            decode_errors_total.clone(),
        );
        registry.register(
            "flowlat_open_flows",
            "Flows waiting for a reply",
            open_flows.clone(),
        );
        registry.register(
            "flowlat_peers",
            "Responders with latency statistics",
            peers.clone(),
        );

        Self {
            registry,
            records_total,
            flows_measured_total,
            decode_errors_total,
            open_flows,
            peers,
        }
    }
}

/// Counters are monotonic, so bring one up to `target` by its delta.
fn sync_counter(counter: &Counter, target: u64) {
    let current = counter.get();
    if target > current {
        counter.inc_by(target - current);
    }
}

// ── Response Types ────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    open_flows: usize,
    total_records: u64,
}

#[derive(Serialize)]
pub struct StatsResponse {
    uptime_seconds: u64,
    total_records: u64,
    tcp_records: u64,
    udp_records: u64,
    flows_measured: u64,
    decode_errors: u64,
    open_flows: usize,
    peers: usize,
    records_per_second: f64,
}

#[derive(Deserialize)]
pub struct HistoryParams {
    limit: Option<usize>,
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>, allowed_ips: &[String]) -> Router {
    let metrics = Arc::new(Metrics::new());

    let mut app = Router::new()
        .route("/api/live", get(get_live_stats))
        .route("/api/history", get(get_history))
        .route("/api/health", get(get_health))
        .route("/api/stats", get(get_stats))
        .route("/api/stream", get(ws_handler))
        .route("/metrics", get({
            let m = metrics.clone();
            let s = state.clone();
            move || get_metrics(s.clone(), m.clone())
        }));

    // Apply IP allowlist middleware if configured.
    if !allowed_ips.is_empty() {
        let nets: Arc<Vec<IpNet>> = Arc::new(
            allowed_ips
                .iter()
                .filter_map(|s| s.parse::<IpNet>().ok())
                .collect(),
        );
        app = app.layer(middleware::from_fn(move |req, next| {
            let nets = nets.clone();
            ip_allowlist(req, next, nets)
        }));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

// ── IP Allowlist Middleware ────────────────────────────────────────────────────

async fn ip_allowlist(
    req: axum::extract::Request,
    next: middleware::Next,
    allowed: Arc<Vec<IpNet>>,
) -> impl IntoResponse {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        let ip = connect_info.0.ip().to_canonical();
        if allowed.iter().any(|net| net.contains(&ip)) {
            return next.run(req).await.into_response();
        }
        tracing::debug!("rejecting API request from {}", ip);
        return StatusCode::FORBIDDEN.into_response();
    }
    // Served with into_make_service_with_connect_info, so ConnectInfo is always present.
    next.run(req).await.into_response()
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        open_flows: state.flows.len(),
        total_records: state.traffic.total_records.load(Ordering::Relaxed),
    })
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    let total_records = state.traffic.total_records.load(Ordering::Relaxed);

    let records_per_second = if uptime > 0 {
        total_records as f64 / uptime as f64
    } else {
        0.0
    };

    Json(StatsResponse {
        uptime_seconds: uptime,
        total_records,
        tcp_records: state.traffic.tcp_records.load(Ordering::Relaxed),
        udp_records: state.traffic.udp_records.load(Ordering::Relaxed),
        flows_measured: state.traffic.flows_measured.load(Ordering::Relaxed),
        decode_errors: state.traffic.decode_errors.load(Ordering::Relaxed),
        open_flows: state.flows.len(),
        peers: state.traffic.active_peers(),
        records_per_second,
    })
}

async fn get_live_stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut peers: Vec<_> = state
        .traffic
        .peers
        .iter()
        .map(|entry| {
            let (key, stats) = entry.pair();
            (key.clone(), stats.clone())
        })
        .collect();

    peers.sort_by(|a, b| b.1.samples.cmp(&a.1.samples));
    peers.truncate(50);

    let peers: Vec<_> = peers
        .into_iter()
        .map(|(peer, stats)| serde_json::json!({ "peer": peer, "stats": stats }))
        .collect();

    Json(serde_json::json!({
        "peers": peers,
        "open_flows": state.flows.len(),
        "flows_measured": state.traffic.flows_measured.load(Ordering::Relaxed),
    }))
}

async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(100).min(1000);
    match state.storage.query_history(limit) {
        Ok(data) => Json(serde_json::json!(data)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn get_metrics(state: Arc<AppState>, metrics: Arc<Metrics>) -> impl IntoResponse {
    sync_counter(
        &metrics.records_total,
        state.traffic.total_records.load(Ordering::Relaxed),
    );
    sync_counter(
        &metrics.flows_measured_total,
        state.traffic.flows_measured.load(Ordering::Relaxed),
    );
    sync_counter(
        &metrics.decode_errors_total,
        state.traffic.decode_errors.load(Ordering::Relaxed),
    );
    metrics.open_flows.set(state.flows.len() as i64);
    metrics.peers.set(state.traffic.active_peers() as i64);

    let mut buf = String::new();
    if let Err(e) = encode(&mut buf, &metrics.registry) {
        tracing::error!("Failed to encode metrics: {}", e);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));

    loop {
        interval.tick().await;

        let stats = serde_json::json!({
            "total_records": state.traffic.total_records.load(Ordering::Relaxed),
            "flows_measured": state.traffic.flows_measured.load(Ordering::Relaxed),
            "open_flows": state.flows.len(),
        });

        if socket
            .send(Message::Text(stats.to_string().into()))
            .await
            .is_err()
        {
            break;
        }
    }
}
