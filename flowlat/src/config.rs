use anyhow::Context as _;
use ipnet::IpNet;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Where the classifier is attached on the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
    /// Both hooks; needed to see both halves of a handshake.
    #[default]
    Both,
}

/// Application configuration, loadable from CLI or YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Network interface to attach the eBPF TC classifier on.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Path to the compiled classifier object.
    #[serde(default = "default_ebpf_object")]
    pub ebpf_object: String,

    /// Which TC hooks to attach to.
    #[serde(default)]
    pub direction: Direction,

    /// API server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Seconds an unanswered SYN or UDP request stays in the flow table.
    #[serde(default = "default_flow_timeout")]
    pub flow_timeout: u64,

    /// Seconds between flow table prunes.
    #[serde(default = "default_prune_interval")]
    pub prune_interval: u64,

    /// Quiet mode (suppress non-error logs and per-flow output).
    #[serde(default)]
    pub quiet: bool,

    /// Data retention in seconds (None = keep forever).
    #[serde(default)]
    pub data_retention_seconds: Option<u64>,

    /// Enable reverse DNS resolution for measured peers.
    #[serde(default)]
    pub resolve_dns: bool,

    /// List of CIDRs allowed to access the API (empty = allow all).
    #[serde(default)]
    pub allowed_ips: Vec<String>,

    /// Only track flows with this address on either side.
    #[serde(default)]
    pub filter_ip: Option<String>,

    /// Only track flows with this port on either side.
    #[serde(default)]
    pub filter_port: Option<u16>,
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_ebpf_object() -> String {
    "flowlat-ebpf/target/bpfel-unknown-none/release/flowlat".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "flows.db".to_string()
}

fn default_flow_timeout() -> u64 {
    10
}

fn default_prune_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            ebpf_object: default_ebpf_object(),
            direction: Direction::default(),
            port: default_port(),
            db_path: default_db_path(),
            flow_timeout: default_flow_timeout(),
            prune_interval: default_prune_interval(),
            quiet: false,
            data_retention_seconds: None,
            resolve_dns: false,
            allowed_ips: Vec::new(),
            filter_ip: None,
            filter_port: None,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Merge CLI args into config (CLI takes precedence).
    pub fn merge_cli(&mut self, cli: &CliArgs) {
        if let Some(ref iface) = cli.interface {
            self.interface = iface.clone();
        }
        if let Some(ref object) = cli.ebpf_object {
            self.ebpf_object = object.clone();
        }
        if let Some(direction) = cli.direction {
            self.direction = direction;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(ref db_path) = cli.db_path {
            self.db_path = db_path.clone();
        }
        if let Some(flow_timeout) = cli.flow_timeout {
            self.flow_timeout = flow_timeout;
        }
        if let Some(prune_interval) = cli.prune_interval {
            self.prune_interval = prune_interval;
        }
        if cli.quiet {
            self.quiet = true;
        }
        if cli.data_retention.is_some() {
            self.data_retention_seconds = cli.data_retention;
        }
        if cli.resolve_dns {
            self.resolve_dns = true;
        }
        if !cli.allowed_ips.is_empty() {
            self.allowed_ips = cli.allowed_ips.clone();
        }
        if cli.ip.is_some() {
            self.filter_ip = cli.ip.clone();
        }
        if cli.port_filter.is_some() {
            self.filter_port = cli.port_filter;
        }
    }

    /// Reject values that would otherwise be silently ignored.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref ip) = self.filter_ip {
            ip.parse::<IpAddr>()
                .with_context(|| format!("could not parse IP address {ip}"))?;
        }
        if self.filter_port == Some(0) {
            anyhow::bail!("port filter must be between 1 and 65535");
        }
        for cidr in &self.allowed_ips {
            cidr.parse::<IpNet>()
                .with_context(|| format!("could not parse allowed CIDR {cidr}"))?;
        }
        anyhow::ensure!(self.flow_timeout > 0, "flow timeout must be positive");
        anyhow::ensure!(self.prune_interval > 0, "prune interval must be positive");
        Ok(())
    }
}

use clap::Parser;

/// flowlat: eBPF-based TCP handshake and UDP round-trip latency monitor
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Network interface to attach the eBPF program to (default eth0).
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Path to the compiled eBPF classifier object.
    #[arg(long)]
    pub ebpf_object: Option<String>,

    /// TC hooks to attach to.
    #[arg(long, value_enum)]
    pub direction: Option<Direction>,

    /// Port to serve the API on (default 3000).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// SQLite database path (default flows.db).
    #[arg(long)]
    pub db_path: Option<String>,

    /// Path to YAML config file.
    #[arg(short, long)]
    pub config: Option<String>,

    /// Seconds before an unanswered flow is pruned (default 10).
    #[arg(long)]
    pub flow_timeout: Option<u64>,

    /// Seconds between flow table prunes (default 10).
    #[arg(long)]
    pub prune_interval: Option<u64>,

    /// Quiet mode (suppress non-error logs).
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Data retention in seconds (delete measurements older than this).
    #[arg(long)]
    pub data_retention: Option<u64>,

    /// Enable reverse DNS resolution for measured peers.
    #[arg(long)]
    pub resolve_dns: bool,

    /// IP CIDRs allowed to access the API (e.g., 10.0.0.0/8). Repeat for multiple.
    #[arg(long)]
    pub allowed_ips: Vec<String>,

    /// IP address to track (optional).
    #[arg(long)]
    pub ip: Option<String>,

    /// Port number to track (optional).
    #[arg(long = "track-port")]
    pub port_filter: Option<u16>,
}
