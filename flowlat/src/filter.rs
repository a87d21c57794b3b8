use crate::config::Config;
use flowlat_common::FlowRecord;
use std::net::IpAddr;

/// Optional address/port filter applied to records before flow tracking.
#[derive(Clone, Debug, Default)]
pub struct FilterConfig {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

impl From<&Config> for FilterConfig {
    /// Assumes the config has been validated; an unparsable address is dropped.
    fn from(config: &Config) -> Self {
        Self {
            ip: config
                .filter_ip
                .as_deref()
                .and_then(|ip| ip.parse::<IpAddr>().ok())
                .map(|ip| ip.to_canonical()),
            port: config.filter_port,
        }
    }
}

impl FilterConfig {
    pub fn is_active(&self) -> bool {
        self.ip.is_some() || self.port.is_some()
    }

    /// Check if a record matches the filter criteria on either endpoint.
    pub fn matches(&self, record: &FlowRecord) -> bool {
        if let Some(port) = self.port {
            if record.src_port() != port && record.dst_port() != port {
                return false;
            }
        }

        if let Some(ip) = self.ip {
            if record.src_ip() != ip && record.dst_ip() != ip {
                return false;
            }
        }

        true
    }
}
