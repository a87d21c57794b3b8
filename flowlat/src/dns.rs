use dashmap::DashMap;
use std::net::IpAddr;
use tokio::time::{Duration, Instant};

/// Blocking reverse lookup, run on the blocking pool.
type Lookup = fn(IpAddr) -> Option<String>;

fn system_lookup(ip: IpAddr) -> Option<String> {
    dns_lookup::lookup_addr(&ip).ok()
}

struct Resolved {
    hostname: Option<String>,
    expires_at: Instant,
}

/// Reverse-DNS names for measured peers, cached for `ttl`.
///
/// Misses (no PTR record, timeout, resolver echoing the address) are cached
/// too, so an unresolvable peer costs one lookup per `ttl`.
pub struct DnsCache {
    entries: DashMap<IpAddr, Resolved>,
    lookup: Lookup,
    ttl: Duration,
    timeout: Duration,
}

impl DnsCache {
    pub fn new(ttl: Duration, timeout: Duration) -> Self {
        Self::with_lookup(system_lookup, ttl, timeout)
    }

    fn with_lookup(lookup: Lookup, ttl: Duration, timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            lookup,
            ttl,
            timeout,
        }
    }

    pub async fn resolve(&self, ip: IpAddr) -> Option<String> {
        if let Some(hit) = self.cached(ip) {
            return hit;
        }

        let lookup = self.lookup;
        let hostname = match tokio::time::timeout(
            self.timeout,
            tokio::task::spawn_blocking(move || lookup(ip)),
        )
        .await
        {
            Ok(Ok(name)) => name.filter(|name| *name != ip.to_string()),
            Ok(Err(e)) => {
                tracing::debug!("reverse lookup of {} panicked: {}", ip, e);
                None
            }
            Err(_) => {
                tracing::debug!("reverse lookup of {} timed out", ip);
                None
            }
        };

        self.entries.insert(
            ip,
            Resolved {
                hostname: hostname.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        hostname
    }

    /// `Some(hostname)` for a live entry, `None` when a lookup is needed.
    fn cached(&self, ip: IpAddr) -> Option<Option<String>> {
        self.entries
            .get(&ip)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.hostname.clone())
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn named(ip: IpAddr) -> Option<String> {
        Some(format!("host-{ip}"))
    }

    fn echo(ip: IpAddr) -> Option<String> {
        Some(ip.to_string())
    }

    fn unresolvable(_: IpAddr) -> Option<String> {
        None
    }

    fn cache(lookup: Lookup, ttl: Duration) -> DnsCache {
        DnsCache::with_lookup(lookup, ttl, Duration::from_secs(2))
    }

    fn test_net(i: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, i))
    }

    #[tokio::test]
    async fn test_resolves_and_caches() {
        let dns = cache(named, Duration::from_secs(300));
        assert_eq!(dns.resolve(test_net(1)).await.as_deref(), Some("host-192.0.2.1"));
        assert_eq!(dns.cached(test_net(1)), Some(Some("host-192.0.2.1".into())));
        assert_eq!(dns.len(), 1);
    }

    #[tokio::test]
    async fn test_misses_are_cached() {
        let dns = cache(unresolvable, Duration::from_secs(300));
        assert_eq!(dns.resolve(test_net(1)).await, None);
        assert_eq!(dns.cached(test_net(1)), Some(None));
    }

    #[tokio::test]
    async fn test_echoed_address_is_not_a_name() {
        let dns = cache(echo, Duration::from_secs(300));
        assert_eq!(dns.resolve(test_net(7)).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_expired_entries() {
        let dns = cache(unresolvable, Duration::from_secs(1));
        for i in 1..=50 {
            dns.resolve(test_net(i)).await;
        }
        assert_eq!(dns.len(), 50);

        tokio::time::advance(Duration::from_secs(3600)).await;
        dns.resolve(test_net(51)).await;

        assert_eq!(dns.prune(), 50);
        assert_eq!(dns.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_looked_up_again() {
        let dns = cache(named, Duration::from_secs(1));
        dns.resolve(test_net(1)).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(dns.cached(test_net(1)), None);
    }
}
