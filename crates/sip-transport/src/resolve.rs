//! Destination resolution and outbound source-address discovery.
//!
//! The IP we advertise in `Via`, `Contact`, and `From` must be routable from
//! the peer. Binding to `0.0.0.0` tells us nothing, so we connect a throwaway
//! UDP socket towards the destination and read back the source address the
//! kernel picked. Results are cached per `(host, port, kind)`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::TransportKind;

/// Cache of resolved destinations and probed source IPs
#[derive(Debug, Default)]
pub struct SourceAddrCache {
    resolved: Mutex<HashMap<(String, u16, TransportKind), SocketAddr>>,
    source_ips: Mutex<HashMap<SocketAddr, IpAddr>>,
}

impl SourceAddrCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        SourceAddrCache::default()
    }

    /// Resolves `host:port` to a socket address, preferring IPv4.
    ///
    /// Results are cached per `(host, port, kind)`; SIP targets do not move
    /// within a session's lifetime (no SRV/NAPTR here; callers supply the
    /// host and port).
    pub async fn resolve(&self, host: &str, port: u16, kind: TransportKind) -> Result<SocketAddr> {
        let key = (host.to_string(), port, kind);
        if let Some(addr) = self
            .resolved
            .lock()
            .expect("resolve cache lock poisoned")
            .get(&key)
        {
            return Ok(*addr);
        }

        // bracketed IPv6 literals parse directly
        let literal = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = literal.parse::<IpAddr>() {
            let addr = SocketAddr::new(ip, port);
            self.resolved
                .lock()
                .expect("resolve cache lock poisoned")
                .insert(key, addr);
            return Ok(addr);
        }

        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(|_| Error::Resolve(format!("{}:{}", host, port)))?
            .collect();
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| Error::Resolve(format!("{}:{}", host, port)))?;

        debug!(host, port, %addr, "resolved destination");
        self.resolved
            .lock()
            .expect("resolve cache lock poisoned")
            .insert(key, addr);
        Ok(addr)
    }

    /// Returns the local IP the kernel would use to reach `destination`.
    pub async fn source_ip_for(&self, destination: SocketAddr) -> Result<IpAddr> {
        if let Some(ip) = self
            .source_ips
            .lock()
            .expect("source-ip cache lock poisoned")
            .get(&destination)
        {
            return Ok(*ip);
        }

        let probe_bind: SocketAddr = if destination.is_ipv4() {
            "0.0.0.0:0".parse().expect("static addr")
        } else {
            "[::]:0".parse().expect("static addr")
        };
        let probe = UdpSocket::bind(probe_bind).await?;
        probe.connect(destination).await.map_err(|source| Error::Connect {
            addr: destination,
            source,
        })?;
        let ip = probe.local_addr()?.ip();

        debug!(%destination, %ip, "probed outbound source address");
        self.source_ips
            .lock()
            .expect("source-ip cache lock poisoned")
            .insert(destination, ip);
        Ok(ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_ip_literals_without_dns() {
        let cache = SourceAddrCache::new();
        let addr = cache
            .resolve("192.0.2.7", 5060, TransportKind::Udp)
            .await
            .unwrap();
        assert_eq!(addr, "192.0.2.7:5060".parse().unwrap());
    }

    #[tokio::test]
    async fn resolves_bracketed_ipv6() {
        let cache = SourceAddrCache::new();
        let addr = cache
            .resolve("[2001:db8::1]", 5061, TransportKind::Tcp)
            .await
            .unwrap();
        assert_eq!(addr, "[2001:db8::1]:5061".parse().unwrap());
    }

    #[tokio::test]
    async fn source_ip_probe_loopback() {
        let cache = SourceAddrCache::new();
        let ip = cache
            .source_ip_for("127.0.0.1:5060".parse().unwrap())
            .await
            .unwrap();
        assert!(ip.is_loopback());
    }
}
