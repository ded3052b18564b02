//! Async DNS resolution with a small TTL cache.
//!
//! Domain CONNECT requests resolve here. The full ordered address list is
//! returned so a failed connect attempt can fall back to the next address.

use crate::util::{Result, SocksError};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::lookup_host;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};

/// TTL for cached DNS entries.
const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Timeout for DNS lookup operations.
const DNS_TIMEOUT: Duration = Duration::from_secs(10);
/// Standard DNS port, assumed when a server entry omits one.
const DNS_PORT: u16 = 53;

static DNS_CACHE: Lazy<DnsCache> = Lazy::new(DnsCache::new);
static DNS_RESOLVER: Lazy<RwLock<Option<Arc<TokioAsyncResolver>>>> =
    Lazy::new(|| RwLock::new(None));

struct CacheEntry {
    addresses: Vec<SocketAddr>,
    expires_at: Instant,
}

struct DnsCache {
    inner: RwLock<HashMap<String, CacheEntry>>,
}

impl DnsCache {
    fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, host: &str) -> Option<Vec<SocketAddr>> {
        let cache = self.inner.read().await;
        if let Some(entry) = cache.get(host)
            && Instant::now() <= entry.expires_at
            && !entry.addresses.is_empty()
        {
            trace!(
                "[DNS] Cache hit for {} ({} entries)",
                host,
                entry.addresses.len()
            );
            return Some(entry.addresses.clone());
        }
        None
    }

    async fn insert(&self, host: String, addresses: Vec<SocketAddr>) {
        let mut cache = self.inner.write().await;
        cache.insert(
            host,
            CacheEntry {
                addresses,
                expires_at: Instant::now() + DEFAULT_TTL,
            },
        );
    }

    async fn clear(&self) {
        let mut cache = self.inner.write().await;
        cache.clear();
    }
}

/// Resolve a hostname to every address it maps to, with caching and timeout.
///
/// IPv4 addresses sort before IPv6 so the connect fallback order is
/// deterministic across runs.
pub async fn resolve_host_all(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    if let Some(addresses) = DNS_CACHE.get(host).await {
        return Ok(addresses);
    }

    let resolver_opt = DNS_RESOLVER.read().await.clone();
    let mut addresses: Vec<SocketAddr> = if let Some(resolver) = resolver_opt {
        let lookup = tokio::time::timeout(DNS_TIMEOUT, resolver.lookup_ip(host))
            .await
            .map_err(|_| {
                SocksError::Resolve(format!(
                    "DNS resolution timeout ({}s) for {}",
                    DNS_TIMEOUT.as_secs(),
                    host
                ))
            })?
            .map_err(|err| {
                SocksError::Resolve(format!("DNS resolution failed for {}: {}", host, err))
            })?;
        lookup
            .iter()
            .map(|ip| SocketAddr::new(ip, port))
            .collect()
    } else {
        tokio::time::timeout(DNS_TIMEOUT, lookup_host((host, port)))
            .await
            .map_err(|_| {
                SocksError::Resolve(format!(
                    "DNS resolution timeout ({}s) for {}",
                    DNS_TIMEOUT.as_secs(),
                    host
                ))
            })?
            .map_err(|err| {
                SocksError::Resolve(format!("DNS resolution failed for {}: {}", host, err))
            })?
            .collect()
    };

    if addresses.is_empty() {
        return Err(SocksError::Resolve(format!(
            "No address found for {}",
            host
        )));
    }

    addresses.sort_unstable_by_key(|addr| match addr.ip() {
        IpAddr::V4(ip) => (0, ip.octets().to_vec()),
        IpAddr::V6(ip) => (1, ip.octets().to_vec()),
    });

    debug!(
        "[DNS] Resolved {} -> {} entries (ttl={}s)",
        host,
        addresses.len(),
        DEFAULT_TTL.as_secs()
    );

    DNS_CACHE.insert(host.to_string(), addresses.clone()).await;
    Ok(addresses)
}

/// Install operator-supplied DNS servers for domain resolution.
///
/// An empty list reverts to the system resolver. Cached entries are flushed
/// either way so later lookups go through the new configuration.
pub async fn set_custom_dns_servers(servers: &[String]) -> Result<()> {
    let mut config = ResolverConfig::new();
    let mut described = Vec::with_capacity(servers.len());
    for entry in servers {
        let addr = parse_server_entry(entry)?;
        // Queried over UDP first, falling back to TCP.
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
        config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));
        described.push(addr.to_string());
    }

    let resolver = if described.is_empty() {
        info!("[DNS] Using system DNS resolver");
        None
    } else {
        info!("[DNS] Custom DNS servers configured: {}", described.join(", "));
        Some(Arc::new(TokioAsyncResolver::tokio(
            config,
            ResolverOpts::default(),
        )))
    };

    *DNS_RESOLVER.write().await = resolver;
    DNS_CACHE.clear().await;
    Ok(())
}

/// Accepts `ip:port` or a bare IP (port 53 assumed); IPv6 may be bracketed.
/// Host names are rejected: the resolver is what resolves names.
fn parse_server_entry(entry: &str) -> Result<SocketAddr> {
    let trimmed = entry.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    trimmed
        .parse::<SocketAddr>()
        .map_err(|_| SocksError::Config(format!("invalid DNS server '{}'", entry)))
}
