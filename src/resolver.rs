//! Name resolution for FQDN destinations.
//!
//! Two implementations: the system resolver, and a custom resolver that
//! queries one configured DNS server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, Protocol, ResolverConfig, ResolverOpts,
};
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Timeout for queries against a custom DNS server.
const DNS_TIMEOUT: Duration = Duration::from_secs(3);

/// Capability to turn a DNS name into an IP address.
///
/// Invoked at most once per request, and only for FQDN destinations.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `name` to a single IP address, preferring IPv4.
    async fn resolve(&self, name: &str) -> Result<IpAddr>;
}

/// System resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

#[async_trait]
impl Resolver for DefaultResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((name, 0))
            .await
            .with_context(|| format!("failed to resolve {}", name))?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .map(|a| a.ip())
            .with_context(|| format!("no addresses found for {}", name))
    }
}

/// Resolver backed by a single recursive DNS server at `ip:port`,
/// queried over UDP with TCP fallback and a 3 second timeout.
pub struct CustomResolver {
    inner: TokioAsyncResolver,
}

impl CustomResolver {
    /// Build a resolver that queries `dns_addr` exclusively.
    pub fn new(dns_addr: SocketAddr) -> Self {
        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(dns_addr, Protocol::Udp));
        config.add_name_server(NameServerConfig::new(dns_addr, Protocol::Tcp));

        let mut opts = ResolverOpts::default();
        opts.timeout = DNS_TIMEOUT;
        opts.ip_strategy = LookupIpStrategy::Ipv4thenIpv6;

        CustomResolver {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl Resolver for CustomResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr> {
        let lookup = self
            .inner
            .lookup_ip(name)
            .await
            .with_context(|| format!("failed to resolve {}", name))?;

        lookup
            .iter()
            .next()
            .with_context(|| format!("no addresses found for {}", name))
    }
}
