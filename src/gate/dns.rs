//! Pre-flight DNS validation: resolve A and AAAA independently and refuse a
//! hostname if any answer lands in a reserved range.
//!
//! The same resolver also answers reqwest at connect time through
//! `ConnectGuard`, so no socket opens to an address that skipped
//! classification, whatever the system's own name service would say.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join;
use hickory_resolver::TokioResolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::{debug, warn};

use super::classify::{AddressClass, classify, parse_ip_literal};
use super::error::{GatewayError, InitError};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DnsLookupError(String);

impl DnsLookupError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Per-family DNS lookups. Keeping A and AAAA separate lets one family fail
/// without discarding the other's answers, and lets tests swap in canned
/// answers without touching the network.
pub trait DnsResolver: Send + Sync {
    fn lookup_ipv4(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<Vec<IpAddr>, DnsLookupError>> + Send;

    fn lookup_ipv6(
        &self,
        host: &str,
    ) -> impl Future<Output = Result<Vec<IpAddr>, DnsLookupError>> + Send;
}

/// Resolver backed by the host's `/etc/resolv.conf`.
#[derive(Clone)]
pub struct SystemResolver {
    inner: TokioResolver,
}

impl SystemResolver {
    pub fn from_system_conf() -> Result<Self, InitError> {
        let inner = TokioResolver::builder_tokio()?.build();
        Ok(Self { inner })
    }
}

impl DnsResolver for SystemResolver {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        let lookup = self
            .inner
            .ipv4_lookup(host)
            .await
            .map_err(|e| DnsLookupError::new(e.to_string()))?;
        Ok(lookup.iter().map(|a| IpAddr::V4(a.0)).collect())
    }

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        let lookup = self
            .inner
            .ipv6_lookup(host)
            .await
            .map_err(|e| DnsLookupError::new(e.to_string()))?;
        Ok(lookup.iter().map(|aaaa| IpAddr::V6(aaaa.0)).collect())
    }
}

/// Resolves `host` and fails with `DnsResolvedPrivate` if any answer is not
/// public.
///
/// Lookup errors and timeouts are swallowed: a name that does not resolve
/// carries no SSRF risk, so the fetch is left to fail on its own. This is
/// fail-open on purpose.
pub async fn resolve_and_check(
    resolver: &impl DnsResolver,
    host: &str,
    timeout: Duration,
) -> Result<(), GatewayError> {
    if let Some(ip) = parse_ip_literal(host) {
        return check_address(host, ip);
    }

    let (v4, v6) = join(
        bounded(resolver.lookup_ipv4(host), timeout, host, "A"),
        bounded(resolver.lookup_ipv6(host), timeout, host, "AAAA"),
    )
    .await;

    if v4.is_empty() && v6.is_empty() {
        debug!(host, "no addresses resolved; leaving failure to the fetch");
        return Ok(());
    }

    v4.into_iter()
        .chain(v6)
        .try_for_each(|ip| check_address(host, ip))
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// reqwest's resolver for gateway clients. Unlike preflight this path fails
/// closed: no answer means no connection, and a single non-public address
/// refuses the whole name.
pub(crate) struct ConnectGuard<R> {
    resolver: Arc<R>,
}

impl<R> ConnectGuard<R> {
    pub(crate) fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }
}

impl<R: DnsResolver + 'static> Resolve for ConnectGuard<R> {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(connect_addrs(Arc::clone(&self.resolver), name))
    }
}

async fn connect_addrs<R: DnsResolver>(
    resolver: Arc<R>,
    name: Name,
) -> Result<Addrs, BoxError> {
    let host = name.as_str();
    let (v4, v6) = join(resolver.lookup_ipv4(host), resolver.lookup_ipv6(host)).await;
    let ips: Vec<IpAddr> = match (v4, v6) {
        (Err(e), Err(_)) => return Err(Box::new(e)),
        (v4, v6) => v4
            .unwrap_or_default()
            .into_iter()
            .chain(v6.unwrap_or_default())
            .collect(),
    };
    if ips.is_empty() {
        return Err(Box::new(DnsLookupError::new(format!("no addresses for {host}"))));
    }
    for &ip in &ips {
        check_address(host, ip)?;
    }
    debug!(host, count = ips.len(), "connect-time addresses classified public");
    // reqwest fills in the port from the URL.
    Ok(Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0))))
}

fn check_address(host: &str, ip: IpAddr) -> Result<(), GatewayError> {
    match classify(ip) {
        AddressClass::Public => Ok(()),
        AddressClass::Private(range) => {
            warn!(host, %ip, %range, "host resolves to non-public address");
            Err(GatewayError::DnsResolvedPrivate {
                host: host.to_string(),
                ip,
                range,
            })
        }
    }
}

async fn bounded(
    lookup: impl Future<Output = Result<Vec<IpAddr>, DnsLookupError>>,
    timeout: Duration,
    host: &str,
    record: &str,
) -> Vec<IpAddr> {
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => {
            debug!(host, record, error = %e, "DNS lookup failed");
            Vec::new()
        }
        Err(_) => {
            debug!(host, record, "DNS lookup timed out");
            Vec::new()
        }
    }
}
