//! Canned resolvers shared by the gateway's tests.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::dns::{DnsLookupError, DnsResolver};

/// Answers from a fixed table; unknown names fail like NXDOMAIN.
#[derive(Default)]
pub(crate) struct FakeDns {
    answers: HashMap<String, Vec<IpAddr>>,
    ipv4_fails: bool,
    lookups: AtomicUsize,
}

impl FakeDns {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, host: &str, ips: &[&str]) -> Self {
        let ips = ips.iter().map(|ip| ip.parse().unwrap()).collect();
        self.answers.insert(host.to_string(), ips);
        self
    }

    pub(crate) fn failing_ipv4(mut self) -> Self {
        self.ipv4_fails = true;
        self
    }

    /// Number of per-family lookups issued so far.
    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn answer(&self, host: &str, ipv4: bool) -> Result<Vec<IpAddr>, DnsLookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if ipv4 && self.ipv4_fails {
            return Err(DnsLookupError::new("SERVFAIL"));
        }
        let ips = self
            .answers
            .get(host)
            .ok_or_else(|| DnsLookupError::new(format!("NXDOMAIN: {host}")))?;
        Ok(ips.iter().copied().filter(|ip| ip.is_ipv4() == ipv4).collect())
    }
}

impl DnsResolver for FakeDns {
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        self.answer(host, true)
    }

    async fn lookup_ipv6(&self, host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        self.answer(host, false)
    }
}

pub(crate) struct FailingDns;

impl DnsResolver for FailingDns {
    async fn lookup_ipv4(&self, _host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        Err(DnsLookupError::new("lookup failed"))
    }

    async fn lookup_ipv6(&self, _host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        Err(DnsLookupError::new("lookup failed"))
    }
}

/// Never answers within any reasonable timeout.
pub(crate) struct StalledDns;

impl DnsResolver for StalledDns {
    async fn lookup_ipv4(&self, _host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![])
    }

    async fn lookup_ipv6(&self, _host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![])
    }
}

/// Fails the first `silent` lookups, then answers every name with `ip`.
/// Stands in for a name that preflight cannot see but a later lookup can.
pub(crate) struct LateAnswerDns {
    ip: IpAddr,
    silent: usize,
    lookups: AtomicUsize,
}

impl LateAnswerDns {
    pub(crate) fn new(ip: &str, silent: usize) -> Self {
        Self {
            ip: ip.parse().unwrap(),
            silent,
            lookups: AtomicUsize::new(0),
        }
    }

    fn answer(&self, ipv4: bool) -> Result<Vec<IpAddr>, DnsLookupError> {
        if self.lookups.fetch_add(1, Ordering::SeqCst) < self.silent {
            return Err(DnsLookupError::new("NXDOMAIN"));
        }
        Ok(Some(self.ip).filter(|ip| ip.is_ipv4() == ipv4).into_iter().collect())
    }
}

impl DnsResolver for LateAnswerDns {
    async fn lookup_ipv4(&self, _host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        self.answer(true)
    }

    async fn lookup_ipv6(&self, _host: &str) -> Result<Vec<IpAddr>, DnsLookupError> {
        self.answer(false)
    }
}
