//! Bare-domain validation for handlers that look a name up (DNS, WHOIS,
//! robots.txt, sitemaps) instead of fetching a full URL.

use std::net::IpAddr;

use tracing::warn;
use url::Host;

use super::Gateway;
use super::classify::classify;
use super::dns::{DnsResolver, resolve_and_check};
use super::error::GatewayError;
use super::hostname::is_blocked_hostname;

const MAX_DOMAIN_LEN: usize = 253;

/// Reduces user input like `HTTPS://Example.COM:443/path` to `example.com`.
pub fn normalize_domain(input: &str) -> Result<String, GatewayError> {
    let lower = input.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = strip_port(host);
    let host = host.strip_suffix('.').unwrap_or(host);

    if host.is_empty() {
        return Err(GatewayError::invalid_url(input, "empty domain"));
    }
    if host.len() > MAX_DOMAIN_LEN {
        return Err(GatewayError::invalid_url(
            input,
            format!("domain longer than {MAX_DOMAIN_LEN} characters"),
        ));
    }
    Ok(host.to_string())
}

/// Drops `:port` unless the colon belongs to a bare IPv6 literal.
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port))
            if !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && (name.ends_with(']') || !name.contains(':')) =>
        {
            name
        }
        _ => host,
    }
}

/// Reads `domain` the way a URL parser would, so shorthand such as `127.1`
/// or `0x7f.1` is judged by the address it denotes.
fn url_host_ip(domain: &str) -> Option<IpAddr> {
    match Host::parse(domain).ok()? {
        Host::Ipv4(v4) => Some(IpAddr::V4(v4)),
        Host::Ipv6(v6) => Some(IpAddr::V6(v6)),
        Host::Domain(_) => None,
    }
}

/// Normalizes `input` and applies the static hostname checks.
pub fn validate_domain(input: &str) -> Result<String, GatewayError> {
    let domain = normalize_domain(input)?;
    if is_blocked_hostname(&domain)
        || url_host_ip(&domain).is_some_and(|ip| !classify(ip).is_public())
    {
        warn!(domain, "blocked lookup of internal/reserved domain");
        return Err(GatewayError::BlockedHostname(domain));
    }
    Ok(domain)
}

impl<R: DnsResolver + 'static> Gateway<R> {
    /// `validate_domain` plus DNS preflight.
    pub async fn validate_domain_resolved(&self, input: &str) -> Result<String, GatewayError> {
        let domain = validate_domain(input)?;
        let timeout = self.config.default_timeout;
        resolve_and_check(self.resolver.as_ref(), &domain, timeout).await?;
        Ok(domain)
    }
}
