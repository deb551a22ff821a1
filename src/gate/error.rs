use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

use super::classify::PrivateRange;

/// Why a URL was refused before any request was sent to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    InvalidUrl,
    DisallowedProtocol,
    BlockedHostname,
    DnsResolvedPrivate,
    RedirectBlocked,
    TooManyRedirects,
    InvalidRedirectUrl,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::InvalidUrl => "invalid_url",
            BlockReason::DisallowedProtocol => "disallowed_protocol",
            BlockReason::BlockedHostname => "blocked_hostname",
            BlockReason::DnsResolvedPrivate => "dns_resolved_private",
            BlockReason::RedirectBlocked => "redirect_blocked",
            BlockReason::TooManyRedirects => "too_many_redirects",
            BlockReason::InvalidRedirectUrl => "invalid_redirect_url",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Allowed,
    Blocked(BlockReason),
}

impl ValidationOutcome {
    /// Transport failures carry no safety verdict and map to `Allowed`.
    pub fn from_error(err: &GatewayError) -> Self {
        err.reason().map_or(ValidationOutcome::Allowed, ValidationOutcome::Blocked)
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, ValidationOutcome::Allowed)
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationOutcome::Allowed => f.write_str("allowed"),
            ValidationOutcome::Blocked(reason) => write!(f, "blocked ({reason})"),
        }
    }
}

/// Coarse grouping callers use to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input was refused for safety or syntax reasons.
    Rejected,
    /// The target was unreachable, slow, or misbehaved.
    Upstream,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid URL {input:?}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("disallowed protocol {0:?}: only http and https are fetched")]
    DisallowedProtocol(String),

    #[error("blocked: {0:?} is an internal or reserved host")]
    BlockedHostname(String),

    #[error("blocked: {host} resolves to {range} address {ip}")]
    DnsResolvedPrivate {
        host: String,
        ip: IpAddr,
        range: PrivateRange,
    },

    #[error("redirect to {location} blocked: {cause}")]
    RedirectBlocked {
        location: String,
        #[source]
        cause: Box<GatewayError>,
    },

    #[error("invalid redirect location {location:?}: {source}")]
    InvalidRedirectUrl {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("too many redirects (max {max})")]
    TooManyRedirects { max: u32 },

    #[error("request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    NetworkUnreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response too large (>{limit} bytes)")]
    ResponseTooLarge { limit: usize },

    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    pub(crate) fn invalid_url(input: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.to_string(),
        }
    }

    /// The safety verdict behind this error, if it is one.
    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            GatewayError::InvalidUrl { .. } => Some(BlockReason::InvalidUrl),
            GatewayError::DisallowedProtocol(_) => Some(BlockReason::DisallowedProtocol),
            GatewayError::BlockedHostname(_) => Some(BlockReason::BlockedHostname),
            GatewayError::DnsResolvedPrivate { .. } => Some(BlockReason::DnsResolvedPrivate),
            GatewayError::RedirectBlocked { .. } => Some(BlockReason::RedirectBlocked),
            GatewayError::InvalidRedirectUrl { .. } => Some(BlockReason::InvalidRedirectUrl),
            GatewayError::TooManyRedirects { .. } => Some(BlockReason::TooManyRedirects),
            GatewayError::Timeout { .. }
            | GatewayError::NetworkUnreachable { .. }
            | GatewayError::ResponseTooLarge { .. }
            | GatewayError::Cancelled => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Cancelled => ErrorKind::Cancelled,
            GatewayError::Timeout { .. }
            | GatewayError::NetworkUnreachable { .. }
            | GatewayError::ResponseTooLarge { .. } => ErrorKind::Upstream,
            _ => ErrorKind::Rejected,
        }
    }

    /// HTTP status a route handler should answer with. `TooManyRedirects`
    /// is a policy call, so the handler passes the status it wants for it.
    pub fn http_status(&self, too_many_redirects: u16) -> u16 {
        match self {
            GatewayError::TooManyRedirects { .. } => too_many_redirects,
            GatewayError::Timeout { .. } => 504,
            GatewayError::NetworkUnreachable { .. } | GatewayError::ResponseTooLarge { .. } => 502,
            GatewayError::Cancelled => 499,
            _ => 400,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("failed to load system DNS configuration: {0}")]
    Resolver(#[from] hickory_resolver::ResolveError),
}
