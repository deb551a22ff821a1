//! SSRF-safe outbound HTTP for handlers that fetch user-supplied URLs.
//!
//! Route handlers either call [`Gateway::safe_fetch`] when they need a
//! response, or [`validate_domain`] / [`Gateway::validate_domain_resolved`]
//! when they only need a trusted bare domain. Both bottom out in the same
//! address classifier and DNS preflight.

pub mod config;
pub mod gate;

pub const USER_AGENT: &str = concat!("outbound-gate/", env!("CARGO_PKG_VERSION"));

pub use config::{ConfigError, GatewayConfig, HandlerLimits};
pub use gate::classify::{AddressClass, PrivateRange, classify, classify_literal};
pub use gate::dns::{DnsLookupError, DnsResolver, SystemResolver, resolve_and_check};
pub use gate::domain::{normalize_domain, validate_domain};
pub use gate::error::{BlockReason, ErrorKind, GatewayError, InitError, ValidationOutcome};
pub use gate::hostname::is_blocked_hostname;
pub use gate::{FetchTarget, Gateway, read_body_limited, redact_url_credentials};
