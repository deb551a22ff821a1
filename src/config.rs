//! Gateway limits, read once from the environment at start-up.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
pub const DEFAULT_MAX_BODY_BYTES: usize = 10_000_000;

const TIMEOUT_VAR: &str = "OUTBOUND_TIMEOUT_MS";
const MAX_REDIRECTS_VAR: &str = "OUTBOUND_MAX_REDIRECTS";
const MAX_BODY_VAR: &str = "OUTBOUND_MAX_BODY_BYTES";
const HANDLER_PREFIX: &str = "OUTBOUND_HANDLER_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    InvalidNumber { name: String, value: String },

    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: String },
}

/// Effective per-call limits for one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerLimits {
    pub timeout: Duration,
    pub max_redirects: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LimitOverride {
    timeout: Option<Duration>,
    max_redirects: Option<u32>,
}

/// Configuration via environment variables:
/// - `OUTBOUND_TIMEOUT_MS`: per-hop timeout (default 10000)
/// - `OUTBOUND_MAX_REDIRECTS`: redirect hop limit (default 5)
/// - `OUTBOUND_MAX_BODY_BYTES`: body cap for buffered reads (default 10 MB)
/// - `OUTBOUND_HANDLER_<NAME>_TIMEOUT_MS` / `OUTBOUND_HANDLER_<NAME>_MAX_REDIRECTS`:
///   overrides for one handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub default_timeout: Duration,
    pub default_max_redirects: u32,
    pub max_body_bytes: usize,
    overrides: HashMap<String, LimitOverride>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            default_max_redirects: DEFAULT_MAX_REDIRECTS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            overrides: HashMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            let key = key.as_ref();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key {
                TIMEOUT_VAR => config.default_timeout = parse_timeout(key, value)?,
                MAX_REDIRECTS_VAR => config.default_max_redirects = parse_number(key, value)?,
                MAX_BODY_VAR => config.max_body_bytes = parse_number(key, value)?,
                _ => {
                    let Some(rest) = key.strip_prefix(HANDLER_PREFIX) else {
                        continue;
                    };
                    if let Some(handler) = rest.strip_suffix("_TIMEOUT_MS")
                        && !handler.is_empty()
                    {
                        config.override_entry(handler).timeout = Some(parse_timeout(key, value)?);
                    } else if let Some(handler) = rest.strip_suffix("_MAX_REDIRECTS")
                        && !handler.is_empty()
                    {
                        config.override_entry(handler).max_redirects =
                            Some(parse_number(key, value)?);
                    }
                }
            }
        }
        Ok(config)
    }

    /// Sets both limits for `handler`, replacing any earlier override.
    pub fn with_handler_limits(mut self, handler: &str, limits: HandlerLimits) -> Self {
        *self.override_entry(handler) = LimitOverride {
            timeout: Some(limits.timeout),
            max_redirects: Some(limits.max_redirects),
        };
        self
    }

    pub fn default_limits(&self) -> HandlerLimits {
        HandlerLimits {
            timeout: self.default_timeout,
            max_redirects: self.default_max_redirects,
        }
    }

    /// Defaults merged with whatever `handler` overrides. Names are
    /// case-insensitive.
    pub fn limits_for(&self, handler: &str) -> HandlerLimits {
        let defaults = self.default_limits();
        let Some(o) = self.overrides.get(&handler.to_ascii_lowercase()) else {
            return defaults;
        };
        HandlerLimits {
            timeout: o.timeout.unwrap_or(defaults.timeout),
            max_redirects: o.max_redirects.unwrap_or(defaults.max_redirects),
        }
    }

    fn override_entry(&mut self, handler: &str) -> &mut LimitOverride {
        self.overrides.entry(handler.to_ascii_lowercase()).or_default()
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidNumber {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_timeout(name: &str, value: &str) -> Result<Duration, ConfigError> {
    let ms: u64 = parse_number(name, value)?;
    if ms == 0 {
        return Err(ConfigError::ZeroTimeout {
            name: name.to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_env() {
        let config = GatewayConfig::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert_eq!(config.default_max_redirects, 5);
    }

    #[test]
    fn reads_global_limits() {
        let config = GatewayConfig::from_vars(vars(&[
            ("OUTBOUND_TIMEOUT_MS", "2500"),
            ("OUTBOUND_MAX_REDIRECTS", " 0 "),
            ("OUTBOUND_MAX_BODY_BYTES", "1024"),
        ]))
        .unwrap();
        assert_eq!(config.default_timeout, Duration::from_millis(2500));
        assert_eq!(config.default_max_redirects, 0);
        assert_eq!(config.max_body_bytes, 1024);
    }

    #[test]
    fn empty_values_are_unset() {
        let config = GatewayConfig::from_vars(vars(&[("OUTBOUND_TIMEOUT_MS", "  ")])).unwrap();
        assert_eq!(config.default_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            GatewayConfig::from_vars(vars(&[("OUTBOUND_MAX_REDIRECTS", "-1")])),
            Err(ConfigError::InvalidNumber { .. })
        ));
        assert!(matches!(
            GatewayConfig::from_vars(vars(&[("OUTBOUND_TIMEOUT_MS", "0")])),
            Err(ConfigError::ZeroTimeout { .. })
        ));
    }

    #[test]
    fn handler_overrides_merge_with_defaults() {
        let config = GatewayConfig::from_vars(vars(&[
            ("OUTBOUND_TIMEOUT_MS", "8000"),
            ("OUTBOUND_HANDLER_SCREENSHOT_TIMEOUT_MS", "30000"),
            ("OUTBOUND_HANDLER_HEADERS_MAX_REDIRECTS", "0"),
        ]))
        .unwrap();

        let screenshot = config.limits_for("screenshot");
        assert_eq!(screenshot.timeout, Duration::from_secs(30));
        assert_eq!(screenshot.max_redirects, DEFAULT_MAX_REDIRECTS);

        let headers = config.limits_for("Headers");
        assert_eq!(headers.timeout, Duration::from_secs(8));
        assert_eq!(headers.max_redirects, 0);

        assert_eq!(config.limits_for("scrape"), config.default_limits());
    }

    #[test]
    fn programmatic_override() {
        let limits = HandlerLimits {
            timeout: Duration::from_secs(3),
            max_redirects: 1,
        };
        let config = GatewayConfig::default().with_handler_limits("robots", limits);
        assert_eq!(config.limits_for("ROBOTS"), limits);
    }
}
