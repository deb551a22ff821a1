//! Outbound request gateway. Every URL a handler fetches, and every redirect
//! it follows, passes hostname heuristics and DNS preflight before a socket
//! is opened to it.
//!
//! Preflight and the connection share one resolver: the client connects only
//! through `dns::ConnectGuard`, which classifies every address it hands
//! out. Pooling is disabled so a validated hop never rides an older socket.

pub mod classify;
pub mod dns;
pub mod domain;
pub mod error;
pub mod hostname;
#[cfg(test)]
pub(crate) mod testing;

use std::borrow::Cow;
use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Client, ClientBuilder, Method, Response, StatusCode, redirect};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::{GatewayConfig, HandlerLimits};
use dns::{ConnectGuard, DnsResolver, SystemResolver, resolve_and_check};
use error::{GatewayError, InitError, ValidationOutcome};
use hostname::is_blocked_hostname;

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One outbound request as a route handler describes it. Unset limits fall
/// back to the gateway's configured defaults.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub max_redirects: Option<u32>,
}

impl FetchTarget {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            timeout: None,
            max_redirects: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Per-hop budget. A zero duration is ignored.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Fills whichever limits were not set explicitly.
    pub fn with_limits(mut self, limits: HandlerLimits) -> Self {
        self.timeout.get_or_insert(limits.timeout);
        self.max_redirects.get_or_insert(limits.max_redirects);
        self
    }
}

/// One followed redirect; lives for a single loop iteration.
struct RedirectHop<'a> {
    from: &'a Url,
    to: &'a Url,
    index: u32,
}

impl RedirectHop<'_> {
    fn crosses_host(&self) -> bool {
        self.from.host_str() != self.to.host_str()
            || self.from.port_or_known_default() != self.to.port_or_known_default()
    }
}

pub struct Gateway<R = SystemResolver> {
    http: Client,
    resolver: Arc<R>,
    config: GatewayConfig,
}

impl Gateway<SystemResolver> {
    pub fn new(config: GatewayConfig) -> Result<Self, InitError> {
        let builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .pool_max_idle_per_host(0)
            .user_agent(crate::USER_AGENT);
        Self::with_parts(builder, SystemResolver::from_system_conf()?, config)
    }
}

impl<R: DnsResolver + 'static> Gateway<R> {
    /// Builds a gateway around a caller-supplied client builder. Automatic
    /// redirects are switched off and name resolution is routed through
    /// `resolver` regardless of how `builder` was set up. Static overrides
    /// made with `ClientBuilder::resolve` still take precedence.
    pub fn with_parts(
        builder: ClientBuilder,
        resolver: R,
        config: GatewayConfig,
    ) -> Result<Self, InitError> {
        let resolver = Arc::new(resolver);
        let http = builder
            .redirect(redirect::Policy::none())
            .dns_resolver(ConnectGuard::new(Arc::clone(&resolver)))
            .build()?;
        Ok(Self {
            http,
            resolver,
            config,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Runs the pre-flight checks only, without sending anything.
    pub async fn check_url(&self, raw: &str) -> ValidationOutcome {
        match self.preflight(raw, self.config.default_timeout).await {
            Ok(_) => ValidationOutcome::Allowed,
            Err(e) => ValidationOutcome::from_error(&e),
        }
    }

    /// Fetches `target`, following redirects by hand so each hop is
    /// validated before it is connected to. The terminal response is returned
    /// untouched, whatever its status.
    pub async fn safe_fetch(&self, target: FetchTarget) -> Result<Response, GatewayError> {
        let timeout = target
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.default_timeout);
        let max_redirects = target
            .max_redirects
            .unwrap_or(self.config.default_max_redirects);
        let mut method = target.method;
        let mut headers = target.headers;

        let mut current = self.preflight(&target.url, timeout).await?;
        let mut hops = 0u32;

        loop {
            let response = self
                .http
                .request(method.clone(), current.clone())
                .headers(headers.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| transport_error(current.as_str(), e))?;

            let status = response.status();
            if !status.is_redirection() {
                return Ok(response);
            }
            let Some(location) = response.headers().get(LOCATION) else {
                return Ok(response);
            };
            let location = String::from_utf8_lossy(location.as_bytes()).into_owned();
            drop(response);

            hops += 1;
            if hops > max_redirects {
                warn!(
                    url = %redact_url_credentials(current.as_str()),
                    max_redirects,
                    "redirect limit exceeded"
                );
                return Err(GatewayError::TooManyRedirects { max: max_redirects });
            }

            let next = current
                .join(&location)
                .map_err(|source| GatewayError::InvalidRedirectUrl {
                    location: redact_url_credentials(&location).into_owned(),
                    source,
                })?;

            self.check_parsed(&next, timeout)
                .await
                .map_err(|cause| GatewayError::RedirectBlocked {
                    location: redact_url_credentials(next.as_str()).into_owned(),
                    cause: Box::new(cause),
                })?;

            let hop = RedirectHop {
                from: &current,
                to: &next,
                index: hops,
            };
            debug!(
                from = %redact_url_credentials(hop.from.as_str()),
                to = %redact_url_credentials(hop.to.as_str()),
                hop = hop.index,
                %status,
                "following redirect"
            );
            if hop.crosses_host() {
                headers.remove(AUTHORIZATION);
                headers.remove(COOKIE);
            }
            if switches_to_get(status, &method) {
                method = Method::GET;
            }

            current = next;
        }
    }

    /// `safe_fetch` that stops as soon as `cancel` fires. In-flight I/O is
    /// dropped and the caller sees `Cancelled`, never a partial result.
    pub async fn safe_fetch_cancellable(
        &self,
        target: FetchTarget,
        cancel: &CancellationToken,
    ) -> Result<Response, GatewayError> {
        let url = redact_url_credentials(&target.url).into_owned();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%url, "fetch cancelled");
                Err(GatewayError::Cancelled)
            }
            result = self.safe_fetch(target) => result,
        }
    }

    async fn preflight(&self, raw: &str, timeout: Duration) -> Result<Url, GatewayError> {
        let parsed = Url::parse(raw)
            .map_err(|e| GatewayError::invalid_url(redact_url_credentials(raw), e))?;
        self.check_parsed(&parsed, timeout).await?;
        Ok(parsed)
    }

    async fn check_parsed(&self, url: &Url, timeout: Duration) -> Result<(), GatewayError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(GatewayError::DisallowedProtocol(other.to_string())),
        }

        let host = url.host_str().unwrap_or_default();
        if is_blocked_hostname(host) {
            warn!(
                url = %redact_url_credentials(url.as_str()),
                "blocked fetch to internal/reserved host"
            );
            return Err(GatewayError::BlockedHostname(host.to_string()));
        }

        resolve_and_check(self.resolver.as_ref(), host, timeout).await
    }
}

/// 303 always becomes GET (except for HEAD); 301/302 do so only after a POST.
fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status {
        StatusCode::SEE_OTHER => *method != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => *method == Method::POST,
        _ => false,
    }
}

fn transport_error(url: &str, source: reqwest::Error) -> GatewayError {
    if let Some(refused) = refused_at_connect(&source) {
        return refused;
    }
    let url = redact_url_credentials(url).into_owned();
    if source.is_timeout() {
        GatewayError::Timeout { url, source }
    } else {
        GatewayError::NetworkUnreachable { url, source }
    }
}

/// Recovers a `ConnectGuard` refusal from reqwest's error chain.
fn refused_at_connect(err: &reqwest::Error) -> Option<GatewayError> {
    std::iter::successors(err.source(), |e| (*e).source()).find_map(|e| {
        match e.downcast_ref::<GatewayError>()? {
            GatewayError::DnsResolvedPrivate { host, ip, range } => {
                Some(GatewayError::DnsResolvedPrivate {
                    host: host.clone(),
                    ip: *ip,
                    range: *range,
                })
            }
            _ => None,
        }
    })
}

/// Buffers a response body, refusing anything larger than `limit` bytes.
pub async fn read_body_limited(
    mut response: Response,
    limit: usize,
) -> Result<Vec<u8>, GatewayError> {
    if let Some(len) = response.content_length()
        && len > limit as u64
    {
        return Err(GatewayError::ResponseTooLarge { limit });
    }

    let url = response.url().to_string();
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| transport_error(&url, e))?
    {
        body.extend_from_slice(&chunk);
        if body.len() > limit {
            return Err(GatewayError::ResponseTooLarge { limit });
        }
    }
    Ok(body)
}

/// Drops `user:password@` from a URL. Every URL the gateway logs or stores
/// in a `GatewayError` passes through here first; text that does not parse
/// as a URL comes back unchanged.
pub fn redact_url_credentials(raw: &str) -> Cow<'_, str> {
    if !raw.contains('@') {
        return Cow::Borrowed(raw);
    }
    if let Ok(mut parsed) = Url::parse(raw)
        && (!parsed.username().is_empty() || parsed.password().is_some())
    {
        let _ = parsed.set_username("");
        let _ = parsed.set_password(None);
        return Cow::Owned(parsed.to_string());
    }
    Cow::Borrowed(raw)
}
