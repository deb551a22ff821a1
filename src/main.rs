use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use outbound_gate::{
    BlockReason, FetchTarget, Gateway, GatewayConfig, GatewayError, ValidationOutcome,
    classify_literal, read_body_limited, validate_domain,
};
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Exit status when any input was blocked or failed.
const EXIT_BLOCKED: u8 = 2;

#[derive(Parser)]
#[command(
    name = "outbound-gate",
    version,
    about = "Fetch and vet outbound URLs through SSRF checks"
)]
struct Cli {
    /// Print JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a URL, following redirects only to validated hosts
    Fetch(FetchArgs),
    /// Run pre-flight validation on URLs without fetching them
    Check {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Normalize and validate bare domains
    Domain {
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Also require every DNS answer to be public
        #[arg(long)]
        dns: bool,
    },
    /// Classify IP literals as public or reserved
    Classify {
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}

#[derive(Args)]
struct FetchArgs {
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET", value_parser = parse_method)]
    method: Method,
    /// Extra request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,
    /// Per-hop timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Maximum redirect hops to follow
    #[arg(long)]
    max_redirects: Option<u32>,
    /// Apply the OUTBOUND_HANDLER_<NAME>_* limits for this handler
    #[arg(long)]
    handler: Option<String>,
}

fn parse_method(s: &str) -> Result<Method, String> {
    Method::from_bytes(s.to_ascii_uppercase().as_bytes()).map_err(|e| e.to_string())
}

fn parse_header(s: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {s:?}"))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

#[derive(Serialize)]
struct FetchReport {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

#[derive(Serialize)]
struct ErrorReport {
    error: String,
    reason: Option<BlockReason>,
    http_status: u16,
}

impl ErrorReport {
    fn new(err: &GatewayError) -> Self {
        Self {
            error: err.to_string(),
            reason: err.reason(),
            http_status: err.http_status(502),
        }
    }
}

#[derive(Serialize)]
struct CheckReport<'a> {
    url: &'a str,
    #[serde(flatten)]
    outcome: ValidationOutcome,
}

#[derive(Serialize)]
struct DomainReport<'a> {
    input: &'a str,
    domain: Option<String>,
    error: Option<ErrorReport>,
}

#[derive(Serialize)]
struct ClassifyReport<'a> {
    address: &'a str,
    class: Option<outbound_gate::AddressClass>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("outbound_gate=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = GatewayConfig::from_env()?;

    let all_ok = match cli.command {
        Command::Fetch(args) => fetch(Gateway::new(config)?, args, cli.json).await?,
        Command::Check { urls } => check(&Gateway::new(config)?, &urls, cli.json).await?,
        Command::Domain { inputs, dns } => {
            let gateway = if dns { Some(Gateway::new(config)?) } else { None };
            domain(gateway.as_ref(), &inputs, cli.json).await?
        }
        Command::Classify { addresses } => classify(&addresses, cli.json)?,
    };

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_BLOCKED)
    })
}

async fn fetch(
    gateway: Gateway,
    args: FetchArgs,
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    info!(url = %outbound_gate::redact_url_credentials(&args.url), "cmd:fetch");

    let mut target = FetchTarget::get(args.url).method(args.method);
    for (name, value) in args.headers {
        target = target.header(name, value);
    }
    if let Some(ms) = args.timeout_ms {
        target = target.timeout(Duration::from_millis(ms));
    }
    if let Some(max) = args.max_redirects {
        target = target.max_redirects(max);
    }
    let limits = match args.handler.as_deref() {
        Some(handler) => gateway.config().limits_for(handler),
        None => gateway.config().default_limits(),
    };
    let target = target.with_limits(limits);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let max_body = gateway.config().max_body_bytes;
    let result = async {
        let response = gateway.safe_fetch_cancellable(target, &cancel).await?;
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
                (name.to_string(), value)
            })
            .collect();
        let body = tokio::select! {
            () = cancel.cancelled() => Err(GatewayError::Cancelled),
            body = read_body_limited(response, max_body) => body,
        }?;
        Ok::<_, GatewayError>(FetchReport {
            url,
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
    .await;

    match result {
        Ok(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("HTTP {} {}", report.status, report.url);
                for (name, value) in &report.headers {
                    println!("{name}: {value}");
                }
                println!();
                println!("{}", report.body);
            }
            Ok(true)
        }
        Err(e) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&ErrorReport::new(&e))?);
            } else {
                eprintln!("error: {e}");
            }
            Ok(false)
        }
    }
}

async fn check(
    gateway: &Gateway,
    urls: &[String],
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    info!(count = urls.len(), "cmd:check");
    let outcomes = join_all(urls.iter().map(|url| gateway.check_url(url))).await;

    let reports: Vec<CheckReport<'_>> = urls
        .iter()
        .zip(outcomes)
        .map(|(url, outcome)| CheckReport { url, outcome })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}\t{}", report.outcome, report.url);
        }
    }
    Ok(reports.iter().all(|r| r.outcome.is_allowed()))
}

async fn domain(
    gateway: Option<&Gateway>,
    inputs: &[String],
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    info!(count = inputs.len(), dns = gateway.is_some(), "cmd:domain");
    let results = join_all(inputs.iter().map(|input| async move {
        match gateway {
            Some(gateway) => gateway.validate_domain_resolved(input).await,
            None => validate_domain(input),
        }
    }))
    .await;

    let reports: Vec<DomainReport<'_>> = inputs
        .iter()
        .zip(results)
        .map(|(input, result)| match result {
            Ok(domain) => DomainReport {
                input,
                domain: Some(domain),
                error: None,
            },
            Err(e) => DomainReport {
                input,
                domain: None,
                error: Some(ErrorReport::new(&e)),
            },
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            match (&report.domain, &report.error) {
                (Some(domain), _) => println!("ok\t{}\t{domain}", report.input),
                (None, Some(error)) => println!("blocked\t{}\t{}", report.input, error.error),
                (None, None) => {}
            }
        }
    }
    Ok(reports.iter().all(|r| r.error.is_none()))
}

fn classify(addresses: &[String], json: bool) -> Result<bool, Box<dyn std::error::Error>> {
    let reports: Vec<ClassifyReport<'_>> = addresses
        .iter()
        .map(|address| ClassifyReport {
            address,
            class: classify_literal(address),
        })
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            match report.class {
                Some(class) => println!("{class}\t{}", report.address),
                None => println!("not an IP address\t{}", report.address),
            }
        }
    }
    Ok(reports
        .iter()
        .all(|r| r.class.is_some_and(|class| class.is_public())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_fetch_flags() {
        let cli = Cli::try_parse_from([
            "outbound-gate",
            "fetch",
            "https://example.com",
            "-X",
            "head",
            "-H",
            "Accept: text/html",
            "--max-redirects",
            "2",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Command::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(args.method, Method::HEAD);
        assert_eq!(args.headers.len(), 1);
        assert_eq!(args.headers[0].0, "accept");
        assert_eq!(args.max_redirects, Some(2));
    }

    #[test]
    fn header_parser_requires_colon() {
        assert!(parse_header("no-colon").is_err());
        let (name, value) = parse_header("X-Test:  spaced ").unwrap();
        assert_eq!(name.as_str(), "x-test");
        assert_eq!(value.to_str().unwrap(), "spaced");
    }

    #[test]
    fn error_report_maps_status() {
        let report = ErrorReport::new(&GatewayError::BlockedHostname("localhost".into()));
        assert_eq!(report.http_status, 400);
        assert_eq!(report.reason, Some(BlockReason::BlockedHostname));
    }
}
