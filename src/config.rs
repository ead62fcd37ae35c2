use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::datadog::DEFAULT_SERIES_ADDR;

/// Configuration for a nozzle process.
#[derive(Debug, Clone)]
pub struct NozzleConfig {
    pub uaa_addr: String,
    pub client_id: String,
    pub client_secret: String,
    pub loggregator_addr: String,
    pub port: u16,
    pub subscription_id: String,
    pub skip_cert_verify: bool,
    pub buffer_size: usize,
    pub polling_interval: Duration,
    pub max_rate_buckets: usize,
    pub include_router_logs: bool,
}

impl NozzleConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            uaa_addr: required("UAA_ADDR")?,
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            loggregator_addr: required("LOGGREGATOR_ADDR")?,
            port: port("PORT")?,
            subscription_id: required("SUBSCRIPTION_ID")?,
            skip_cert_verify: flag("SKIP_CERT_VERIFY"),
            buffer_size: int_or("BUFFER_SIZE", 10_000)?,
            polling_interval: duration_or("POLLING_INTERVAL", Duration::from_secs(60))?,
            max_rate_buckets: int_or("MAX_RATE_BUCKETS", 60)?,
            include_router_logs: flag("INCLUDE_ROUTER_LOGS"),
        })
    }
}

/// Configuration for an accumulator process.
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    pub uaa_addr: String,
    pub client_id: String,
    pub client_secret: String,
    pub nozzle_addrs: Vec<String>,
    pub port: u16,
    pub skip_cert_verify: bool,
    pub polling_interval: Duration,
    pub nozzle_app_guid: Option<String>,
    pub report_limit: usize,
}

impl AccumulatorConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            uaa_addr: required("UAA_ADDR")?,
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            nozzle_addrs: addr_list("NOZZLE_ADDRS")?,
            port: port("PORT")?,
            skip_cert_verify: flag("SKIP_CERT_VERIFY"),
            polling_interval: duration_or("POLLING_INTERVAL", Duration::from_secs(60))?,
            nozzle_app_guid: std::env::var("NOZZLE_APP_GUID")
                .ok()
                .filter(|s| !s.is_empty()),
            report_limit: int_or("REPORT_LIMIT", crate::collector::DEFAULT_REPORT_LIMIT)?,
        })
    }
}

/// Configuration for a reporter process.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    pub uaa_addr: String,
    pub capi_addr: String,
    pub accumulator_addr: String,
    pub client_id: String,
    pub client_secret: String,
    pub datadog_api_key: String,
    pub datadog_addr: String,
    pub skip_cert_verify: bool,
    pub report_interval: Duration,
    pub reporter_host: String,
    pub report_limit: usize,
    pub app_info_cache_ttl: Duration,
}

impl ReporterConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            uaa_addr: required("UAA_ADDR")?,
            capi_addr: required("CAPI_ADDR")?,
            accumulator_addr: required("ACCUMULATOR_ADDR")?,
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            datadog_api_key: required("DATADOG_API_KEY")?,
            datadog_addr: std::env::var("DATADOG_ADDR")
                .unwrap_or_else(|_| DEFAULT_SERIES_ADDR.to_string()),
            skip_cert_verify: flag("SKIP_CERT_VERIFY"),
            report_interval: duration_or("REPORT_INTERVAL", Duration::from_secs(60))?,
            reporter_host: std::env::var("REPORTER_HOST").unwrap_or_default(),
            report_limit: int_or("REPORT_LIMIT", crate::collector::DEFAULT_REPORT_LIMIT)?,
            app_info_cache_ttl: duration_or("APP_INFO_CACHE_TTL", Duration::from_secs(150))?,
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow!("{name} is required"))
}

fn port(name: &str) -> Result<u16> {
    required(name)?
        .parse()
        .with_context(|| format!("{name} must be a port number"))
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn int_or(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn duration_or(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(v) => humantime::parse_duration(&v)
            .with_context(|| format!("{name} must be a duration (e.g. 1m, 150s)")),
        Err(_) => Ok(default),
    }
}

fn addr_list(name: &str) -> Result<Vec<String>> {
    let addrs: Vec<String> = required(name)?
        .split(',')
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();

    if addrs.is_empty() {
        return Err(anyhow!("{name} must contain at least one address"));
    }

    Ok(addrs)
}
