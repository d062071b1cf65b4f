//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::DEFAULT_THRESHOLD;
use thiserror::Error;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// A variable was set to something that does not parse.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {name}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL`: PostgreSQL for products and the audit log (default: in-memory)
/// - `EVENT_BUS_BROKERS`: comma-separated broker URLs (default: in-memory backbone)
/// - `EVENT_BUS_PARTITIONS`: partitions of the product topic (default: `8`)
/// - `LOW_STOCK_THRESHOLD`: quantities below this warn (default: `5`)
/// - `ENABLE_EVENT_LOG`: write every event to the audit log (default: `false`)
/// - `SSE_HEARTBEAT_SECS`: live-stream keep-alive interval, at least 1 (default: `15`)
/// - `SUBSCRIBER_QUEUE_CAPACITY`: per-subscription queue size (default: `64`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub event_bus_brokers: Vec<String>,
    pub event_bus_partitions: u32,
    pub low_stock_threshold: u32,
    pub enable_event_log: bool,
    pub sse_heartbeat: Duration,
    pub subscriber_queue_capacity: usize,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`; unset or blank variables take
    /// their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(&get, "LOG_FORMAT", defaults.log_format)?,
            database_url: get("DATABASE_URL"),
            event_bus_brokers: get("EVENT_BUS_BROKERS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|b| !b.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            event_bus_partitions: parse(&get, "EVENT_BUS_PARTITIONS", defaults.event_bus_partitions)?,
            low_stock_threshold: parse(&get, "LOW_STOCK_THRESHOLD", defaults.low_stock_threshold)?,
            enable_event_log: match get("ENABLE_EVENT_LOG") {
                Some(raw) => parse_bool(&raw).ok_or(ConfigError {
                    name: "ENABLE_EVENT_LOG",
                    value: raw,
                })?,
                None => defaults.enable_event_log,
            },
            sse_heartbeat: match parse(&get, "SSE_HEARTBEAT_SECS", defaults.sse_heartbeat.as_secs())? {
                0 => {
                    return Err(ConfigError {
                        name: "SSE_HEARTBEAT_SECS",
                        value: "0".to_string(),
                    });
                }
                secs => Duration::from_secs(secs),
            },
            subscriber_queue_capacity: parse(
                &get,
                "SUBSCRIBER_QUEUE_CAPACITY",
                defaults.subscriber_queue_capacity,
            )?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            event_bus_brokers: Vec::new(),
            event_bus_partitions: 8,
            low_stock_threshold: DEFAULT_THRESHOLD,
            enable_event_log: false,
            sse_heartbeat: Duration::from_secs(15),
            subscriber_queue_capacity: 64,
        }
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError { name, value: raw }),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
