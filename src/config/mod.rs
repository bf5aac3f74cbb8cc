//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroUsize,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::StartPosition;

mod cli;

pub use cli::{BackendOverrides, CheckArgs, CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "ingest-relay";
const ENV_PREFIX: &str = "INGEST_RELAY";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_BROKER: &str = "kafka:9092";
const DEFAULT_TOPIC: &str = "ingest";
const DEFAULT_PARTITION: i32 = 0;
const DEFAULT_PUBLISH_RETRIES: u32 = 5;
const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CLIENT_ID: &str = "ingest-relay";
const DEFAULT_GROUP_ID: &str = "ingest-relay";
const DEFAULT_MEMORY_RETENTION: usize = 10_000;
const DEFAULT_CACHE_URL: &str = "redis://redis:6379/0";
const DEFAULT_CACHE_KEY: &str = "latest";
/// Redis rejects expiries that overflow its millisecond clock.
const MAX_TTL_SECONDS: u64 = 100 * 365 * 24 * 60 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub broker: BrokerSettings,
    pub cache: CacheSettings,
    pub relay: RelaySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    Kafka,
    Memory,
}

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub backend: BrokerBackend,
    pub brokers: Vec<String>,
    pub topic: String,
    pub partition: i32,
    pub publish_retries: u32,
    pub message_timeout: Duration,
    pub client_id: String,
    pub group_id: String,
    pub memory_retention: NonZeroUsize,
}

impl BrokerSettings {
    /// Comma-joined bootstrap list in the form librdkafka expects.
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub url: String,
    pub key: String,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub start_position: StartPosition,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("broker.brokers")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Check(args)) => raw.apply_backend_overrides(&args.backends),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    broker: RawBrokerSettings,
    cache: RawCacheSettings,
    relay: RawRelaySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(limit) = overrides.server_max_body_bytes {
            self.server.max_body_bytes = Some(limit);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(key) = overrides.cache_key.as_ref() {
            self.cache.key = Some(key.clone());
        }
        if let Some(start) = overrides.relay_start {
            self.relay.start_position = Some(start.as_str().to_string());
        }

        self.apply_backend_overrides(&overrides.backends);
    }

    fn apply_backend_overrides(&mut self, overrides: &BackendOverrides) {
        if let Some(backend) = overrides.broker_backend.as_ref() {
            self.broker.backend = Some(backend.clone());
        }
        if !overrides.brokers.is_empty() {
            self.broker.brokers = Some(overrides.brokers.clone());
        }
        if let Some(topic) = overrides.topic.as_ref() {
            self.broker.topic = Some(topic.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            broker,
            cache,
            relay,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            broker: build_broker_settings(broker)?,
            cache: build_cache_settings(cache)?,
            relay: build_relay_settings(relay)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.host", reason))?;

    let limit = server.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if limit == 0 {
        return Err(LoadError::invalid(
            "server.max_body_bytes",
            "must be greater than zero",
        ));
    }
    let max_body_bytes = usize::try_from(limit).map_err(|_| {
        LoadError::invalid(
            "server.max_body_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        addr,
        max_body_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_broker_settings(broker: RawBrokerSettings) -> Result<BrokerSettings, LoadError> {
    let backend = match broker.backend.as_deref().map(str::trim) {
        None | Some("kafka") => BrokerBackend::Kafka,
        Some("memory") => BrokerBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "broker.backend",
                format!("unknown backend `{other}` (expected kafka|memory)"),
            ));
        }
    };

    let brokers: Vec<String> = broker
        .brokers
        .unwrap_or_else(|| vec![DEFAULT_BROKER.to_string()])
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    if backend == BrokerBackend::Kafka && brokers.is_empty() {
        return Err(LoadError::invalid(
            "broker.brokers",
            "at least one bootstrap broker is required",
        ));
    }

    let topic = non_empty(broker.topic, DEFAULT_TOPIC, "broker.topic")?;

    let partition = broker.partition.unwrap_or(DEFAULT_PARTITION);
    if partition < 0 {
        return Err(LoadError::invalid(
            "broker.partition",
            "partition must not be negative",
        ));
    }

    let message_timeout_ms = broker
        .message_timeout_ms
        .unwrap_or(DEFAULT_MESSAGE_TIMEOUT_MS);
    if message_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "broker.message_timeout_ms",
            "must be greater than zero",
        ));
    }

    let retention = broker.memory_retention.unwrap_or(DEFAULT_MEMORY_RETENTION);
    let memory_retention = NonZeroUsize::new(retention).ok_or_else(|| {
        LoadError::invalid("broker.memory_retention", "must be greater than zero")
    })?;

    Ok(BrokerSettings {
        backend,
        brokers,
        topic,
        partition,
        publish_retries: broker.publish_retries.unwrap_or(DEFAULT_PUBLISH_RETRIES),
        message_timeout: Duration::from_millis(message_timeout_ms),
        client_id: non_empty(broker.client_id, DEFAULT_CLIENT_ID, "broker.client_id")?,
        group_id: non_empty(broker.group_id, DEFAULT_GROUP_ID, "broker.group_id")?,
        memory_retention,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("redis") => CacheBackend::Redis,
        Some("memory") => CacheBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected redis|memory)"),
            ));
        }
    };

    let url = non_empty(cache.url, DEFAULT_CACHE_URL, "cache.url")?;
    let key = non_empty(cache.key, DEFAULT_CACHE_KEY, "cache.key")?;

    let ttl = match cache.ttl_seconds {
        None => None,
        Some(0) => {
            return Err(LoadError::invalid(
                "cache.ttl_seconds",
                "must be greater than zero when set",
            ));
        }
        Some(seconds) if seconds > MAX_TTL_SECONDS => {
            return Err(LoadError::invalid(
                "cache.ttl_seconds",
                format!("must be at most {MAX_TTL_SECONDS} seconds"),
            ));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
    };

    Ok(CacheSettings {
        backend,
        url,
        key,
        ttl,
    })
}

fn build_relay_settings(relay: RawRelaySettings) -> Result<RelaySettings, LoadError> {
    let start_position = match relay.start_position {
        Some(value) => StartPosition::from_str(&value)
            .map_err(|err| LoadError::invalid("relay.start_position", err.to_string()))?,
        None => StartPosition::default(),
    };

    Ok(RelaySettings { start_position })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBrokerSettings {
    backend: Option<String>,
    brokers: Option<Vec<String>>,
    topic: Option<String>,
    partition: Option<i32>,
    publish_retries: Option<u32>,
    message_timeout_ms: Option<u64>,
    client_id: Option<String>,
    group_id: Option<String>,
    memory_retention: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    url: Option<String>,
    key: Option<String>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRelaySettings {
    start_position: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let ip: IpAddr = host
        .trim()
        .parse()
        .map_err(|_| format!("`{host}` is not an IP address (hostnames are not resolved)"))?;
    Ok(SocketAddr::new(ip, port))
}

fn non_empty(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let value = value.unwrap_or_else(|| default.to_string());
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(trimmed.to_string())
}
