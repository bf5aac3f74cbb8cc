use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::domain::types::StartPosition;

/// Command-line arguments for the ingest-relay binary.
#[derive(Debug, Parser)]
#[command(
    name = "ingest-relay",
    version,
    about = "HTTP to Kafka ingest with a Redis latest-value relay"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "INGEST_RELAY_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP listener and the relay.
    Serve(Box<ServeArgs>),
    /// Resolve configuration and probe the broker and cache, then exit.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub backends: BackendOverrides,
}

/// Overrides shared by every command that connects to the broker or cache.
#[derive(Debug, Args, Default, Clone)]
pub struct BackendOverrides {
    /// Override the broker backend (kafka|memory).
    #[arg(long = "broker-backend", value_name = "BACKEND")]
    pub broker_backend: Option<String>,

    /// Override the bootstrap brokers; repeat or comma-separate.
    #[arg(long = "broker", value_name = "HOST:PORT", value_delimiter = ',')]
    pub brokers: Vec<String>,

    /// Override the topic payloads are published to and relayed from.
    #[arg(long = "topic", value_name = "TOPIC")]
    pub topic: Option<String>,

    /// Override the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the cache connection URL.
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub backends: BackendOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the maximum accepted request body in bytes.
    #[arg(long = "server-max-body-bytes", value_name = "BYTES")]
    pub server_max_body_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the cache key the relay writes to.
    #[arg(long = "cache-key", value_name = "KEY")]
    pub cache_key: Option<String>,

    /// Override where the relay starts reading (newest|oldest).
    #[arg(long = "relay-start", value_name = "POSITION")]
    pub relay_start: Option<StartPosition>,
}
