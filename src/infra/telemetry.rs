//! Process-wide tracing subscriber and metric descriptions.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global subscriber. `RUST_LOG` directives refine the configured level.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(logging.level))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "ingest_relay_publish_total",
            Unit::Count,
            "Publish attempts by outcome (ok|error)."
        );
        describe_histogram!(
            "ingest_relay_publish_ms",
            Unit::Milliseconds,
            "Time from publish call to broker acknowledgement in milliseconds."
        );
        describe_counter!(
            "ingest_relay_relayed_total",
            Unit::Count,
            "Messages written into the cache by the relay."
        );
        describe_counter!(
            "ingest_relay_cache_write_failed_total",
            Unit::Count,
            "Relayed messages dropped because the cache write failed."
        );
        describe_counter!(
            "ingest_relay_subscription_errors_total",
            Unit::Count,
            "Transient errors reported by the broker subscription."
        );
        describe_counter!(
            "ingest_relay_retrieve_total",
            Unit::Count,
            "Cache reads by outcome (hit|empty|error)."
        );
        describe_gauge!(
            "ingest_relay_relay_live",
            Unit::Count,
            "1 while the relay holds a live subscription, 0 otherwise."
        );
    });
}
