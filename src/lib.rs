//! HTTP ingestion bridged to a Kafka topic, relayed into a Redis key.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
