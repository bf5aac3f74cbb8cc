//! Traits describing the broker and cache adapters.

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;

use crate::domain::messages::{Delivery, Message};
use crate::domain::types::StartPosition;

/// Continuous sequence of messages read from one partition.
///
/// Dropping the stream releases the underlying consumer.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, SubscribeError>> + Send>>;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("publish to `{topic}` failed: {message}")]
    Rejected { topic: String, message: String },
}

impl PublishError {
    pub fn rejected(topic: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Rejected {
            topic: topic.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    /// Reported by the consumer but recoverable; consumption continues.
    #[error("transient consumer error: {0}")]
    Transient(String),
    /// The subscription can no longer deliver messages.
    #[error("fatal consumer error: {0}")]
    Fatal(String),
}

impl SubscribeError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }

    pub fn fatal(err: impl std::fmt::Display) -> Self {
        Self::Fatal(err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SubscribeError::Fatal(_))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache command failed: {0}")]
    Command(String),
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn command(err: impl std::fmt::Display) -> Self {
        Self::Command(err.to_string())
    }
}

/// Producer side of the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload`, returning once the broker acknowledged it.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, PublishError>;

    /// Verify the broker is reachable.
    async fn probe(&self) -> Result<(), PublishError>;
}

/// Consumer side of the broker.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        partition: i32,
        start: StartPosition,
    ) -> Result<MessageStream, SubscribeError>;
}

/// Key-value cache with last-writer-wins semantics.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// `Ok(None)` when the key holds no value.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
