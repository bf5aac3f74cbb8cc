//! Messages moving through the relay pipeline.

use bytes::Bytes;

/// A message read back from the broker.
///
/// The payload is opaque: it is forwarded to the cache exactly as published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            payload,
        }
    }
}

/// Broker acknowledgement for a published payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}
