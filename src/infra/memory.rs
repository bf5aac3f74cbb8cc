//! In-process broker and cache backends.
//!
//! Selected with `backend = "memory"` for local runs and tests. The broker
//! keeps a bounded log per topic (a single partition, `0`) and fans live
//! messages out to subscribers over a broadcast channel; the cache is a map
//! with optional per-entry expiry.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, RwLock},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use crate::application::ports::{
    CacheError, CacheStore, MessageStream, PublishError, Publisher, SubscribeError, Subscriber,
};
use crate::domain::messages::{Delivery, Message};
use crate::domain::types::StartPosition;

use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "infra::memory";
const PARTITION: i32 = 0;

struct TopicLog {
    records: VecDeque<Message>,
    next_offset: i64,
    live: broadcast::Sender<Message>,
}

impl TopicLog {
    fn new(retention: usize) -> Self {
        let (live, _) = broadcast::channel(retention);
        Self {
            records: VecDeque::new(),
            next_offset: 0,
            live,
        }
    }
}

pub struct MemoryBroker {
    topics: Mutex<HashMap<String, TopicLog>>,
    retention: usize,
}

impl MemoryBroker {
    /// `retention` bounds both the replayable log and the live backlog of a
    /// slow subscriber; it is clamped to at least one message.
    pub fn new(retention: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            retention: retention.max(1),
        }
    }

    /// Number of messages currently retained for `topic`.
    pub fn retained(&self, topic: &str) -> usize {
        mutex_lock(&self.topics, SOURCE, "retained")
            .get(topic)
            .map_or(0, |log| log.records.len())
    }

    /// Drop `topic`, ending every live subscription to it.
    pub fn close(&self, topic: &str) {
        if mutex_lock(&self.topics, SOURCE, "close")
            .remove(topic)
            .is_some()
        {
            debug!(topic, "Memory topic closed");
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, PublishError> {
        let mut topics = mutex_lock(&self.topics, SOURCE, "publish");
        let log = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(self.retention));

        let offset = log.next_offset;
        log.next_offset += 1;
        let message = Message::new(topic, PARTITION, offset, payload);

        if log.records.len() >= self.retention {
            log.records.pop_front();
        }
        log.records.push_back(message.clone());
        // No live subscribers is not an error: the log still has the message.
        let _ = log.live.send(message);

        Ok(Delivery {
            partition: PARTITION,
            offset,
        })
    }

    async fn probe(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(
        &self,
        topic: &str,
        partition: i32,
        start: StartPosition,
    ) -> Result<MessageStream, SubscribeError> {
        if partition != PARTITION {
            return Err(SubscribeError::fatal(format!(
                "memory topic `{topic}` has no partition {partition}"
            )));
        }

        let (backlog, mut receiver) = {
            let mut topics = mutex_lock(&self.topics, SOURCE, "subscribe");
            let log = topics
                .entry(topic.to_string())
                .or_insert_with(|| TopicLog::new(self.retention));
            let backlog: Vec<Message> = match start {
                StartPosition::Newest => Vec::new(),
                StartPosition::Oldest => log.records.iter().cloned().collect(),
            };
            (backlog, log.live.subscribe())
        };

        Ok(Box::pin(async_stream::stream! {
            for message in backlog {
                yield Ok(message);
            }
            loop {
                match receiver.recv().await {
                    Ok(message) => yield Ok(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(SubscribeError::transient(format!(
                            "subscriber lagged behind, {skipped} messages skipped"
                        )));
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError> {
        // A deadline past what `Instant` can represent never expires.
        let expires_at = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        rw_write(&self.entries, SOURCE, "set").insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let now = Instant::now();
        Ok(rw_read(&self.entries, SOURCE, "get")
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    async fn next_payload(stream: &mut MessageStream) -> Bytes {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("message in time")
            .expect("stream open")
            .expect("message")
            .payload
    }

    #[tokio::test]
    async fn newest_skips_messages_published_before_subscribing() {
        let broker = MemoryBroker::new(8);
        broker
            .publish("t", Bytes::from_static(b"before"))
            .await
            .expect("publish");

        let mut stream = broker
            .subscribe("t", 0, StartPosition::Newest)
            .await
            .expect("subscribe");
        broker
            .publish("t", Bytes::from_static(b"after"))
            .await
            .expect("publish");

        assert_eq!(next_payload(&mut stream).await, Bytes::from_static(b"after"));
    }

    #[tokio::test]
    async fn oldest_replays_retained_log_then_follows() {
        let broker = MemoryBroker::new(2);
        for payload in [&b"a"[..], b"b", b"c"] {
            broker
                .publish("t", Bytes::copy_from_slice(payload))
                .await
                .expect("publish");
        }
        assert_eq!(broker.retained("t"), 2);

        let mut stream = broker
            .subscribe("t", 0, StartPosition::Oldest)
            .await
            .expect("subscribe");
        broker
            .publish("t", Bytes::from_static(b"d"))
            .await
            .expect("publish");

        assert_eq!(next_payload(&mut stream).await, Bytes::from_static(b"b"));
        assert_eq!(next_payload(&mut stream).await, Bytes::from_static(b"c"));
        assert_eq!(next_payload(&mut stream).await, Bytes::from_static(b"d"));
    }

    #[tokio::test]
    async fn closing_a_topic_ends_its_streams() {
        let broker = MemoryBroker::new(4);
        let mut stream = broker
            .subscribe("t", 0, StartPosition::Newest)
            .await
            .expect("subscribe");

        broker.close("t");

        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end promptly");
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn unknown_partition_is_rejected() {
        let broker = MemoryBroker::new(4);
        let err = match broker.subscribe("t", 3, StartPosition::Newest).await {
            Ok(_) => panic!("partition 3 does not exist"),
            Err(err) => err,
        };
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn cache_overwrites_and_expires() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.expect("get"), None);

        cache
            .set("k", Bytes::from_static(b"one"), None)
            .await
            .expect("set");
        cache
            .set("k", Bytes::from_static(b"two"), None)
            .await
            .expect("set");
        assert_eq!(
            cache.get("k").await.expect("get"),
            Some(Bytes::from_static(b"two"))
        );

        cache
            .set("k", Bytes::from_static(b"short"), Some(Duration::ZERO))
            .await
            .expect("set");
        assert_eq!(cache.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_keeps_the_value() {
        let cache = MemoryCache::new();
        cache
            .set("k", Bytes::from_static(b"kept"), Some(Duration::from_secs(u64::MAX)))
            .await
            .expect("set");
        assert_eq!(
            cache.get("k").await.expect("get"),
            Some(Bytes::from_static(b"kept"))
        );
    }
}
