//! Relay loop moving broker messages into the cache.
//!
//! The loop owns the consumer stream for its whole lifetime and writes every
//! payload it receives under one fixed cache key. Cache writes are best-effort:
//! a failed write is logged and counted, and consumption moves on to the next
//! message. Only the subscription itself can stop the loop.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::application::ports::{CacheStore, SubscribeError, Subscriber};
use crate::domain::messages::Message;
use crate::domain::types::{RelayState, StartPosition};

const METRIC_RELAYED_TOTAL: &str = "ingest_relay_relayed_total";
const METRIC_CACHE_WRITE_FAILED_TOTAL: &str = "ingest_relay_cache_write_failed_total";
const METRIC_SUBSCRIPTION_ERRORS_TOTAL: &str = "ingest_relay_subscription_errors_total";
const METRIC_RELAY_LIVE: &str = "ingest_relay_relay_live";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("subscription failed: {0}")]
    Subscribe(#[from] SubscribeError),
    #[error("subscription to `{topic}` ended unexpectedly")]
    SubscriptionClosed { topic: String },
    #[error("relay task aborted: {0}")]
    Aborted(String),
}

/// What the relay reads and where it writes.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub topic: String,
    pub partition: i32,
    pub start: StartPosition,
    pub cache_key: String,
    pub ttl: Option<Duration>,
}

pub struct RelayLoop {
    config: RelayConfig,
    subscriber: Arc<dyn Subscriber>,
    cache: Arc<dyn CacheStore>,
    state: watch::Sender<RelayState>,
}

impl RelayLoop {
    pub fn new(
        config: RelayConfig,
        subscriber: Arc<dyn Subscriber>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        let (state, _) = watch::channel(RelayState::Starting);
        Self {
            config,
            subscriber,
            cache,
            state,
        }
    }

    /// Observe state transitions of this relay.
    pub fn state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Run the loop on its own task until it fails or `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> RelayHandle {
        let state = self.state();
        let task_token = shutdown.clone();
        let join = tokio::spawn(async move { self.run(task_token).await });
        RelayHandle {
            join,
            state,
            shutdown,
        }
    }

    /// Run the loop on the current task.
    ///
    /// Returns `Ok(())` after a requested shutdown and an error when the
    /// subscription can no longer deliver messages.
    #[instrument(
        name = "relay",
        skip(self, shutdown),
        fields(topic = %self.config.topic, partition = self.config.partition)
    )]
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), RelayError> {
        let outcome = self.consume(&shutdown).await;
        match &outcome {
            Ok(()) => {
                self.transition(RelayState::Stopped);
                info!("Relay stopped");
            }
            Err(err) => {
                self.transition(RelayState::Failed);
                error!(error = %err, "Relay failed");
            }
        }
        outcome
    }

    async fn consume(&self, shutdown: &CancellationToken) -> Result<(), RelayError> {
        self.transition(RelayState::Subscribing);

        let subscription = self.subscriber.subscribe(
            &self.config.topic,
            self.config.partition,
            self.config.start,
        );
        let mut stream = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            result = subscription => result?,
        };

        self.transition(RelayState::Consuming);
        info!(
            start = self.config.start.as_str(),
            cache_key = %self.config.cache_key,
            "Relay subscribed"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Relay shutdown requested");
                    return Ok(());
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(message)) => self.relay(message).await,
                Some(Err(err)) if err.is_fatal() => return Err(err.into()),
                Some(Err(err)) => {
                    counter!(METRIC_SUBSCRIPTION_ERRORS_TOTAL).increment(1);
                    warn!(error = %err, "Consumer reported an error; continuing");
                }
                None => {
                    return Err(RelayError::SubscriptionClosed {
                        topic: self.config.topic.clone(),
                    });
                }
            }
        }
    }

    async fn relay(&self, message: Message) {
        self.transition(RelayState::WritingCache);
        info!(
            offset = message.offset,
            bytes = message.payload.len(),
            "Message received from broker"
        );

        let offset = message.offset;
        match self
            .cache
            .set(&self.config.cache_key, message.payload, self.config.ttl)
            .await
        {
            Ok(()) => {
                counter!(METRIC_RELAYED_TOTAL).increment(1);
                debug!(offset, "Message written to cache");
            }
            Err(err) => {
                // Dropped for good: the broker cursor has already moved past it.
                counter!(METRIC_CACHE_WRITE_FAILED_TOTAL).increment(1);
                error!(offset, error = %err, "Failed to write message to cache");
            }
        }

        self.transition(RelayState::Consuming);
    }

    fn transition(&self, next: RelayState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Relay state changed");
            gauge!(METRIC_RELAY_LIVE).set(if next.is_live() { 1.0 } else { 0.0 });
        }
    }
}

/// Handle to a spawned relay task.
pub struct RelayHandle {
    join: JoinHandle<Result<(), RelayError>>,
    state: watch::Receiver<RelayState>,
    shutdown: CancellationToken,
}

impl RelayHandle {
    pub fn state(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Ask the relay to stop after the message it is currently handling.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the relay task to end.
    pub async fn join(self) -> Result<(), RelayError> {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(err) => Err(RelayError::Aborted(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;

    use super::*;
    use crate::application::ports::{CacheError, MessageStream, Publisher};
    use crate::infra::memory::{MemoryBroker, MemoryCache};

    const WAIT: Duration = Duration::from_secs(2);

    fn config() -> RelayConfig {
        RelayConfig {
            topic: "ingest".to_string(),
            partition: 0,
            start: StartPosition::Newest,
            cache_key: "latest".to_string(),
            ttl: None,
        }
    }

    /// Subscriber that hands out a prepared stream once.
    struct ScriptedSubscriber {
        items: Mutex<Option<Vec<Result<Message, SubscribeError>>>>,
    }

    impl ScriptedSubscriber {
        fn new(items: Vec<Result<Message, SubscribeError>>) -> Self {
            Self {
                items: Mutex::new(Some(items)),
            }
        }
    }

    #[async_trait]
    impl Subscriber for ScriptedSubscriber {
        async fn subscribe(
            &self,
            _topic: &str,
            _partition: i32,
            _start: StartPosition,
        ) -> Result<MessageStream, SubscribeError> {
            let items = self
                .items
                .lock()
                .expect("script lock")
                .take()
                .ok_or_else(|| SubscribeError::fatal("already subscribed"))?;
            Ok(Box::pin(stream::iter(items)))
        }
    }

    struct RefusingSubscriber;

    #[async_trait]
    impl Subscriber for RefusingSubscriber {
        async fn subscribe(
            &self,
            _topic: &str,
            _partition: i32,
            _start: StartPosition,
        ) -> Result<MessageStream, SubscribeError> {
            Err(SubscribeError::fatal("unknown topic or partition"))
        }
    }

    /// Cache whose writes fail until `recover` is called.
    #[derive(Default)]
    struct OutageCache {
        inner: MemoryCache,
        down: Mutex<bool>,
        attempts: Mutex<Vec<Bytes>>,
    }

    impl OutageCache {
        fn down() -> Self {
            Self {
                down: Mutex::new(true),
                ..Default::default()
            }
        }

        fn recover(&self) {
            *self.down.lock().expect("outage lock") = false;
        }

        fn attempts(&self) -> Vec<Bytes> {
            self.attempts.lock().expect("attempts lock").clone()
        }
    }

    #[async_trait]
    impl CacheStore for OutageCache {
        async fn set(
            &self,
            key: &str,
            value: Bytes,
            ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            self.attempts
                .lock()
                .expect("attempts lock")
                .push(value.clone());
            if *self.down.lock().expect("outage lock") {
                return Err(CacheError::unavailable("connection refused"));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
            self.inner.get(key).await
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn message(offset: i64, payload: &'static [u8]) -> Message {
        Message::new("ingest", 0, offset, Bytes::from_static(payload))
    }

    async fn wait_live(handle: &RelayHandle) {
        let mut state = handle.state();
        tokio::time::timeout(WAIT, state.wait_for(|s| s.is_live()))
            .await
            .expect("relay should subscribe in time")
            .expect("relay state channel open");
    }

    async fn wait_cached(cache: &dyn CacheStore, expected: &[u8]) {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(Some(value)) = cache.get("latest").await
                    && value.as_ref() == expected
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("value should be relayed in time");
    }

    #[tokio::test]
    async fn relays_published_payloads_last_writer_wins() {
        let broker = Arc::new(MemoryBroker::new(16));
        let cache = Arc::new(MemoryCache::new());
        let relay = RelayLoop::new(config(), broker.clone(), cache.clone());
        let handle = relay.spawn(CancellationToken::new());
        wait_live(&handle).await;

        broker
            .publish("ingest", Bytes::from_static(b"hello"))
            .await
            .expect("publish");
        broker
            .publish("ingest", Bytes::from_static(b"world"))
            .await
            .expect("publish");

        wait_cached(cache.as_ref(), b"world").await;

        handle.shutdown();
        handle.join().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn cache_outage_drops_update_and_keeps_consuming() {
        let broker = Arc::new(MemoryBroker::new(16));
        let cache = Arc::new(OutageCache::down());
        let relay = RelayLoop::new(config(), broker.clone(), cache.clone());
        let handle = relay.spawn(CancellationToken::new());
        wait_live(&handle).await;

        broker
            .publish("ingest", Bytes::from_static(b"during-outage"))
            .await
            .expect("publish succeeds regardless of cache");

        tokio::time::timeout(WAIT, async {
            while cache.attempts().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first write attempted");

        cache.recover();
        broker
            .publish("ingest", Bytes::from_static(b"after-outage"))
            .await
            .expect("publish");

        wait_cached(cache.as_ref(), b"after-outage").await;
        assert_eq!(
            cache.attempts(),
            vec![
                Bytes::from_static(b"during-outage"),
                Bytes::from_static(b"after-outage")
            ],
            "failed write must not be retried"
        );
        assert!(!handle.is_finished());

        handle.shutdown();
        handle.join().await.expect("clean shutdown");
    }

    #[tokio::test]
    async fn stream_end_fails_the_relay() {
        let subscriber = Arc::new(ScriptedSubscriber::new(vec![Ok(message(7, b"last"))]));
        let cache = Arc::new(MemoryCache::new());
        let relay = RelayLoop::new(config(), subscriber, cache.clone());
        let state = relay.state();

        let err = relay
            .run(CancellationToken::new())
            .await
            .expect_err("closed stream is fatal");

        assert!(matches!(err, RelayError::SubscriptionClosed { .. }));
        assert_eq!(*state.borrow(), RelayState::Failed);
        assert_eq!(
            cache.get("latest").await.expect("get"),
            Some(Bytes::from_static(b"last"))
        );
    }

    #[tokio::test]
    async fn transient_errors_are_skipped_and_fatal_errors_stop() {
        let subscriber = Arc::new(ScriptedSubscriber::new(vec![
            Ok(message(0, b"one")),
            Err(SubscribeError::transient("broker transport failure")),
            Ok(message(1, b"two")),
            Err(SubscribeError::fatal("fenced")),
            Ok(message(2, b"never")),
        ]));
        let cache = Arc::new(MemoryCache::new());
        let relay = RelayLoop::new(config(), subscriber, cache.clone());

        let err = relay
            .run(CancellationToken::new())
            .await
            .expect_err("fatal error stops the relay");

        assert!(matches!(err, RelayError::Subscribe(SubscribeError::Fatal(_))));
        assert_eq!(
            cache.get("latest").await.expect("get"),
            Some(Bytes::from_static(b"two"))
        );
    }

    #[tokio::test]
    async fn subscribe_failure_is_fatal() {
        let relay = RelayLoop::new(
            config(),
            Arc::new(RefusingSubscriber),
            Arc::new(MemoryCache::new()),
        );
        let handle = relay.spawn(CancellationToken::new());

        let err = handle.join().await.expect_err("subscribe failed");
        assert!(err.to_string().contains("unknown topic or partition"));
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_relay() {
        let broker = Arc::new(MemoryBroker::new(16));
        let token = CancellationToken::new();
        let relay = RelayLoop::new(config(), broker, Arc::new(MemoryCache::new()));
        let handle = relay.spawn(token.child_token());
        wait_live(&handle).await;

        token.cancel();
        let mut state = handle.state();
        handle.join().await.expect("shutdown is not an error");
        assert_eq!(*state.borrow_and_update(), RelayState::Stopped);
    }
}
