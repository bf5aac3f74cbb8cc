//! Builds the broker and cache adapters selected in [`Settings`].

use std::sync::Arc;

use tracing::info;

use crate::application::ports::{CacheStore, Publisher, Subscriber};
use crate::config::{BrokerBackend, BrokerSettings, CacheBackend, CacheSettings};
use crate::infra::{
    error::InfraError,
    kafka::{KafkaPublisher, KafkaSubscriber},
    memory::{MemoryBroker, MemoryCache},
    redis::RedisCache,
};

/// Connected adapters, shared between the HTTP services and the relay.
#[derive(Clone)]
pub struct Backends {
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
    pub cache: Arc<dyn CacheStore>,
}

impl Backends {
    pub async fn connect(
        broker: &BrokerSettings,
        cache: &CacheSettings,
    ) -> Result<Self, InfraError> {
        let (publisher, subscriber) = connect_broker(broker)?;
        let cache = connect_cache(cache).await?;
        Ok(Self {
            publisher,
            subscriber,
            cache,
        })
    }

    /// Startup liveness checks; any failure is fatal to startup.
    pub async fn probe(&self) -> Result<(), InfraError> {
        self.publisher
            .probe()
            .await
            .map_err(|err| InfraError::broker(format!("broker probe failed: {err}")))?;
        self.cache
            .ping()
            .await
            .map_err(|err| InfraError::cache(format!("cache ping failed: {err}")))?;
        info!("Broker and cache are reachable");
        Ok(())
    }
}

type BrokerPair = (Arc<dyn Publisher>, Arc<dyn Subscriber>);

fn connect_broker(settings: &BrokerSettings) -> Result<BrokerPair, InfraError> {
    match settings.backend {
        BrokerBackend::Kafka => {
            let publisher: Arc<dyn Publisher> = Arc::new(KafkaPublisher::connect(settings)?);
            let subscriber: Arc<dyn Subscriber> = Arc::new(KafkaSubscriber::new(settings));
            Ok((publisher, subscriber))
        }
        BrokerBackend::Memory => {
            info!(
                retention = settings.memory_retention.get(),
                "Using in-memory broker"
            );
            let broker = Arc::new(MemoryBroker::new(settings.memory_retention.get()));
            let publisher: Arc<dyn Publisher> = broker.clone();
            let subscriber: Arc<dyn Subscriber> = broker;
            Ok((publisher, subscriber))
        }
    }
}

async fn connect_cache(settings: &CacheSettings) -> Result<Arc<dyn CacheStore>, InfraError> {
    let cache: Arc<dyn CacheStore> = match settings.backend {
        CacheBackend::Redis => Arc::new(RedisCache::connect(&settings.url).await?),
        CacheBackend::Memory => {
            info!("Using in-memory cache");
            Arc::new(MemoryCache::new())
        }
    };
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use bytes::Bytes;

    use super::*;

    #[tokio::test]
    async fn memory_backends_share_one_broker() {
        let broker = BrokerSettings {
            backend: BrokerBackend::Memory,
            brokers: Vec::new(),
            topic: "ingest".to_string(),
            partition: 0,
            publish_retries: 5,
            message_timeout: Duration::from_secs(30),
            client_id: "ingest-relay".to_string(),
            group_id: "ingest-relay".to_string(),
            memory_retention: NonZeroUsize::new(16).expect("non-zero"),
        };
        let cache = CacheSettings {
            backend: CacheBackend::Memory,
            url: String::new(),
            key: "latest".to_string(),
            ttl: None,
        };

        let backends = Backends::connect(&broker, &cache).await.expect("connect");
        backends.probe().await.expect("probe");

        let mut stream = backends
            .subscriber
            .subscribe("ingest", 0, Default::default())
            .await
            .expect("subscribe");
        backends
            .publisher
            .publish("ingest", Bytes::from_static(b"shared"))
            .await
            .expect("publish");

        let message = futures::StreamExt::next(&mut stream)
            .await
            .expect("stream open")
            .expect("message");
        assert_eq!(message.payload, Bytes::from_static(b"shared"));
    }
}
