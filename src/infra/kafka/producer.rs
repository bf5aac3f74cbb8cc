use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::{
    ClientConfig,
    error::{KafkaError, RDKafkaErrorCode},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use tracing::{debug, info};

use crate::application::ports::{PublishError, Publisher};
use crate::config::BrokerSettings;
use crate::domain::messages::Delivery;
use crate::infra::error::InfraError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaPublisher {
    producer: FutureProducer,
    partition: i32,
}

impl KafkaPublisher {
    pub fn connect(settings: &BrokerSettings) -> Result<Self, InfraError> {
        let producer: FutureProducer = producer_config(settings)
            .create()
            .map_err(|err| InfraError::broker(format!("failed to create producer: {err}")))?;

        info!(
            brokers = %settings.bootstrap_servers(),
            topic = %settings.topic,
            partition = settings.partition,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            partition: settings.partition,
        })
    }
}

fn producer_config(settings: &BrokerSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", settings.bootstrap_servers())
        .set("client.id", &settings.client_id)
        .set("acks", "all")
        .set("message.send.max.retries", settings.publish_retries.to_string())
        .set(
            "message.timeout.ms",
            settings.message_timeout.as_millis().to_string(),
        );
    config
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, PublishError> {
        let record = FutureRecord::<(), [u8]>::to(topic)
            .partition(self.partition)
            .payload(payload.as_ref());

        // Delivery is bounded by `message.timeout.ms`, not by the local queue.
        match self.producer.send(record, Timeout::Never).await {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((err, _)) => Err(publish_error(topic, err)),
        }
    }

    async fn probe(&self) -> Result<(), PublishError> {
        let producer = self.producer.clone();
        let metadata = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, PROBE_TIMEOUT)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|err| PublishError::Unavailable(format!("metadata probe panicked: {err}")))?;

        let brokers = metadata.map_err(|err| PublishError::Unavailable(err.to_string()))?;
        debug!(brokers, "Kafka metadata fetched");
        Ok(())
    }
}

fn publish_error(topic: &str, err: KafkaError) -> PublishError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut,
        ) => PublishError::Unavailable(err.to_string()),
        _ => PublishError::rejected(topic, err),
    }
}
