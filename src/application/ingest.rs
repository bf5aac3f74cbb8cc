//! Ingestion service: forwards request bodies to the broker.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::application::ports::{PublishError, Publisher};
use crate::domain::messages::Delivery;

const METRIC_PUBLISH_TOTAL: &str = "ingest_relay_publish_total";
const METRIC_PUBLISH_MS: &str = "ingest_relay_publish_ms";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Publishes payloads to the configured topic and waits for acknowledgement.
pub struct IngestService {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl IngestService {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    #[instrument(skip(self, payload), fields(topic = %self.topic, bytes = payload.len()))]
    pub async fn ingest(&self, payload: Bytes) -> Result<Delivery, IngestError> {
        let started_at = Instant::now();
        let result = self.publisher.publish(&self.topic, payload).await;
        histogram!(METRIC_PUBLISH_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(delivery) => {
                counter!(METRIC_PUBLISH_TOTAL, "outcome" => "ok").increment(1);
                debug!(
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Payload acknowledged by broker"
                );
                Ok(delivery)
            }
            Err(err) => {
                counter!(METRIC_PUBLISH_TOTAL, "outcome" => "error").increment(1);
                warn!(error = %err, "Publish failed");
                Err(err.into())
            }
        }
    }
}
