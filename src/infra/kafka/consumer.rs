use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rdkafka::{
    ClientConfig, Message as _, Offset, TopicPartitionList,
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
};
use tracing::info;

use crate::application::ports::{MessageStream, SubscribeError, Subscriber};
use crate::config::BrokerSettings;
use crate::domain::messages::Message;
use crate::domain::types::StartPosition;

/// Creates one consumer per subscription; the consumer lives inside the
/// returned stream and is closed when the stream is dropped.
pub struct KafkaSubscriber {
    config: ClientConfig,
}

impl KafkaSubscriber {
    pub fn new(settings: &BrokerSettings) -> Self {
        Self {
            config: consumer_config(settings),
        }
    }
}

fn consumer_config(settings: &BrokerSettings) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", settings.bootstrap_servers())
        .set("client.id", &settings.client_id)
        .set("group.id", &settings.group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false");
    config
}

fn start_offset(start: StartPosition) -> Offset {
    match start {
        StartPosition::Newest => Offset::End,
        StartPosition::Oldest => Offset::Beginning,
    }
}

#[async_trait]
impl Subscriber for KafkaSubscriber {
    async fn subscribe(
        &self,
        topic: &str,
        partition: i32,
        start: StartPosition,
    ) -> Result<MessageStream, SubscribeError> {
        let consumer: StreamConsumer = self.config.create().map_err(SubscribeError::fatal)?;

        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(topic, partition, start_offset(start))
            .map_err(SubscribeError::fatal)?;
        consumer.assign(&assignment).map_err(SubscribeError::fatal)?;

        info!(
            topic,
            partition,
            start = start.as_str(),
            "Kafka consumer assigned"
        );

        Ok(Box::pin(async_stream::stream! {
            let mut messages = consumer.stream();
            while let Some(item) = messages.next().await {
                let next = item.map(|message| detach(&message)).map_err(classify);
                yield next;
            }
        }))
    }
}

/// Copy a borrowed record out of the consumer's buffer. A record without a
/// payload is relayed as an empty value.
fn detach<M: rdkafka::Message>(message: &M) -> Message {
    Message::new(
        message.topic(),
        message.partition(),
        message.offset(),
        Bytes::copy_from_slice(message.payload().unwrap_or_default()),
    )
}

fn classify(err: KafkaError) -> SubscribeError {
    match err {
        KafkaError::MessageConsumptionFatal(_) => SubscribeError::fatal(err),
        other => SubscribeError::transient(other),
    }
}
