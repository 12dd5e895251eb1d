//! Message sources the consumption loop pulls from

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::message::{InboundMessage, MessageHandle};

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Kafka brokers (comma-separated)
    pub bootstrap_servers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Offset reset policy when the group has no committed offset
    pub auto_offset_reset: String,
    pub customer_topic: String,
    pub inventory_topic: String,
    pub session_timeout_ms: u64,
    pub max_poll_interval_ms: u64,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: "analytics-consumer-group".to_string(),
            auto_offset_reset: "earliest".to_string(),
            customer_topic: "customer_data".to_string(),
            inventory_topic: "inventory_data".to_string(),
            session_timeout_ms: 6000,
            max_poll_interval_ms: 300_000,
        }
    }
}

impl KafkaConfig {
    /// librdkafka client properties. Auto-commit is always off: offsets are
    /// committed per message after processing. Partition EOF events are
    /// enabled and surface as [`BrokerError::PartitionEof`].
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", self.max_poll_interval_ms.to_string())
            .set("enable.partition.eof", "true");
        config
    }
}

/// Errors reported by a message source
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Benign: the consumer caught up with a partition
    #[error("Reached end of partition {partition}")]
    PartitionEof { partition: i32 },

    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Broker error: {0}")]
    Other(String),

    #[error("Consumer is closed")]
    Closed,
}

impl BrokerError {
    pub fn is_partition_eof(&self) -> bool {
        matches!(self, BrokerError::PartitionEof { .. })
    }
}

/// Where the consumption loop gets its messages from.
///
/// Implemented by [`KafkaSource`]; tests script their own sources.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait up to `timeout` for the next message. `None` means nothing arrived.
    async fn poll(&mut self, timeout: Duration) -> Option<Result<InboundMessage, BrokerError>>;

    /// Acknowledge a processed message.
    fn commit(&mut self, handle: &MessageHandle) -> Result<(), BrokerError>;

    /// Release the underlying client. Called exactly once, at shutdown.
    fn close(&mut self);
}

/// Kafka-backed message source subscribed to both input topics.
///
/// `close` drops the consumer, which leaves the group; the source is inert
/// afterwards.
pub struct KafkaSource {
    consumer: Option<StreamConsumer>,
}

impl KafkaSource {
    /// Create the consumer and subscribe to the customer and inventory topics
    pub fn new(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = config.client_config().create()?;

        let topics = [config.customer_topic.as_str(), config.inventory_topic.as_str()];
        consumer.subscribe(&topics)?;

        info!(
            "Kafka consumer created (brokers: {}, group: {}), subscribed to topics: {:?}",
            config.bootstrap_servers, config.group_id, topics
        );

        Ok(Self {
            consumer: Some(consumer),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.consumer.is_none()
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Option<Result<InboundMessage, BrokerError>> {
        let Some(consumer) = self.consumer.as_ref() else {
            return Some(Err(BrokerError::Closed));
        };

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => None,
            Ok(Ok(msg)) => Some(Ok(InboundMessage {
                topic: msg.topic().to_string(),
                key: msg.key().map(<[u8]>::to_vec),
                payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                handle: MessageHandle::new(msg.topic(), msg.partition(), msg.offset()),
            })),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                Some(Err(BrokerError::PartitionEof { partition }))
            }
            Ok(Err(e)) => Some(Err(BrokerError::Kafka(e))),
        }
    }

    fn commit(&mut self, handle: &MessageHandle) -> Result<(), BrokerError> {
        let consumer = self.consumer.as_ref().ok_or(BrokerError::Closed)?;

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            handle.topic(),
            handle.partition(),
            Offset::Offset(handle.next_offset()),
        )?;

        consumer.commit(&tpl, CommitMode::Async)?;

        debug!("Committed offset {} for {}", handle.next_offset(), handle);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!("Kafka consumer closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_disables_auto_commit() {
        let config = KafkaConfig {
            group_id: "g1".to_string(),
            auto_offset_reset: "latest".to_string(),
            ..Default::default()
        };
        let client = config.client_config();

        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("group.id"), Some("g1"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("session.timeout.ms"), Some("6000"));
        assert_eq!(client.get("max.poll.interval.ms"), Some("300000"));
        assert_eq!(client.get("enable.partition.eof"), Some("true"));
    }

    #[test]
    fn test_partition_eof_is_benign() {
        assert!(BrokerError::PartitionEof { partition: 0 }.is_partition_eof());
        assert!(!BrokerError::Other("down".into()).is_partition_eof());
        assert!(!BrokerError::Closed.is_partition_eof());
    }

    #[tokio::test]
    async fn test_close_releases_consumer() {
        // Creating the client does not contact the broker
        let config = KafkaConfig {
            bootstrap_servers: "127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let mut source = KafkaSource::new(&config).unwrap();
        assert!(!source.is_closed());

        source.close();
        source.close();
        assert!(source.is_closed());

        let handle = MessageHandle::new("customer_data", 0, 0);
        assert!(matches!(source.commit(&handle), Err(BrokerError::Closed)));
        assert!(matches!(
            source.poll(Duration::from_millis(10)).await,
            Some(Err(BrokerError::Closed))
        ));
    }
}
