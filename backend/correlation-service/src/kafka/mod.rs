//! Kafka integration
//!
//! - Message: broker-agnostic inbound message and topic routing
//! - Source: the `MessageSource` seam and its rdkafka implementation

pub mod message;
pub mod source;

pub use message::{InboundMessage, MessageHandle, Topic, TopicRouter};
pub use source::{BrokerError, KafkaConfig, KafkaSource, MessageSource};
