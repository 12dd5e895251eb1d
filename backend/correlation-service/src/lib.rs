//! Correlation Service
//!
//! Consumes the customer and inventory Kafka topics, drops records already seen
//! within the dedup window, correlates the two streams in memory and forwards
//! merged snapshots to the analytics HTTP API.

pub mod config;
pub mod error;
pub mod http;
pub mod kafka;
pub mod metrics;
pub mod services;
pub mod shutdown;

pub use config::Config;
pub use error::{AppError, Result};
pub use kafka::{KafkaSource, MessageSource, TopicRouter};
pub use services::{AnalyticsClient, CorrelationConsumer, SnapshotSink};
