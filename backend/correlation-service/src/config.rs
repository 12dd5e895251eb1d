//! Configuration for the correlation service
use redis_utils::RedisSettings;
use resilience::RetryConfig;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::kafka::KafkaConfig;
use crate::services::AnalyticsConfig;

const OFFSET_RESET_POLICIES: &[&str] = &["earliest", "latest", "error"];

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // ============================================
    // Kafka
    // ============================================
    /// Kafka bootstrap servers (comma-separated)
    #[serde(default = "default_kafka_bootstrap_servers")]
    pub kafka_bootstrap_servers: String,

    /// Consumer group id
    #[serde(default = "default_kafka_group_id")]
    pub kafka_group_id: String,

    /// Where to start when the group has no committed offset
    #[serde(default = "default_kafka_auto_offset_reset")]
    pub kafka_auto_offset_reset: String,

    #[serde(default = "default_kafka_customer_topic")]
    pub kafka_customer_topic: String,

    #[serde(default = "default_kafka_inventory_topic")]
    pub kafka_inventory_topic: String,

    #[serde(default = "default_kafka_session_timeout_ms")]
    pub kafka_session_timeout_ms: u64,

    #[serde(default = "default_kafka_max_poll_interval_ms")]
    pub kafka_max_poll_interval_ms: u64,

    /// Upper bound on a single poll wait
    #[serde(default = "default_kafka_poll_timeout_ms")]
    pub kafka_poll_timeout_ms: u64,

    // ============================================
    // Redis (dedup store)
    // ============================================
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    #[serde(default)]
    pub redis_db: i64,

    #[serde(default)]
    pub redis_password: Option<String>,

    /// Dedup window in seconds
    #[serde(default = "default_redis_ttl")]
    pub redis_ttl: u64,

    #[serde(default = "default_redis_command_timeout_ms")]
    pub redis_command_timeout_ms: u64,

    // ============================================
    // Analytics sink
    // ============================================
    #[serde(default = "default_analytics_base_url")]
    pub analytics_base_url: String,

    #[serde(default = "default_analytics_endpoint")]
    pub analytics_endpoint: String,

    #[serde(default = "default_analytics_retry_attempts")]
    pub analytics_retry_attempts: u32,

    /// Base of the exponential backoff between attempts
    #[serde(default = "default_analytics_retry_backoff")]
    pub analytics_retry_backoff: f64,

    /// Time unit of the backoff, in milliseconds
    #[serde(default = "default_analytics_backoff_unit_ms")]
    pub analytics_backoff_unit_ms: u64,

    /// Per-request timeout
    #[serde(default = "default_analytics_timeout_secs")]
    pub analytics_timeout_secs: u64,

    // ============================================
    // Health / metrics server
    // ============================================
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_kafka_bootstrap_servers() -> String {
    "localhost:9092".to_string()
}

fn default_kafka_group_id() -> String {
    "analytics-consumer-group".to_string()
}

fn default_kafka_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_kafka_customer_topic() -> String {
    "customer_data".to_string()
}

fn default_kafka_inventory_topic() -> String {
    "inventory_data".to_string()
}

fn default_kafka_session_timeout_ms() -> u64 {
    6000
}

fn default_kafka_max_poll_interval_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_kafka_poll_timeout_ms() -> u64 {
    1000
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_ttl() -> u64 {
    86_400 // 24 hours
}

fn default_redis_command_timeout_ms() -> u64 {
    3000
}

fn default_analytics_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_analytics_endpoint() -> String {
    "/api/analytics/data".to_string()
}

fn default_analytics_retry_attempts() -> u32 {
    3
}

fn default_analytics_retry_backoff() -> f64 {
    2.0
}

fn default_analytics_backoff_unit_ms() -> u64 {
    1000
}

fn default_analytics_timeout_secs() -> u64 {
    10
}

fn default_http_port() -> u16 {
    8090
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(envy::from_env()?)
    }

    /// Reject settings the service cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.kafka_bootstrap_servers.trim().is_empty() {
            return Err(AppError::Config(
                "KAFKA_BOOTSTRAP_SERVERS must not be empty".to_string(),
            ));
        }
        if self.kafka_group_id.trim().is_empty() {
            return Err(AppError::Config("KAFKA_GROUP_ID must not be empty".to_string()));
        }
        if !OFFSET_RESET_POLICIES.contains(&self.kafka_auto_offset_reset.as_str()) {
            return Err(AppError::Config(format!(
                "KAFKA_AUTO_OFFSET_RESET must be one of {:?}, got '{}'",
                OFFSET_RESET_POLICIES, self.kafka_auto_offset_reset
            )));
        }
        if self.kafka_customer_topic.trim().is_empty()
            || self.kafka_inventory_topic.trim().is_empty()
        {
            return Err(AppError::Config("Topic names must not be empty".to_string()));
        }
        if self.kafka_customer_topic == self.kafka_inventory_topic {
            return Err(AppError::Config(format!(
                "Customer and inventory topics must differ (both '{}')",
                self.kafka_customer_topic
            )));
        }
        if self.redis_ttl == 0 {
            return Err(AppError::Config("REDIS_TTL must be at least 1 second".to_string()));
        }
        if self.analytics_retry_attempts == 0 {
            return Err(AppError::Config(
                "ANALYTICS_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if !self.analytics_retry_backoff.is_finite() || self.analytics_retry_backoff < 1.0 {
            return Err(AppError::Config(format!(
                "ANALYTICS_RETRY_BACKOFF must be a finite number >= 1, got {}",
                self.analytics_retry_backoff
            )));
        }
        reqwest::Url::parse(&self.analytics_url()).map_err(|e| {
            AppError::Config(format!("Invalid analytics URL '{}': {}", self.analytics_url(), e))
        })?;

        Ok(())
    }

    pub fn analytics_url(&self) -> String {
        format!("{}{}", self.analytics_base_url, self.analytics_endpoint)
    }

    pub fn kafka(&self) -> KafkaConfig {
        KafkaConfig {
            bootstrap_servers: self.kafka_bootstrap_servers.clone(),
            group_id: self.kafka_group_id.clone(),
            auto_offset_reset: self.kafka_auto_offset_reset.clone(),
            customer_topic: self.kafka_customer_topic.clone(),
            inventory_topic: self.kafka_inventory_topic.clone(),
            session_timeout_ms: self.kafka_session_timeout_ms,
            max_poll_interval_ms: self.kafka_max_poll_interval_ms,
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.kafka_poll_timeout_ms)
    }

    pub fn redis(&self) -> RedisSettings {
        RedisSettings::new(
            self.redis_host.clone(),
            self.redis_port,
            self.redis_db,
            self.redis_password.clone(),
        )
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.redis_ttl)
    }

    pub fn redis_command_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_command_timeout_ms)
    }

    pub fn analytics(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            url: self.analytics_url(),
            request_timeout: Duration::from_secs(self.analytics_timeout_secs),
            retry: RetryConfig::new(
                self.analytics_retry_attempts,
                self.analytics_retry_backoff,
                Duration::from_millis(self.analytics_backoff_unit_ms),
            ),
        }
    }
}
