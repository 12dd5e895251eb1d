//! # Idempotent Kafka Consumer Library
//!
//! Deduplicates Kafka messages under at-least-once delivery using Redis keys
//! with a TTL as the record of "already processed" messages.
//!
//! ## Problem
//!
//! - **Redelivery**: uncommitted offsets are replayed after a restart or rebalance
//! - **Producer retries**: the same record can land on a topic twice
//! - **Downstream noise**: every replay would re-trigger the merge-and-send path
//!
//! ## Solution
//!
//! - Fingerprint each record by content (SHA-256 of canonical JSON)
//! - `EXISTS processed:<fingerprint>` before processing
//! - `SETEX processed:<fingerprint> <ttl> <metadata>` after processing
//!
//! ## Architecture
//!
//! ```text
//! Kafka → Consumer → IdempotencyGuard → Business Logic → Commit
//!                         ↓
//!                    (Check/Store)
//!                         ↓
//!                       Redis
//!              (processed:<fp>, TTL)
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use idempotent_consumer::{Fingerprint, IdempotencyGuard, InMemoryDedupStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(record: serde_json::Value) {
//! let guard = IdempotencyGuard::new(Arc::new(InMemoryDedupStore::new()), Duration::from_secs(86400));
//!
//! let fp = Fingerprint::of(&record);
//! if guard.is_duplicate(&fp).await {
//!     return;
//! }
//!
//! // Business logic here
//!
//! guard
//!     .mark_processed(&fp, Some(&serde_json::json!({"topic": "customer_data"})))
//!     .await;
//! # }
//! ```
//!
//! ## Failure Semantics
//!
//! The guard never returns errors to the consumer:
//!
//! - `is_duplicate` **fails open**: a store error is logged and the message is
//!   treated as new. An unreachable Redis must not stall ingestion.
//! - `mark_processed` returns `false` on a store error. The message still
//!   counts as delivered; only the dedup record is not guaranteed.
//!
//! ## Design Trade-offs
//!
//! - The TTL bounds the dedup window. A record replayed after its key expired
//!   is processed again.
//! - Fingerprints are content-based: two distinct messages with identical
//!   payloads are deduplicated against each other.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

mod error;
pub mod fingerprint;
pub mod store;

pub use error::{IdempotencyError, IdempotencyResult};
pub use fingerprint::{canonical_json, Fingerprint};
pub use store::{DedupStore, InMemoryDedupStore, RedisDedupStore};

/// Key prefix for processed-message markers
pub const PROCESSED_KEY_PREFIX: &str = "processed:";

/// Value stored when no metadata is supplied
const DEFAULT_MARKER_VALUE: &str = "processed";

/// Dedup store key for a fingerprint: `processed:<hex>`
pub fn processed_key(fingerprint: &Fingerprint) -> String {
    format!("{}{}", PROCESSED_KEY_PREFIX, fingerprint)
}

/// Idempotency guard for Kafka message processing
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn DedupStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    /// Create a new idempotency guard
    ///
    /// * `store` - Deduplication store backend
    /// * `ttl` - How long a processed marker suppresses replays
    pub fn new(store: Arc<dyn DedupStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fingerprint a decoded record
    pub fn fingerprint(&self, record: &Value) -> Fingerprint {
        Fingerprint::of(record)
    }

    /// Check whether a fingerprint was already processed
    ///
    /// Returns `false` when the store cannot be reached (fail open).
    pub async fn is_duplicate(&self, fingerprint: &Fingerprint) -> bool {
        match self.store.exists(&processed_key(fingerprint)).await {
            Ok(exists) => {
                if exists {
                    debug!(fingerprint = %fingerprint.short(), "Fingerprint already processed");
                }
                exists
            }
            Err(e) => {
                error!(
                    fingerprint = %fingerprint.short(),
                    transient = e.is_transient(),
                    "Dedup store error checking duplicate, treating as new: {}",
                    e
                );
                false
            }
        }
    }

    /// Mark a fingerprint as processed for the configured TTL
    ///
    /// `metadata` is stored as the key's JSON value (e.g. topic and key of the
    /// source message). Returns `false` if the marker could not be written.
    pub async fn mark_processed(&self, fingerprint: &Fingerprint, metadata: Option<&Value>) -> bool {
        let value = match metadata {
            Some(meta) => match serde_json::to_string(meta) {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to serialize dedup metadata: {}", e);
                    DEFAULT_MARKER_VALUE.to_string()
                }
            },
            None => DEFAULT_MARKER_VALUE.to_string(),
        };

        match self
            .store
            .set_with_expiry(&processed_key(fingerprint), &value, self.ttl)
            .await
        {
            Ok(()) => {
                debug!(
                    fingerprint = %fingerprint.short(),
                    ttl_secs = self.ttl.as_secs(),
                    "Fingerprint marked as processed"
                );
                true
            }
            Err(e) => {
                error!(
                    fingerprint = %fingerprint.short(),
                    "Dedup store error marking as processed: {}",
                    e
                );
                false
            }
        }
    }
}
