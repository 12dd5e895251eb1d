//! Consumption loop
//!
//! Pulls messages from both input topics, drops duplicates, feeds the
//! correlation cache and ships merged snapshots to the analytics sink. Every
//! message is acknowledged once handled, whatever the outcome.

use idempotent_consumer::IdempotencyGuard;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::correlation::{CacheStats, CorrelationCache, EntityKind};
use super::delivery::SnapshotSink;
use crate::kafka::{InboundMessage, MessageSource, Topic, TopicRouter};
use crate::metrics;
use crate::shutdown::Shutdown;

/// Stats are logged every this many consumed messages
const STATS_LOG_INTERVAL: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub total_consumed: u64,
    pub duplicates_skipped: u64,
    pub successfully_processed: u64,
    pub errors: u64,
}

/// What happened to the merge attempt that followed a cache update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No merge was attempted, or one side of the cache was still empty
    NotReady,
    Delivered,
    /// Sink refused after all retries; the cache was kept
    Failed,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Result of running one message through the pipeline, before acknowledgement
#[derive(Debug)]
pub enum PipelineOutcome {
    Processed {
        topic: Topic,
        /// Whether the record made it into the cache
        cached: bool,
        delivery: DeliveryOutcome,
    },
    Duplicate,
    Failed(PipelineError),
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Processed { .. } => "processed",
            PipelineOutcome::Duplicate => "duplicate",
            PipelineOutcome::Failed(_) => "error",
        }
    }
}

pub struct CorrelationConsumer {
    source: Box<dyn MessageSource>,
    guard: IdempotencyGuard,
    cache: CorrelationCache,
    sink: Box<dyn SnapshotSink>,
    router: TopicRouter,
    poll_timeout: Duration,
    stats: ConsumerStats,
    state: ConsumerState,
}

impl CorrelationConsumer {
    pub fn new(
        source: Box<dyn MessageSource>,
        guard: IdempotencyGuard,
        sink: Box<dyn SnapshotSink>,
        router: TopicRouter,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            guard,
            cache: CorrelationCache::new(),
            sink,
            router,
            poll_timeout,
            stats: ConsumerStats::default(),
            state: ConsumerState::Idle,
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Consume until `shutdown` fires, then flush and close the source.
    ///
    /// The in-flight message is always finished before the token is checked
    /// again; only the idle poll wait is interrupted.
    pub async fn run(&mut self, mut shutdown: Shutdown) -> ConsumerStats {
        self.state = ConsumerState::Running;
        info!("Starting consumption loop on topics {:?}", self.router.topics());

        while !shutdown.is_triggered() {
            let polled = tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                polled = self.source.poll(self.poll_timeout) => polled,
            };

            match polled {
                None => continue,
                Some(Err(e)) if e.is_partition_eof() => debug!("{}", e),
                Some(Err(e)) => error!("Consumer error: {}", e),
                Some(Ok(message)) => self.handle_message(message).await,
            }
        }

        self.shutdown().await;
        self.stats
    }

    /// Run one message through the pipeline and acknowledge it
    async fn handle_message(&mut self, message: InboundMessage) {
        self.stats.total_consumed += 1;

        let outcome = self.process_message(&message).await;
        if let PipelineOutcome::Failed(e) = &outcome {
            error!("Error processing message {}: {}", message.handle, e);
        }

        match self.source.commit(&message.handle) {
            Ok(()) => {
                match &outcome {
                    PipelineOutcome::Processed { .. } => self.stats.successfully_processed += 1,
                    PipelineOutcome::Duplicate => self.stats.duplicates_skipped += 1,
                    PipelineOutcome::Failed(_) => self.stats.errors += 1,
                }
                metrics::record_message(outcome.label());
            }
            Err(e) => {
                error!("Failed to acknowledge message {}: {}", message.handle, e);
                self.stats.errors += 1;
                metrics::record_message("ack_failed");
            }
        }

        if self.stats.total_consumed % STATS_LOG_INTERVAL == 0 {
            self.log_stats();
        }
    }

    /// Decode, deduplicate, cache and maybe deliver one message.
    ///
    /// Acknowledgement is left to the caller.
    pub async fn process_message(&mut self, message: &InboundMessage) -> PipelineOutcome {
        let key = message.key_str();
        info!(
            "[KAFKA RAW] {} | key={} | {}",
            message.topic,
            key.as_deref().unwrap_or("-"),
            String::from_utf8_lossy(&message.payload)
        );

        let data: Value = match serde_json::from_slice(&message.payload) {
            Ok(data) => data,
            Err(e) => return PipelineOutcome::Failed(PipelineError::InvalidJson(e)),
        };

        let fingerprint = self.guard.fingerprint(&data);
        if self.guard.is_duplicate(&fingerprint).await {
            info!(
                "Skipping duplicate message from {} (fingerprint {})",
                message.topic,
                fingerprint.short()
            );
            return PipelineOutcome::Duplicate;
        }

        let topic = self.router.classify(&message.topic);
        let kind = match topic {
            Topic::Customer => Some(EntityKind::Customer),
            Topic::Inventory => Some(EntityKind::Inventory),
            Topic::Unknown => {
                warn!("Received message from unknown topic: {}", message.topic);
                None
            }
        };

        let cached = match kind {
            Some(kind) => match self.cache.add(kind, &data) {
                Ok(id) => {
                    debug!("Cached {} record {}", topic, id);
                    true
                }
                Err(e) => {
                    warn!("Dropping {} record from correlation: {}", topic, e);
                    false
                }
            },
            None => false,
        };

        let delivery = if cached {
            self.deliver_if_ready().await
        } else {
            DeliveryOutcome::NotReady
        };
        metrics::set_cache_entries(self.cache.stats());

        let metadata = json!({ "topic": message.topic, "key": key });
        self.guard.mark_processed(&fingerprint, Some(&metadata)).await;

        PipelineOutcome::Processed {
            topic,
            cached,
            delivery,
        }
    }

    async fn deliver_if_ready(&mut self) -> DeliveryOutcome {
        let Some(snapshot) = self.cache.try_merge() else {
            return DeliveryOutcome::NotReady;
        };

        if self.sink.send(&snapshot).await {
            self.cache.clear();
            DeliveryOutcome::Delivered
        } else {
            let stats = self.cache.stats();
            warn!(
                "Delivery failed, keeping {} customers and {} products cached",
                stats.customers_cached, stats.inventory_cached
            );
            DeliveryOutcome::Failed
        }
    }

    /// Flush what is left in the cache and release the source. Safe to call
    /// more than once; only the first call has any effect.
    pub async fn shutdown(&mut self) {
        if matches!(
            self.state,
            ConsumerState::ShuttingDown | ConsumerState::Stopped
        ) {
            return;
        }
        self.state = ConsumerState::ShuttingDown;
        info!("Shutting down consumer");
        self.log_stats();

        if let Some(snapshot) = self.cache.merge() {
            info!(
                "Flushing {} customers and {} products before exit",
                snapshot.summary.total_customers, snapshot.summary.total_products
            );
            if self.sink.send(&snapshot).await {
                self.cache.clear();
                metrics::set_cache_entries(self.cache.stats());
            } else {
                error!("Final flush failed, cached records are lost");
            }
        }

        self.source.close();
        self.state = ConsumerState::Stopped;
        info!("Consumer stopped");
    }

    fn log_stats(&self) {
        let cache = self.cache.stats();
        info!(
            total_consumed = self.stats.total_consumed,
            duplicates_skipped = self.stats.duplicates_skipped,
            successfully_processed = self.stats.successfully_processed,
            errors = self.stats.errors,
            customers_cached = cache.customers_cached,
            inventory_cached = cache.inventory_cached,
            "Consumer stats"
        );
    }
}
