//! Pipeline services
//!
//! - Correlation: per-stream cache and snapshot merging
//! - Delivery: analytics sink client with retries
//! - Consumer: the consumption loop tying source, dedup, cache and sink together

pub mod consumer;
pub mod correlation;
pub mod delivery;

pub use consumer::{
    ConsumerState, ConsumerStats, CorrelationConsumer, DeliveryOutcome, PipelineError,
    PipelineOutcome,
};
pub use correlation::{
    CacheStats, CorrelationCache, EntityId, EntityKind, EntityRecord, MergedSnapshot,
    RecordError, SnapshotSummary,
};
pub use delivery::{AnalyticsClient, AnalyticsConfig, DeliveryError, SnapshotSink};
