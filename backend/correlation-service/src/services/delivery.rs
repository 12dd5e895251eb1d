//! Delivery of merged snapshots to the analytics HTTP endpoint
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use resilience::{with_retry, RetryConfig};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::correlation::MergedSnapshot;
use crate::error::Result;
use crate::metrics;

/// Statuses the analytics API answers on acceptance
const ACCEPTED_STATUSES: [StatusCode; 3] =
    [StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED];

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Full endpoint URL (base URL + path)
    pub url: String,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
}

/// Failure of a single delivery attempt
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("analytics API returned status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Destination for merged snapshots.
///
/// `send` reports whether the snapshot was accepted; the cache is only cleared
/// on `true`.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn send(&self, snapshot: &MergedSnapshot) -> bool;
}

/// HTTP client for the analytics API
pub struct AnalyticsClient {
    client: Client,
    config: AnalyticsConfig,
}

impl AnalyticsClient {
    pub fn new(config: AnalyticsConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        info!(
            "Analytics client initialized (url: {}, attempts: {}, backoff base: {}, worst-case wait: {:?})",
            config.url,
            config.retry.max_attempts,
            config.retry.backoff_base,
            config.retry.worst_case_wait()
        );

        Ok(Self { client, config })
    }

    async fn post_once(
        &self,
        snapshot: &MergedSnapshot,
        attempt: u32,
    ) -> std::result::Result<(), DeliveryError> {
        debug!(
            "Sending snapshot to {} (attempt {}/{})",
            self.config.url, attempt, self.config.retry.max_attempts
        );

        let response = match self.client.post(&self.config.url).json(snapshot).send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_delivery_attempt("error");
                return Err(DeliveryError::Transport(e));
            }
        };

        let status = response.status();
        if ACCEPTED_STATUSES.contains(&status) {
            metrics::record_delivery_attempt("success");
            return Ok(());
        }

        metrics::record_delivery_attempt("rejected");
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected { status, body })
    }
}

#[async_trait]
impl SnapshotSink for AnalyticsClient {
    async fn send(&self, snapshot: &MergedSnapshot) -> bool {
        let result = with_retry(&self.config.retry, |attempt| {
            self.post_once(snapshot, attempt)
        })
        .await;

        match result {
            Ok(()) => {
                info!(
                    "Snapshot delivered: {} customers, {} products",
                    snapshot.summary.total_customers, snapshot.summary.total_products
                );
                metrics::record_delivery(true);
                true
            }
            Err(e) => {
                let attempts = e.attempts();
                match e.into_last_error() {
                    DeliveryError::Rejected { status, .. } if status.is_client_error() => {
                        warn!(
                            "Analytics API rejected snapshot after {} attempts with status {}",
                            attempts, status
                        );
                    }
                    last => {
                        error!(
                            "Failed to send snapshot after {} attempts: {}",
                            attempts, last
                        );
                    }
                }
                metrics::record_delivery(false);
                false
            }
        }
    }
}
