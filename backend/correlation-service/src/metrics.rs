//! Prometheus metrics for the correlation pipeline
use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, TextEncoder};

use crate::services::CacheStats;

static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "correlation_messages_total",
            "Messages consumed, by pipeline outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create correlation_messages_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register correlation_messages_total");
    counter
});

static DELIVERY_ATTEMPTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "correlation_delivery_attempts_total",
            "Individual POST attempts to the analytics sink",
        ),
        &["result"],
    )
    .expect("failed to create correlation_delivery_attempts_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register correlation_delivery_attempts_total");
    counter
});

static DELIVERIES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "correlation_deliveries_total",
            "Snapshot deliveries after retries",
        ),
        &["result"],
    )
    .expect("failed to create correlation_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register correlation_deliveries_total");
    counter
});

static CACHE_ENTRIES: Lazy<IntGaugeVec> = Lazy::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "correlation_cache_entries",
            "Records waiting in the correlation cache",
        ),
        &["kind"],
    )
    .expect("failed to create correlation_cache_entries");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register correlation_cache_entries");
    gauge
});

pub fn record_message(outcome: &str) {
    MESSAGES_TOTAL.with_label_values(&[outcome]).inc();
}

/// `result` is `success`, `rejected` or `error`
pub fn record_delivery_attempt(result: &str) {
    DELIVERY_ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
}

pub fn record_delivery(delivered: bool) {
    let label = if delivered { "delivered" } else { "failed" };
    DELIVERIES_TOTAL.with_label_values(&[label]).inc();
}

pub fn set_cache_entries(stats: CacheStats) {
    CACHE_ENTRIES
        .with_label_values(&["customer"])
        .set(stats.customers_cached as i64);
    CACHE_ENTRIES
        .with_label_values(&["inventory"])
        .set(stats.inventory_cached as i64);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_registered_once_used() {
        record_message("processed");
        record_delivery_attempt("success");
        record_delivery(true);
        set_cache_entries(CacheStats {
            customers_cached: 2,
            inventory_cached: 1,
        });

        let names: Vec<String> = prometheus::gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for expected in [
            "correlation_messages_total",
            "correlation_delivery_attempts_total",
            "correlation_deliveries_total",
            "correlation_cache_entries",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {}", expected);
        }
    }
}
