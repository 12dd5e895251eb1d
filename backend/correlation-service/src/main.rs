//! Correlation Service - Main entry point
//!
//! Runs the consumption loop until SIGINT/SIGTERM, alongside a small HTTP
//! server for health checks and Prometheus metrics.

use anyhow::{Context, Result};
use correlation_service::http::{build_server, HealthState};
use correlation_service::{
    shutdown, AnalyticsClient, Config, CorrelationConsumer, KafkaSource, TopicRouter,
};
use idempotent_consumer::{IdempotencyGuard, RedisDedupStore};
use redis_utils::RedisPool;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info,correlation_service=debug,rdkafka=warn";

/// Value of `--log-level <LEVEL>`, if given
fn log_level_from_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    args.windows(2)
        .find(|pair| pair[0] == "--log-level")
        .map(|pair| pair[1].to_lowercase())
}

/// `RUST_LOG` wins; otherwise `--log-level` or the default filter
fn init_tracing() {
    let default_filter = log_level_from_args()
        .map(|level| format!("{},rdkafka=warn", level))
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting correlation-service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Dedup store connects on first command; while Redis is unreachable the
    // guard fails open and ingestion continues
    let pool = RedisPool::open(&config.redis()).context("Failed to create Redis client")?;
    info!("Dedup store: redis://{}", pool.label());

    let store = RedisDedupStore::new(pool).with_command_timeout(config.redis_command_timeout());
    let guard = IdempotencyGuard::new(Arc::new(store), config.dedup_ttl());
    info!("Dedup window: {:?}", guard.ttl());

    let kafka_config = config.kafka();
    let source = KafkaSource::new(&kafka_config).context("Failed to create Kafka consumer")?;
    let sink = AnalyticsClient::new(config.analytics()).context("Failed to create analytics client")?;
    let router = TopicRouter::new(
        kafka_config.customer_topic.clone(),
        kafka_config.inventory_topic.clone(),
    );

    let mut consumer = CorrelationConsumer::new(
        Box::new(source),
        guard,
        Box::new(sink),
        router,
        config.poll_timeout(),
    );

    let health = Arc::new(HealthState::default());
    let server = build_server(config.http_port, health.clone())
        .with_context(|| format!("Failed to bind HTTP server on port {}", config.http_port))?;
    let server_handle = server.handle();
    actix_web::rt::spawn(server);
    info!("Health and metrics endpoints listening on port {}", config.http_port);

    let (trigger, shutdown) = shutdown::channel();
    actix_web::rt::spawn(shutdown::listen_for_signals(trigger));

    health.set_ready(true);
    let stats = consumer.run(shutdown).await;
    health.set_ready(false);

    server_handle.stop(true).await;

    info!(
        "Correlation service stopped: consumed={}, processed={}, duplicates={}, errors={}",
        stats.total_consumed, stats.successfully_processed, stats.duplicates_skipped, stats.errors
    );

    Ok(())
}
