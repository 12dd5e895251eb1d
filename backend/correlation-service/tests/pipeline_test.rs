//! End-to-end tests of the consumption loop
//!
//! A scripted message source replays a fixed sequence and fires shutdown once
//! exhausted; dedup runs against the in-memory store and the analytics sink is
//! a wiremock server.

use async_trait::async_trait;
use correlation_service::kafka::{BrokerError, InboundMessage, MessageHandle, MessageSource};
use correlation_service::services::{AnalyticsConfig, CacheStats, ConsumerState, ConsumerStats};
use correlation_service::shutdown::{self, Shutdown, ShutdownTrigger};
use correlation_service::{AnalyticsClient, CorrelationConsumer, TopicRouter};
use idempotent_consumer::{IdempotencyGuard, InMemoryDedupStore, RedisDedupStore};
use redis_utils::{RedisPool, RedisSettings};
use resilience::RetryConfig;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CUSTOMER_TOPIC: &str = "customer_data";
const INVENTORY_TOPIC: &str = "inventory_data";
const ENDPOINT: &str = "/api/analytics/data";

enum Step {
    Message(InboundMessage),
    Error(BrokerError),
}

struct ScriptedSource {
    script: VecDeque<Step>,
    trigger: ShutdownTrigger,
    fail_commits: bool,
    commits: Arc<Mutex<Vec<MessageHandle>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn poll(&mut self, timeout: Duration) -> Option<Result<InboundMessage, BrokerError>> {
        match self.script.pop_front() {
            Some(Step::Message(message)) => Some(Ok(message)),
            Some(Step::Error(e)) => Some(Err(e)),
            None => {
                self.trigger.trigger();
                tokio::time::sleep(timeout).await;
                None
            }
        }
    }

    fn commit(&mut self, handle: &MessageHandle) -> Result<(), BrokerError> {
        if self.fail_commits {
            return Err(BrokerError::Other("commit rejected".to_string()));
        }
        self.commits.lock().unwrap().push(handle.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Pipeline {
    server: MockServer,
    store: Arc<InMemoryDedupStore>,
    commits: Arc<Mutex<Vec<MessageHandle>>>,
    closed: Arc<AtomicUsize>,
    consumer: CorrelationConsumer,
    stats: ConsumerStats,
}

impl Pipeline {
    async fn posted_bodies(&self) -> Vec<Value> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|req| serde_json::from_slice(&req.body).unwrap())
            .collect()
    }

    fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }
}

fn customer(offset: i64, payload: Value) -> Step {
    message(CUSTOMER_TOPIC, offset, payload.to_string())
}

fn inventory(offset: i64, payload: Value) -> Step {
    message(INVENTORY_TOPIC, offset, payload.to_string())
}

fn message(topic: &str, offset: i64, payload: String) -> Step {
    Step::Message(InboundMessage {
        topic: topic.to_string(),
        key: Some(format!("key-{}", offset).into_bytes()),
        payload: payload.into_bytes(),
        handle: MessageHandle::new(topic, 0, offset),
    })
}

/// Mock analytics server answering every POST with `status`
async fn analytics_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

/// Consumer over a scripted source, plus the handles tests inspect
fn scripted_consumer(
    server: &MockServer,
    steps: Vec<Step>,
    fail_commits: bool,
    guard: IdempotencyGuard,
) -> (
    CorrelationConsumer,
    Shutdown,
    Arc<Mutex<Vec<MessageHandle>>>,
    Arc<AtomicUsize>,
) {
    let (trigger, shutdown) = shutdown::channel();
    let commits = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicUsize::new(0));
    let source = ScriptedSource {
        script: steps.into_iter().collect(),
        trigger,
        fail_commits,
        commits: commits.clone(),
        closed: closed.clone(),
    };

    let sink = AnalyticsClient::new(AnalyticsConfig {
        url: format!("{}{}", server.uri(), ENDPOINT),
        request_timeout: Duration::from_secs(2),
        retry: RetryConfig::new(2, 2.0, Duration::from_millis(1)),
    })
    .unwrap();

    let consumer = CorrelationConsumer::new(
        Box::new(source),
        guard,
        Box::new(sink),
        TopicRouter::new(CUSTOMER_TOPIC, INVENTORY_TOPIC),
        Duration::from_millis(10),
    );

    (consumer, shutdown, commits, closed)
}

async fn run_to_completion(consumer: &mut CorrelationConsumer, shutdown: Shutdown) -> ConsumerStats {
    tokio::time::timeout(Duration::from_secs(10), consumer.run(shutdown))
        .await
        .expect("consumption loop should stop once the script is exhausted")
}

/// Run the loop over `steps` against a sink answering `status`
async fn run_pipeline(steps: Vec<Step>, status: u16, fail_commits: bool) -> Pipeline {
    let server = analytics_server(status).await;
    let store = Arc::new(InMemoryDedupStore::new());
    let guard = IdempotencyGuard::new(store.clone(), Duration::from_secs(3600));

    let (mut consumer, shutdown, commits, closed) =
        scripted_consumer(&server, steps, fail_commits, guard);
    let stats = run_to_completion(&mut consumer, shutdown).await;

    Pipeline {
        server,
        store,
        commits,
        closed,
        consumer,
        stats,
    }
}

#[tokio::test]
async fn test_customer_and_inventory_are_merged_and_delivered() {
    let p = run_pipeline(
        vec![
            customer(0, json!({"id": "C1", "name": "Ann", "email": "a@x.com"})),
            inventory(0, json!({"id": "I1", "name": "Widget", "stock": 5})),
        ],
        200,
        false,
    )
    .await;

    let bodies = p.posted_bodies().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(
        bodies[0]["customers"],
        json!([{"id": "C1", "name": "Ann", "email": "a@x.com"}])
    );
    assert_eq!(
        bodies[0]["inventory"],
        json!([{"id": "I1", "name": "Widget", "stock": 5}])
    );
    assert_eq!(
        bodies[0]["summary"],
        json!({"total_customers": 1, "total_products": 1})
    );

    assert_eq!(p.consumer.cache_stats(), CacheStats::default());
    assert_eq!(
        p.stats,
        ConsumerStats {
            total_consumed: 2,
            duplicates_skipped: 0,
            successfully_processed: 2,
            errors: 0,
        }
    );
    assert_eq!(p.commit_count(), 2);
    assert_eq!(p.store.len().await, 2);
    assert_eq!(p.consumer.state(), ConsumerState::Stopped);
    assert_eq!(p.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_duplicate_record_is_acked_but_not_reprocessed() {
    let record = json!({"id": "C1", "name": "Ann"});
    let p = run_pipeline(
        vec![customer(0, record.clone()), customer(1, record)],
        200,
        false,
    )
    .await;

    assert_eq!(p.stats.duplicates_skipped, 1);
    assert_eq!(p.stats.successfully_processed, 1);
    assert_eq!(p.store.write_count(), 1);
    assert_eq!(p.commit_count(), 2);

    // Only the shutdown flush reaches the sink, with a single customer
    let bodies = p.posted_bodies().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["summary"]["total_customers"], 1);
}

#[tokio::test]
async fn test_record_without_id_is_acked_and_skipped() {
    let p = run_pipeline(
        vec![inventory(0, json!({"name": "NoId"}))],
        200,
        false,
    )
    .await;

    assert_eq!(p.stats.successfully_processed, 1);
    assert_eq!(p.stats.errors, 0);
    assert_eq!(p.commit_count(), 1);
    assert!(p.consumer.cache_stats().is_empty());
    assert!(p.posted_bodies().await.is_empty());
}

#[tokio::test]
async fn test_invalid_json_is_acked_and_counted_as_error() {
    let p = run_pipeline(
        vec![
            message(CUSTOMER_TOPIC, 0, "{not json".to_string()),
            message(INVENTORY_TOPIC, 0, String::new()),
        ],
        200,
        false,
    )
    .await;

    assert_eq!(p.stats.total_consumed, 2);
    assert_eq!(p.stats.errors, 2);
    assert_eq!(p.commit_count(), 2);
    assert!(p.store.is_empty().await);
}

#[tokio::test]
async fn test_unknown_topic_is_acked_without_caching() {
    let p = run_pipeline(
        vec![message("orders", 0, json!({"id": "O1"}).to_string())],
        200,
        false,
    )
    .await;

    assert_eq!(p.stats.successfully_processed, 1);
    assert_eq!(p.stats.errors, 0);
    assert_eq!(p.commit_count(), 1);
    assert!(p.posted_bodies().await.is_empty());
}

#[tokio::test]
async fn test_failed_delivery_keeps_cache_for_next_merge() {
    let p = run_pipeline(
        vec![
            customer(0, json!({"id": "C1"})),
            inventory(0, json!({"id": "I1"})),
            inventory(1, json!({"id": "I2"})),
        ],
        503,
        false,
    )
    .await;

    // Two merges while running plus the shutdown flush, two attempts each
    assert_eq!(p.posted_bodies().await.len(), 6);
    assert_eq!(
        p.consumer.cache_stats(),
        CacheStats {
            customers_cached: 1,
            inventory_cached: 2,
        }
    );

    let bodies = p.posted_bodies().await;
    assert_eq!(bodies[2]["summary"]["total_products"], 2);
    assert_eq!(p.stats.successfully_processed, 3);
}

#[tokio::test]
async fn test_shutdown_flushes_one_sided_cache() {
    let p = run_pipeline(
        vec![
            inventory(0, json!({"id": "I1", "stock": 3})),
            inventory(1, json!({"id": "I2", "stock": 0})),
        ],
        202,
        false,
    )
    .await;

    let bodies = p.posted_bodies().await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["customers"], json!([]));
    assert_eq!(
        bodies[0]["summary"],
        json!({"total_customers": 0, "total_products": 2})
    );
    assert!(p.consumer.cache_stats().is_empty());
}

#[tokio::test]
async fn test_broker_errors_are_skipped_without_ack() {
    let p = run_pipeline(
        vec![
            Step::Error(BrokerError::PartitionEof { partition: 0 }),
            Step::Error(BrokerError::Other("broker down".to_string())),
            customer(0, json!({"id": "C1"})),
        ],
        200,
        false,
    )
    .await;

    assert_eq!(p.stats.total_consumed, 1);
    assert_eq!(p.stats.errors, 0);
    assert_eq!(p.commit_count(), 1);
}

#[tokio::test]
async fn test_ack_failure_is_counted_as_error() {
    let p = run_pipeline(vec![customer(0, json!({"id": "C1"}))], 200, true).await;

    assert_eq!(p.stats.total_consumed, 1);
    assert_eq!(p.stats.successfully_processed, 0);
    assert_eq!(p.stats.errors, 1);
}

#[tokio::test]
async fn test_unreachable_redis_does_not_stop_ingestion() {
    let server = analytics_server(200).await;
    let pool = RedisPool::open(&RedisSettings::new("127.0.0.1", 1, 0, None))
        .unwrap()
        .with_connect_timeout(Duration::from_millis(200));
    let store = RedisDedupStore::new(pool).with_command_timeout(Duration::from_millis(200));
    let guard = IdempotencyGuard::new(Arc::new(store), Duration::from_secs(3600));

    let (mut consumer, shutdown, commits, _closed) = scripted_consumer(
        &server,
        vec![
            customer(0, json!({"id": "C1", "name": "Ann", "email": "a@x.com"})),
            inventory(0, json!({"id": "I1", "name": "Widget", "stock": 5})),
        ],
        false,
        guard,
    );
    let stats = run_to_completion(&mut consumer, shutdown).await;

    assert_eq!(stats.successfully_processed, 2);
    assert_eq!(stats.duplicates_skipped, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(commits.lock().unwrap().len(), 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(
        body["summary"],
        json!({"total_customers": 1, "total_products": 1})
    );
}
