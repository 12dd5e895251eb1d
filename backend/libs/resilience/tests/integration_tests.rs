/// Integration tests for resilience library
use resilience::{with_retry, with_timeout_result, RetryConfig, TimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ==================== Retry Tests ====================

#[tokio::test]
async fn test_fails_twice_then_succeeds_with_exponential_waits() {
    // 3 attempts, base 2, unit 10ms: waits 2^1 + 2^2 = 6 units = 60ms
    let config = RetryConfig::new(3, 2.0, Duration::from_millis(10));
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let start = Instant::now();
    let result = with_retry(&config, move |_| {
        let count = counter_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            if count < 2 {
                Err("temporary error")
            } else {
                Ok("delivered")
            }
        }
    })
    .await;
    let elapsed = start.elapsed();

    assert_eq!(result.unwrap(), "delivered");
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(elapsed >= Duration::from_millis(60));
    assert!(elapsed < Duration::from_millis(1000));
}

#[tokio::test]
async fn test_no_wait_after_final_attempt() {
    // 2 attempts: only the wait after attempt 1 (2 units = 100ms) is slept
    let config = RetryConfig::new(2, 2.0, Duration::from_millis(50));

    let start = Instant::now();
    let result = with_retry(&config, |_| async { Err::<(), _>("down") }).await;
    let elapsed = start.elapsed();

    assert_eq!(result.unwrap_err().attempts(), 2);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(300));
}

// ==================== Timeout + Retry Composition ====================

#[tokio::test]
async fn test_timed_out_attempts_are_retried() {
    let config = RetryConfig::new(3, 1.0, Duration::from_millis(1));
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let result = with_retry(&config, move |attempt| {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        with_timeout_result(Duration::from_millis(20), async move {
            if attempt == 1 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok::<_, String>(attempt)
        })
    })
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_exhausted_error_reports_timeout() {
    let config = RetryConfig::new(2, 1.0, Duration::from_millis(1));

    let result = with_retry(&config, |_| {
        with_timeout_result(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), String>(())
        })
    })
    .await;

    let last = result.unwrap_err().into_last_error();
    assert!(matches!(last, TimeoutError::Elapsed(_)));
}
