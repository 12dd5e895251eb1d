/// Retry policy with exponential backoff
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff between attempts is `backoff_unit × backoff_base ^ attempt`, with
/// `attempt` counted from 1. There is no jitter and no cap: the caller picks
/// `max_attempts` and `backoff_base` to bound the worst-case wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Base of the exponential backoff
    pub backoff_base: f64,
    /// Time unit the backoff is expressed in
    pub backoff_unit: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, backoff_base: f64, backoff_unit: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
            backoff_unit,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_base.powi(attempt.min(i32::MAX as u32) as i32);
        Duration::try_from_secs_f64(self.backoff_unit.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX)
    }

    /// Sum of every backoff a fully failing run would sleep
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .map(|attempt| self.backoff_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }
}

/// Execute a future with retry logic
///
/// The closure receives the 1-based attempt number. A `max_attempts` of zero
/// still runs the operation once.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt >= max_attempts {
                    warn!("Failed after {} attempts: {}", max_attempts, e);
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }

                let delay = config.backoff_for(attempt);
                info!(
                    "Attempt {}/{} failed, retrying in {:?}",
                    attempt, max_attempts, delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
