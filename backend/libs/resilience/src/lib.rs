//! Resilience helpers shared by the pipeline services
//!
//! - **Retry**: bounded attempts with exponential backoff (`unit × base^attempt`)
//! - **Timeout**: time limits on external calls that keep the call's own error
//!
//! # Example: retry a flaky call
//!
//! ```rust,no_run
//! use resilience::{with_retry, RetryConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RetryConfig::new(3, 2.0, Duration::from_secs(1));
//!
//!     let result = with_retry(&config, |attempt| async move {
//!         // Your HTTP call here
//!         if attempt < 3 { Err("not yet") } else { Ok(attempt) }
//!     })
//!     .await;
//! }
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, RetryConfig, RetryError};
pub use timeout::{with_timeout_result, TimeoutError};
