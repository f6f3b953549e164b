// shared-types-rs/src/deadline.rs
// Bounded deadlines around store calls. There is no retry here: a call that
// overruns surfaces as `StoreError::Timeout` and the caller decides.

use std::future::Future;
use std::time::Duration;

use crate::repository::{StoreError, StoreResult};

pub async fn with_deadline<T, F>(timeout: Duration, operation: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "store call timed out");
            Err(StoreError::Timeout {
                operation,
                timeout_ms: timeout.as_millis(),
            })
        }
    }
}
