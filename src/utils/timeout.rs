//! Async timeout wrappers and the timeout constants shared across the crate.

use crate::error::{GateError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for individual socket operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Disconnect after this long without inbound bytes
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for graceful listener shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a standard-priority frame may wait for the handler gate
pub const SHED_TIMEOUT: Duration = Duration::from_millis(400);

/// Rolling admission-control window
pub const ADMISSION_WINDOW: Duration = Duration::from_secs(60);

/// Run a future with a deadline, mapping expiry to `GateError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(GateError::Timeout),
    }
}
