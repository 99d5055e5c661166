//! Time-limited remote invocation.
//!
//! A remote call is wrapped so that it resolves within a bounded duration.
//! When the limit elapses the original call is abandoned; a late success is
//! ignored. A timeout is never fatal at the mutator boundary — the queued
//! entry stays in place for later replay.

use std::future::Future;
use std::time::Duration;
use tether_engine::{Error, Result};

/// Run `fut` to completion within `limit`.
pub async fn within<T>(
    limit: Duration,
    method: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            method: method.to_string(),
            limit_ms: limit.as_millis() as u64,
        }),
    }
}
