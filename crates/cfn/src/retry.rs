use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::source::{LiveResourceSnapshot, LiveStateSource, SourceError, StackOutputs};

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("live state source rejected credentials: {0}")]
    Unauthorized(String),
    #[error("live state source timed out {attempts} time(s) after {timeout:?} each")]
    Timeout { attempts: u32, timeout: Duration },
    #[error("live state source still failing after {attempts} attempt(s): {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("live state source failed: {0}")]
    Source(String),
    #[error("cannot derive live template: {0}")]
    Template(#[from] stackcheck_core::LoadError),
}

impl ReconciliationError {
    /// Retry exhaustion degrades a report; other errors abort it.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, ReconciliationError::Timeout { .. } | ReconciliationError::RetriesExhausted { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff: Duration,
    /// Bound on a single `describe` call.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, initial_backoff: Duration::from_millis(200), timeout: Duration::from_secs(30) }
    }
}

/// Describes the stack, retrying transient failures and timeouts with
/// exponential backoff.
pub async fn collect(
    source: &dyn LiveStateSource,
    outputs: &StackOutputs,
    retry: &RetryPolicy,
) -> Result<LiveResourceSnapshot, ReconciliationError> {
    let attempts = retry.attempts.max(1);
    let mut backoff = retry.initial_backoff;
    let mut last: Option<String> = None;
    for attempt in 1..=attempts {
        match tokio::time::timeout(retry.timeout, source.describe(outputs)).await {
            Ok(Ok(snapshot)) => return Ok(snapshot),
            Ok(Err(SourceError::Unauthorized(why))) => return Err(ReconciliationError::Unauthorized(why)),
            Ok(Err(SourceError::Other(why))) => return Err(ReconciliationError::Source(why)),
            Ok(Err(SourceError::Transient(why))) => {
                warn!(attempt, attempts, error = %why, "live state source failed; retrying");
                last = Some(why);
            }
            Err(_) => {
                warn!(attempt, attempts, timeout = ?retry.timeout, "live state source timed out; retrying");
                last = None;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }
    Err(match last {
        Some(last) => ReconciliationError::RetriesExhausted { attempts, last },
        None => ReconciliationError::Timeout { attempts, timeout: retry.timeout },
    })
}
