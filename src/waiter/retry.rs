//! ST-015: Retry helper for mutating calls.
//!
//! Same cadence as the poll loop, but the operation itself decides whether a
//! failure is worth another try. When the budget runs out, one final attempt
//! is made before giving up.

use super::policy::{format_duration, BackoffPolicy};
use super::Target;
use crate::error::{ApiError, ErrorKind, WaitError};
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// A failed attempt, tagged with whether it should be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Retryable(ApiError),
    Fatal(ApiError),
}

impl Attempt {
    pub fn into_inner(self) -> ApiError {
        match self {
            Self::Retryable(e) | Self::Fatal(e) => e,
        }
    }
}

/// Default tagging: throttling and transient faults retry, everything else is fatal.
impl From<ApiError> for Attempt {
    fn from(e: ApiError) -> Self {
        match e.kind() {
            ErrorKind::Retryable => Self::Retryable(e),
            ErrorKind::NotFound | ErrorKind::NonRetryable => Self::Fatal(e),
        }
    }
}

pub async fn retry<T, F, Fut>(
    target: &Target,
    policy: BackoffPolicy,
    mut op: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Attempt>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(source)) => {
                return Err(WaitError::Api {
                    target: target.clone(),
                    source,
                })
            }
            Err(Attempt::Retryable(e)) => {
                debug!(resource = %target, attempt, error = %e, "retryable failure");
            }
        }

        let elapsed = start.elapsed();
        let delay = policy.initial_delay;
        if delay.is_zero() || elapsed + delay > policy.max_total_duration {
            break;
        }
        sleep(delay).await;
    }

    warn!(
        resource = %target,
        attempt = attempt + 1,
        "retry budget of {} spent, making final attempt",
        format_duration(&policy.max_total_duration)
    );
    match op().await {
        Ok(value) => Ok(value),
        Err(Attempt::Fatal(source)) => Err(WaitError::Api {
            target: target.clone(),
            source,
        }),
        Err(Attempt::Retryable(last)) => Err(WaitError::RetriesExhausted {
            target: target.clone(),
            timeout: policy.max_total_duration,
            last,
        }),
    }
}
