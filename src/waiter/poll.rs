//! ST-013: Poll loop.
//!
//! Attempts happen at `t = 0, d, 2d, ...`. After a non-terminal attempt at
//! `t`, the loop gives up if `t + d` would exceed the budget.

use super::policy::{format_duration, BackoffPolicy};
use super::status::{Classification, Classify};
use super::Target;
use crate::error::{ApiError, ErrorKind, WaitError};
use std::fmt;
use std::future::Future;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// What a not-found error means for this particular wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnNotFound {
    /// Creation wait: the entity may not be visible yet.
    Retry,
    /// Deletion wait: the entity is confirmed gone.
    Succeed,
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    Failure(String),
    Cancelled,
    TimedOut,
}

impl fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Failure(reason) => write!(f, "Failed: {reason}"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

impl PollOutcome {
    /// Turn a non-success outcome into the matching error.
    pub fn into_result(self, target: &Target, policy: &BackoffPolicy) -> Result<(), WaitError> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(reason) => Err(WaitError::Failed {
                target: target.clone(),
                reason,
            }),
            Self::Cancelled => Err(WaitError::Failed {
                target: target.clone(),
                reason: "operation was cancelled".to_string(),
            }),
            Self::TimedOut => Err(WaitError::TimedOut {
                target: target.clone(),
                timeout: policy.max_total_duration,
            }),
        }
    }
}

/// Call `describe` until it reports a terminal status or the budget runs out.
///
/// Retryable API errors are absorbed. Non-retryable errors end the loop.
pub async fn poll<S, F, Fut>(
    target: &Target,
    on_not_found: OnNotFound,
    policy: BackoffPolicy,
    mut describe: F,
) -> Result<PollOutcome, WaitError>
where
    S: Classify + fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, ApiError>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match describe().await {
            Ok(status) => match status.classify() {
                Classification::Success => {
                    debug!(resource = %target, attempt, ?status, "reached success state");
                    return Ok(PollOutcome::Success);
                }
                Classification::Failure(reason) => {
                    debug!(resource = %target, attempt, ?status, "reached failure state");
                    return Ok(PollOutcome::Failure(reason));
                }
                Classification::Cancelled => {
                    debug!(resource = %target, attempt, ?status, "reached cancelled state");
                    return Ok(PollOutcome::Cancelled);
                }
                Classification::InProgress => {
                    debug!(resource = %target, attempt, ?status, "still in progress");
                }
            },
            Err(e) => match e.kind() {
                ErrorKind::NotFound => match on_not_found {
                    OnNotFound::Succeed => {
                        debug!(resource = %target, attempt, "no longer exists");
                        return Ok(PollOutcome::Success);
                    }
                    OnNotFound::Retry => {
                        debug!(resource = %target, attempt, code = %e.code, "not visible yet");
                    }
                },
                ErrorKind::Retryable => {
                    warn!(resource = %target, attempt, error = %e, "transient error while polling");
                }
                ErrorKind::NonRetryable => {
                    return Err(WaitError::Api {
                        target: target.clone(),
                        source: e,
                    });
                }
            },
        }

        let elapsed = start.elapsed();
        let delay = policy.initial_delay;
        if delay.is_zero() || elapsed + delay > policy.max_total_duration {
            warn!(
                resource = %target,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "gave up waiting after {}",
                format_duration(&policy.max_total_duration)
            );
            return Ok(PollOutcome::TimedOut);
        }
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn target() -> Target {
        Target::new("test_resource", ["a", "b"])
    }

    fn policy(delay: u64, max: u64) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(delay), Duration::from_secs(max))
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_success_stops_immediately() {
        let mut calls = 0;
        let out = poll(&target(), OnNotFound::Retry, policy(5, 60), || {
            calls += 1;
            async { Ok::<_, ApiError>(Classification::Success) }
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::Success);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_in_progress_then_success() {
        let mut calls = 0;
        let start = Instant::now();
        let out = poll(&target(), OnNotFound::Retry, policy(5, 600), || {
            calls += 1;
            let status = if calls <= 4 {
                Classification::InProgress
            } else {
                Classification::Success
            };
            async move { Ok::<_, ApiError>(status) }
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::Success);
        assert_eq!(calls, 5);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_never_terminal_times_out_once() {
        let mut calls = 0;
        let out = poll(&target(), OnNotFound::Retry, policy(10, 60), || {
            calls += 1;
            async { Ok::<_, ApiError>(Classification::InProgress) }
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::TimedOut);
        // t = 0, 10, ..., 60
        assert_eq!(calls, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_zero_delay_single_attempt() {
        let mut calls = 0;
        let out = poll(&target(), OnNotFound::Retry, policy(0, 60), || {
            calls += 1;
            async { Ok::<_, ApiError>(Classification::InProgress) }
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::TimedOut);
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_not_found_on_delete_is_success() {
        let out = poll(&target(), OnNotFound::Succeed, policy(5, 60), || async {
            Err::<Classification, _>(ApiError::not_found("Describe", "gone"))
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_not_found_on_create_retries_until_timeout() {
        let mut calls = 0;
        let out = poll(&target(), OnNotFound::Retry, policy(5, 20), || {
            calls += 1;
            async { Err::<Classification, _>(ApiError::not_found("Describe", "not yet")) }
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::TimedOut);
        assert_eq!(calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_retryable_absorbed() {
        let mut calls = 0;
        let out = poll(&target(), OnNotFound::Retry, policy(1, 60), || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(ApiError::new("Describe", "ThrottlingException", "slow down"))
                } else {
                    Ok(Classification::Success)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::Success);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_fatal_error_propagates_with_target() {
        let err = poll(&target(), OnNotFound::Retry, policy(1, 60), || async {
            Err::<Classification, _>(ApiError::new("Describe", "AccessDeniedException", "no"))
        })
        .await
        .unwrap_err();
        match err {
            WaitError::Api { target: t, source } => {
                assert_eq!(t, target());
                assert_eq!(source.code, "AccessDeniedException");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_st013_failure_reason_surfaces() {
        let out = poll(&target(), OnNotFound::Retry, policy(1, 60), || async {
            Ok::<_, ApiError>(Classification::Failure("CREATE_FAILED: subnet".into()))
        })
        .await
        .unwrap();
        let err = out.into_result(&target(), &policy(1, 60)).unwrap_err();
        assert!(err.to_string().contains("CREATE_FAILED: subnet"));
    }
}
