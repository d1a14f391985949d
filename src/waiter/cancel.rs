//! ST-014: Timeout-triggered cancellation.

use super::poll::{poll, OnNotFound, PollOutcome};
use super::policy::BackoffPolicy;
use super::status::Classify;
use super::Target;
use crate::error::{ApiError, WaitError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Cancel the in-flight operation after its wait timed out.
///
/// Always produces an error: the first wait did not succeed, and the
/// operator needs to know whether the remote side was left running.
pub async fn on_timeout<C, CFut, P, PFut>(
    target: &Target,
    operation: &str,
    timeout: Duration,
    cancel: C,
    poll_after_cancel: P,
) -> WaitError
where
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<(), ApiError>>,
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<PollOutcome, WaitError>>,
{
    warn!(resource = %target, operation, "timed out, cancelling in-flight operation");

    if let Err(source) = cancel().await {
        return WaitError::CancelFailed {
            target: target.clone(),
            source,
        };
    }

    match poll_after_cancel().await {
        Ok(PollOutcome::TimedOut) => WaitError::CancelStuck {
            target: target.clone(),
        },
        Ok(outcome) => {
            info!(resource = %target, %outcome, "in-flight operation stopped");
            WaitError::CancelledAfterTimeout {
                target: target.clone(),
                operation: operation.to_string(),
                timeout,
                outcome,
            }
        }
        Err(e) => e,
    }
}

/// Poll to a terminal state; on timeout, cancel and wait for the cancellation.
pub async fn wait_or_cancel<S, D, DFut, C, CFut, P, PFut>(
    target: &Target,
    operation: &str,
    policy: BackoffPolicy,
    describe: D,
    cancel: C,
    poll_after_cancel: P,
) -> Result<PollOutcome, WaitError>
where
    S: Classify + fmt::Debug,
    D: FnMut() -> DFut,
    DFut: Future<Output = Result<S, ApiError>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<(), ApiError>>,
    P: FnOnce() -> PFut,
    PFut: Future<Output = Result<PollOutcome, WaitError>>,
{
    match poll(target, OnNotFound::Retry, policy, describe).await? {
        PollOutcome::TimedOut => Err(on_timeout(
            target,
            operation,
            policy.max_total_duration,
            cancel,
            poll_after_cancel,
        )
        .await),
        outcome => Ok(outcome),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waiter::Classification;

    fn target() -> Target {
        Target::new("aws_autoscaling_instance_refresh", ["web", "r-1"])
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(30), Duration::from_secs(45 * 60))
    }

    #[tokio::test(start_paused = true)]
    async fn test_st014_timeout_then_cancelled() {
        let mut cancelled = false;
        let err = wait_or_cancel(
            &target(),
            "create",
            policy(),
            || async { Ok::<_, ApiError>(Classification::InProgress) },
            || {
                cancelled = true;
                async { Ok(()) }
            },
            || async { Ok(PollOutcome::Cancelled) },
        )
        .await
        .unwrap_err();
        assert!(cancelled);
        assert!(matches!(
            err,
            WaitError::CancelledAfterTimeout {
                outcome: PollOutcome::Cancelled,
                ..
            }
        ));
        let msg = err.to_string();
        assert!(msg.contains("timed out after 45m"));
        assert!(msg.contains("cancelled"));
        assert!(msg.contains("Increase the create timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st014_cancel_failure_skips_repoll() {
        let mut repolled = false;
        let err = on_timeout(
            &target(),
            "create",
            Duration::from_secs(60),
            || async { Err(ApiError::new("CancelInstanceRefresh", "AccessDenied", "no")) },
            || {
                repolled = true;
                async { Ok(PollOutcome::Cancelled) }
            },
        )
        .await;
        assert!(!repolled);
        assert!(matches!(err, WaitError::CancelFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st014_second_timeout_is_stuck() {
        let err = on_timeout(
            &target(),
            "create",
            Duration::from_secs(60),
            || async { Ok(()) },
            || async { Ok(PollOutcome::TimedOut) },
        )
        .await;
        assert!(matches!(err, WaitError::CancelStuck { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_st014_terminal_before_timeout_never_cancels() {
        let mut cancelled = false;
        let out = wait_or_cancel(
            &target(),
            "create",
            policy(),
            || async { Ok::<_, ApiError>(Classification::Success) },
            || {
                cancelled = true;
                async { Ok(()) }
            },
            || async { Ok(PollOutcome::Cancelled) },
        )
        .await
        .unwrap();
        assert_eq!(out, PollOutcome::Success);
        assert!(!cancelled);
    }
}
