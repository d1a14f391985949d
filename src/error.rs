//! ST-030: Error taxonomy for API calls, waits, and resource handlers.
//!
//! Classification is by structured error code. Message matching exists only
//! for a few legacy call sites and always sits behind a code match.

use crate::waiter::policy::format_duration;
use crate::waiter::{PollOutcome, Target};
use std::time::Duration;
use thiserror::Error;

/// How a failed API call should be treated by a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The remote entity does not exist (yet, or any more).
    NotFound,
    /// Throttling or a transient service fault; safe to try again.
    Retryable,
    /// Validation errors, conflicting state, auth failures.
    NonRetryable,
}

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFoundException",
    "ResourceNotFound",
    "NotFoundException",
    "NoSuchEntity",
    "TableNotFoundException",
    "DeploymentGroupDoesNotExistException",
    "SnapshotCopyGrantNotFoundFault",
    "ActiveInstanceRefreshNotFoundFault",
];

const RETRYABLE_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "RequestThrottled",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalServerError",
];

/// Code used when the transport itself failed (binary missing, bad output).
pub const TRANSPORT_ERROR: &str = "TransportError";

/// Code used when a response body does not have the expected shape.
pub const DECODE_ERROR: &str = "ResponseDecodeError";

/// A failed call against the remote cloud API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: {code}: {message}")]
pub struct ApiError {
    pub operation: String,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    /// A synthesized not-found error, for describe calls that return an empty list.
    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, "ResourceNotFoundException", message)
    }

    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, TRANSPORT_ERROR, message)
    }

    pub fn decode(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(operation, DECODE_ERROR, message)
    }

    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        if NOT_FOUND_CODES.contains(&code) {
            ErrorKind::NotFound
        } else if RETRYABLE_CODES.contains(&code) {
            ErrorKind::Retryable
        } else {
            ErrorKind::NonRetryable
        }
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Code match first, then a substring match on the message.
    ///
    /// Best-effort compatibility for services that reuse one code for
    /// unrelated failures.
    pub fn message_contains(&self, code: &str, needle: &str) -> bool {
        self.is_code(code) && self.message.contains(needle)
    }
}

/// A wait or retry loop ended without reaching the desired state.
///
/// Every variant carries the [`Target`] so the operator can find the entity.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{target}: {source}")]
    Api { target: Target, source: ApiError },

    #[error("{target}: reached a failed state: {reason}")]
    Failed { target: Target, reason: String },

    #[error("{target}: timed out after {}", format_duration(.timeout))]
    TimedOut { target: Target, timeout: Duration },

    #[error("{target}: still failing after {}: {last}", format_duration(.timeout))]
    RetriesExhausted {
        target: Target,
        timeout: Duration,
        last: ApiError,
    },

    #[error(
        "{target}: timed out after {}; the in-flight operation was cancelled (status: {outcome}). \
         Increase the {operation} timeout and apply again.",
        format_duration(.timeout)
    )]
    CancelledAfterTimeout {
        target: Target,
        operation: String,
        timeout: Duration,
        outcome: PollOutcome,
    },

    #[error("{target}: cancelling after timeout failed: {source}")]
    CancelFailed { target: Target, source: ApiError },

    #[error("{target}: cancellation did not reach a terminal state")]
    CancelStuck { target: Target },
}

impl WaitError {
    pub fn target(&self) -> &Target {
        match self {
            Self::Api { target, .. }
            | Self::Failed { target, .. }
            | Self::TimedOut { target, .. }
            | Self::RetriesExhausted { target, .. }
            | Self::CancelledAfterTimeout { target, .. }
            | Self::CancelFailed { target, .. }
            | Self::CancelStuck { target } => target,
        }
    }
}

/// Errors returned by resource handlers.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("{action}: {source}")]
    Api { action: String, source: ApiError },

    #[error("{0}")]
    Validation(String),

    #[error("{resource_type}: attribute '{attribute}' cannot be changed in place")]
    RequiresReplacement {
        resource_type: String,
        attribute: String,
    },

    #[error("invalid resource ID '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    /// The create call succeeded but the entity never became usable.
    #[error("{source} (created as '{id}', will be replaced on the next apply)")]
    Tainted {
        id: String,
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    pub fn api(action: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            action: action.into(),
            source,
        }
    }

    pub fn tainted(id: impl Into<String>, source: ProviderError) -> Self {
        Self::Tainted {
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// Remote ID of an entity left behind by a failed create.
    pub fn created_id(&self) -> Option<&str> {
        match self {
            Self::Tainted { id, .. } => Some(id),
            _ => None,
        }
    }
}
