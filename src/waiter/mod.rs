//! ST-010: Remote operation poller.
//!
//! Generic waiting machinery for asynchronous cloud operations: a status
//! classifier seam, a fixed-interval backoff policy, the poll loop, the
//! timeout-triggered cancellation, and a retry helper for mutating calls.

pub mod cancel;
pub mod poll;
pub mod policy;
pub mod retry;
pub mod status;

pub use cancel::{on_timeout, wait_or_cancel};
pub use poll::{poll, OnNotFound, PollOutcome};
pub use policy::BackoffPolicy;
pub use retry::{retry, Attempt};
pub use status::{Classification, Classify};

use std::fmt;

/// Identifies one remote entity being waited on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub kind: &'static str,
    pub parts: Vec<String>,
}

impl Target {
    pub fn new<I, S>(kind: &'static str, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Composite identity, comma-joined.
    pub fn id(&self) -> String {
        self.parts.join(",")
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.kind, self.id())
    }
}
