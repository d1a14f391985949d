//! ST-011: Terminal-state classification.

/// What a single status observation means for the poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    Failure(String),
    Cancelled,
    InProgress,
}

impl Classification {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Implemented by every per-resource status enum.
///
/// Implementations must map any unrecognized value to `InProgress`.
pub trait Classify {
    fn classify(&self) -> Classification;
}

impl Classify for Classification {
    fn classify(&self) -> Classification {
        self.clone()
    }
}
