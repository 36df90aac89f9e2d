//! Iteration error types

use std::fmt;

/// Iteration result type
pub type IterResult<T> = Result<T, IterError>;

/// Iteration errors
///
/// Element functions never produce these: a panic inside an element function
/// unwinds through the current turn and leaves the task Active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterError {
    /// Step size must be at least 1
    InvalidStep(usize),
    /// Neither an explicit context nor an owner origin was available
    MissingContext,
    /// Trace export failed
    Trace(String),
}

impl fmt::Display for IterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterError::InvalidStep(step) => write!(f, "invalid step: {} (must be >= 1)", step),
            IterError::MissingContext => {
                write!(f, "no call context: task has no context and owner has no origin")
            }
            IterError::Trace(msg) => write!(f, "trace export failed: {}", msg),
        }
    }
}

impl std::error::Error for IterError {}

impl From<serde_json::Error> for IterError {
    fn from(e: serde_json::Error) -> Self {
        IterError::Trace(e.to_string())
    }
}
