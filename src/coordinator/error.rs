//! Error types.
//!
//! Suppressed calls are never errors; these cover misconfiguration and a
//! missing timer facility only.

/// Errors raised while building a coordinator or scheduling a timer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    /// The configuration failed validation.
    #[error("invalid coordinator configuration: {0}")]
    InvalidConfig(&'static str),

    /// A timer was requested outside of a tokio runtime.
    #[error("no tokio runtime available to schedule a timer")]
    NoRuntime,
}
