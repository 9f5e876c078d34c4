//! Error taxonomy for the dispatch engine.
//!
//! Mirrors the classification in the design: Validation, NotFound, Conflict,
//! Expired, and Transient errors are surfaced to callers (or retried);
//! Fatal errors are handled internally by the dispatch run, which always
//! emits `IncidentEscalated{reason:"internal"}` before terminating.

use thiserror::Error;

/// Result type used throughout the dispatch engine.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Comprehensive error type for dispatch operations.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    /// Malformed input; reject immediately.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown incident, offer, or vendor.
    #[error("not found: {0}")]
    NotFound(String),

    /// Already assigned, already terminal, or otherwise conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Deadline passed; terminal for that offer.
    #[error("expired")]
    Expired,

    /// Retryable I/O failure (store timeout, transient publish failure, geo-query failure).
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unrecoverable; the dispatch run escalates with reason "internal".
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Severity classification used by the attempt loop to decide retry vs.
/// escalate vs. surface-to-caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Surfaced directly to the request caller; the dispatch run is unaffected.
    Logical,
    /// Retried with backoff; if unresolved, counted as "no vendor found".
    Transient,
    /// Short-circuits the run with an escalation.
    Fatal,
}

impl DispatchError {
    pub fn severity(&self) -> Severity {
        match self {
            DispatchError::Validation(_) | DispatchError::NotFound(_) | DispatchError::Conflict(_) | DispatchError::Expired => {
                Severity::Logical
            }
            DispatchError::Transient(_) => Severity::Transient,
            DispatchError::Fatal(_) => Severity::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.severity() == Severity::Transient
    }
}
