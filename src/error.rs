//! Unified error model for the remote marshaling core.
//! One enum covers every failure surfaced to the host executor; remote diagnostics
//! are carried verbatim so operators see exactly what the remote engine reported.

use crate::protocol::Diag;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// SQLSTATE the remote engine raises on a transient write/write conflict.
/// Executions failing with this state are surfaced as `SerializationFailure`
/// so the host may retry the surrounding transaction.
pub const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteError {
    /// A value could not be attached to a parameter marker. Fatal, never retried.
    BindFailed { position: u16, diag: Diag },
    /// A remote type has no defined conversion path. Configuration error, never coerced.
    UnsupportedType { detail: String },
    /// Generic remote execution failure. Fatal for the current execution.
    ExecutionFailed { diag: Diag },
    /// Transient conflict reported by the remote engine; the host may retry the
    /// surrounding transaction. This layer never retries on its own.
    SerializationFailure { diag: Diag },
    /// A caller broke a lifecycle invariant (e.g. double prepare). Programming
    /// defect, never recovered.
    ProtocolInvariantViolation { detail: String },
}

impl RemoteError {
    pub fn bind_failed(position: u16, diag: Diag) -> Self {
        RemoteError::BindFailed { position, diag }
    }

    pub fn unsupported<S: Into<String>>(detail: S) -> Self {
        RemoteError::UnsupportedType { detail: detail.into() }
    }

    pub fn exec_failed(diag: Diag) -> Self {
        RemoteError::ExecutionFailed { diag }
    }

    pub fn invariant<S: Into<String>>(detail: S) -> Self {
        RemoteError::ProtocolInvariantViolation { detail: detail.into() }
    }

    /// Classify an execute-time diagnostic: the serialization-failure SQLSTATE is
    /// the one retryable outcome, everything else is a plain execution failure.
    pub fn from_execute_diag(diag: Diag) -> Self {
        if diag.state == SQLSTATE_SERIALIZATION_FAILURE {
            RemoteError::SerializationFailure { diag }
        } else {
            RemoteError::ExecutionFailed { diag }
        }
    }

    /// True when the host may usefully retry the surrounding transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::SerializationFailure { .. })
    }

    /// The verbatim remote diagnostic, when the failure originated remotely.
    pub fn diag(&self) -> Option<&Diag> {
        match self {
            RemoteError::BindFailed { diag, .. }
            | RemoteError::ExecutionFailed { diag }
            | RemoteError::SerializationFailure { diag } => Some(diag),
            RemoteError::UnsupportedType { .. } | RemoteError::ProtocolInvariantViolation { .. } => None,
        }
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteError::BindFailed { position, diag } => {
                write!(f, "bind failed at parameter {}: [{}] {}", position, diag.state, diag.message)
            }
            RemoteError::UnsupportedType { detail } => write!(f, "unsupported type: {}", detail),
            RemoteError::ExecutionFailed { diag } => {
                write!(f, "remote execution failed: [{}] {}", diag.state, diag.message)
            }
            RemoteError::SerializationFailure { diag } => {
                write!(f, "serialization failure: [{}] {}", diag.state, diag.message)
            }
            RemoteError::ProtocolInvariantViolation { detail } => {
                write!(f, "protocol invariant violation: {}", detail)
            }
        }
    }
}

impl std::error::Error for RemoteError {}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(state: &str, msg: &str) -> Diag {
        Diag { state: state.into(), native: 0, message: msg.into() }
    }

    #[test]
    fn execute_diag_classification() {
        let err = RemoteError::from_execute_diag(diag("40001", "deadlock detected"));
        assert!(matches!(err, RemoteError::SerializationFailure { .. }));
        assert!(err.is_retryable());

        let err = RemoteError::from_execute_diag(diag("42S02", "table not found"));
        assert!(matches!(err, RemoteError::ExecutionFailed { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn diagnostics_preserved_verbatim() {
        let err = RemoteError::bind_failed(3, diag("22018", "invalid character value"));
        let d = err.diag().unwrap();
        assert_eq!(d.state, "22018");
        assert_eq!(d.message, "invalid character value");
        assert!(format!("{err}").contains("parameter 3"));
    }

    #[test]
    fn serde_round_trip() {
        let err = RemoteError::unsupported("no conversion for remote type 17");
        let text = serde_json::to_string(&err).unwrap();
        let back: RemoteError = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, RemoteError::UnsupportedType { .. }));
    }
}
