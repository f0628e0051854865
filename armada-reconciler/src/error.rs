use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use armada_core::{ChangesetId, ErrorKind, StoreError};
use armada_template::TemplateError;

/// Failure reported by a [`crate::CodeHost`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Rate limit, 5xx or dropped connection.
    #[error("transient code host failure: {0}")]
    Transient(String),

    #[error("code host did not answer within {0:?}")]
    Timeout(Duration),

    /// The host rejected the request; repeating it will not help.
    #[error("code host rejected request: {0}")]
    Permanent(String),

    #[error("code host call cancelled")]
    Cancelled,
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Transient(_) | HostError::Timeout(_) | HostError::Cancelled => {
                ErrorKind::Transient
            }
            HostError::Permanent(_) => ErrorKind::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Error surface for planning, execution and the worker runtime.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    /// The changeset cannot be reconciled as stored.
    #[error("changeset {changeset}: {reason}")]
    Invalid {
        changeset: ChangesetId,
        reason: String,
    },

    #[error("reconciler protocol error: {0}")]
    Protocol(String),
}

impl ReconcilerError {
    pub(crate) fn invalid(changeset: ChangesetId, reason: impl Into<String>) -> Self {
        ReconcilerError::Invalid {
            changeset,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcilerError::Host(err) => err.kind(),
            ReconcilerError::Store(StoreError::NotFound { .. }) => ErrorKind::Terminal,
            ReconcilerError::Store(_) | ReconcilerError::Io { .. } => ErrorKind::Transient,
            ReconcilerError::Protocol(_) => ErrorKind::Transient,
            ReconcilerError::Template(_) | ReconcilerError::Invalid { .. } => ErrorKind::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReconcilerError::Host(HostError::Cancelled))
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReconcilerError {
    ReconcilerError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_error_classification() {
        assert!(HostError::Transient("502".into()).is_retryable());
        assert!(HostError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!HostError::Permanent("422".into()).is_retryable());

        let missing = ReconcilerError::Store(StoreError::not_found("changeset spec", "x"));
        assert!(!missing.is_retryable());
        assert!(ReconcilerError::Store(StoreError::Poisoned).is_retryable());
        assert!(ReconcilerError::from(HostError::Cancelled).is_cancelled());
    }
}
