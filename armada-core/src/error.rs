//! Error types for armada-core.
//!
//! Every user-facing failure maps to one [`ErrorKind`] and carries a stable
//! machine-readable code via [`CampaignError::code`].

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::ids::IdError;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Error taxonomy shared across the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input; rejected synchronously, never retried.
    Validation,
    /// Actor lacks rights; never retried.
    Authorization,
    /// Needs a user decision; never retried.
    Conflict,
    /// Host or network hiccup; retried with backoff.
    Transient,
    /// Retries exhausted or unrecoverable; needs explicit re-enqueue.
    Terminal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Terminal => "terminal",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A spec failed structural checks.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid campaign name '{0}'; use letters, digits, '-', '_' and '.'")]
    InvalidName(String),

    #[error("changeset spec has no commits")]
    NoCommits,

    #[error("changeset spec has more than one commit")]
    MultipleCommits,

    #[error("invalid diff: {0}")]
    Diff(#[from] armada_diff::DiffError),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Failures from a [`crate::store::Store`] implementation or the state file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// State or config file exists but is malformed.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("{} is held by another armada process", path.display())]
    Locked { path: PathBuf },

    /// A worker tried to record an attempt for a changeset it does not hold.
    #[error("changeset {id} is {state}, not processing")]
    NotClaimed { id: String, state: String },
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Campaign operations
// ---------------------------------------------------------------------------

/// Errors surfaced synchronously to callers of campaign operations.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("invalid spec: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidId(#[from] IdError),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// An existing changeset is owned by a campaign other than the one applying.
    #[error("changeset {changeset} in repository {repo} on {head_ref} is owned by campaign {owner}")]
    OwnershipConflict {
        changeset: i64,
        repo: i64,
        head_ref: String,
        owner: i64,
    },

    #[error("changeset {changeset} is {state}; only failed changesets can be retried")]
    NotRetryable { changeset: i64, state: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for CampaignError {
    fn from(err: StoreError) -> Self {
        CampaignError::Store(err)
    }
}

impl CampaignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CampaignError::Validation(_) | CampaignError::InvalidId(_) => ErrorKind::Validation,
            CampaignError::Unauthorized(_) => ErrorKind::Authorization,
            CampaignError::Conflict(_)
            | CampaignError::OwnershipConflict { .. }
            | CampaignError::NotRetryable { .. } => ErrorKind::Conflict,
            CampaignError::Store(StoreError::NotFound { .. }) => ErrorKind::Validation,
            CampaignError::Store(_) => ErrorKind::Transient,
        }
    }

    /// Stable code for clients to branch on.
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::Validation(_) => "invalid-spec",
            CampaignError::InvalidId(IdError::WrongKind { .. }) => "wrong-id-kind",
            CampaignError::InvalidId(_) => "invalid-id",
            CampaignError::Unauthorized(_) => "unauthorized",
            CampaignError::Conflict(_) => "conflict",
            CampaignError::OwnershipConflict { .. } => "ownership-conflict",
            CampaignError::NotRetryable { .. } => "not-retryable",
            CampaignError::Store(StoreError::NotFound { .. }) => "not-found",
            CampaignError::Store(_) => "store-failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdKind;

    #[test]
    fn codes_are_stable() {
        let err = CampaignError::OwnershipConflict {
            changeset: 1,
            repo: 2,
            head_ref: "refs/heads/x".into(),
            owner: 3,
        };
        assert_eq!(err.code(), "ownership-conflict");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.kind().is_retryable());

        let wrong = CampaignError::from(IdError::WrongKind {
            expected: IdKind::Campaign,
            actual: IdKind::Changeset,
        });
        assert_eq!(wrong.code(), "wrong-id-kind");
        assert_eq!(wrong.kind(), ErrorKind::Validation);
    }

    #[test]
    fn missing_entity_is_a_validation_error() {
        let err = CampaignError::from(StoreError::not_found("campaign", 7));
        assert_eq!(err.code(), "not-found");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "campaign 7 not found");
    }

    #[test]
    fn only_transient_is_retryable() {
        for kind in [
            ErrorKind::Validation,
            ErrorKind::Authorization,
            ErrorKind::Conflict,
            ErrorKind::Terminal,
        ] {
            assert!(!kind.is_retryable(), "{kind}");
        }
        assert!(ErrorKind::Transient.is_retryable());
    }
}
