//! Engine-level errors and the outcome of partial operations.

use std::fmt;

use serde::Serialize;

use crate::client::ClientError;
use crate::collector::CollectError;
use crate::executor::Mutation;
use crate::store::StoreError;
use crate::types::HistoryError;

/// Error type for service operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Target list is empty.
    #[error("no users to process")]
    NoUsers,
    /// Action budget reached before the list was exhausted.
    #[error("action limit reached after {performed} actions")]
    LimitExceeded {
        /// Actions performed.
        performed: u32,
    },
    /// The remote session stopped being usable mid-batch.
    #[error("session corrupted after {performed} actions: {reason}")]
    Corrupted {
        /// Actions performed before the failure.
        performed: u32,
        /// Remote error message.
        reason: String,
    },
    /// Cooperative cancellation.
    #[error("operation cancelled")]
    Cancelled,
    /// Invalid batch type at a boundary.
    #[error("invalid batch type: {0}")]
    InvalidBatchType(String),
    /// A handle could not be resolved.
    #[error("user not found: {0}")]
    UserNotFound(String),
    /// Stored diff history is inconsistent.
    #[error("history integrity: {0}")]
    Integrity(#[from] HistoryError),
    /// Persistence failure.
    #[error("store: {0}")]
    Store(StoreError),
    /// Remote failure with what was being attempted.
    #[error("{context}: {source}")]
    Remote {
        /// What the engine was doing.
        context: String,
        /// Remote error.
        #[source]
        source: ClientError,
    },
    /// Anything else.
    #[error("engine failure: {0}")]
    Failure(String),
}

impl EngineError {
    /// Wrap a remote error with context.
    pub fn remote(context: impl Into<String>, source: ClientError) -> Self {
        match source {
            ClientError::UserNotFound(name) => Self::UserNotFound(name),
            source => Self::Remote {
                context: context.into(),
                source,
            },
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidBatchType(t) => Self::InvalidBatchType(t),
            StoreError::Cancelled => Self::Cancelled,
            other => Self::Store(other),
        }
    }
}

impl From<CollectError> for EngineError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::Cancelled { .. } => Self::Cancelled,
            CollectError::Source { context, source } => Self::remote(context, source),
        }
    }
}

/// Terminal state of a mutation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every target was visited.
    Completed,
    /// There was nothing to do.
    NoUsers,
    /// The budget ran out with targets left.
    LimitExceeded,
    /// Cancelled before the list was exhausted.
    Cancelled,
    /// A session-fatal remote error stopped the run.
    Corrupted {
        /// Remote error message.
        reason: String,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::NoUsers => write!(f, "nothing to do"),
            Self::LimitExceeded => write!(f, "limit exceeded"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Corrupted { reason } => write!(f, "corrupted ({reason})"),
        }
    }
}

/// What a mutation run did. Always carries `performed`, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionReport {
    /// Mutation applied.
    pub mutation: Mutation,
    /// Successful remote mutations.
    pub performed: u32,
    /// Targets skipped because they are whitelisted.
    pub skipped: usize,
    /// Targets whose mutation failed transiently.
    pub failed: usize,
    /// Intents logged in debug mode.
    pub simulated: usize,
    /// Terminal state.
    pub outcome: Outcome,
}

impl ActionReport {
    /// Empty report for `mutation`.
    pub fn new(mutation: Mutation) -> Self {
        Self {
            mutation,
            performed: 0,
            skipped: 0,
            failed: 0,
            simulated: 0,
            outcome: Outcome::Completed,
        }
    }

    /// Report for an empty target list.
    pub fn no_users(mutation: Mutation) -> Self {
        Self {
            outcome: Outcome::NoUsers,
            ..Self::new(mutation)
        }
    }

    /// True for `Completed` and `NoUsers`.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Completed | Outcome::NoUsers)
    }

    /// The outcome as an error, `None` when the run completed.
    pub fn error(&self) -> Option<EngineError> {
        match &self.outcome {
            Outcome::Completed => None,
            Outcome::NoUsers => Some(EngineError::NoUsers),
            Outcome::LimitExceeded => Some(EngineError::LimitExceeded {
                performed: self.performed,
            }),
            Outcome::Cancelled => Some(EngineError::Cancelled),
            Outcome::Corrupted { reason } => Some(EngineError::Corrupted {
                performed: self.performed,
                reason: reason.clone(),
            }),
        }
    }
}
