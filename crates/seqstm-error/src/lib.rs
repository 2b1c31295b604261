//! Error taxonomy for seqstm transactions.
//!
//! Only failures that escape the engine live here. Commit conflicts are an
//! internal outcome handled by the retry loop and are deliberately absent:
//! callers observe a conflict only indirectly, as a [`StmError::Timeout`]
//! once the attempt budget runs out.

use seqstm_types::{Cancelled, CellId};
use thiserror::Error;

/// Failure surfaced by `atomic` or by a transaction context.
#[derive(Error, Debug)]
pub enum StmError {
    /// `write` was called on a read-only transaction. Programmer error;
    /// surfaced immediately, never retried.
    #[error("write on read-only transaction (cell {cell})")]
    ReadOnlyViolation {
        /// Cell the rejected write targeted.
        cell: CellId,
    },

    /// The attempt budget was exhausted without a successful commit.
    #[error("transaction timed out after {attempts} attempts")]
    Timeout {
        /// Number of attempts that were made.
        attempts: u32,
    },

    /// External cancellation was observed between attempts or during the
    /// inter-attempt sleep. Distinct from [`StmError::Timeout`].
    #[error("transaction cancelled")]
    Cancelled,

    /// The transaction body failed. The error is carried through unchanged;
    /// the attempt's buffered writes were discarded and never applied.
    #[error("{0}")]
    User(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl StmError {
    /// Wrap an arbitrary body error.
    pub fn user(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::User(Box::new(err))
    }

    /// Whether a fresh invocation with the same body may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error originated in the transaction body.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Human-friendly suggestion for fixing this error.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ReadOnlyViolation { .. } => {
                Some("Run the transaction in ReadWrite mode or drop the write")
            }
            Self::Timeout { .. } => {
                Some("Raise max_attempts or reduce contention on the cells involved")
            }
            Self::Cancelled | Self::User(_) => None,
        }
    }
}

impl From<Cancelled> for StmError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Result type alias using [`StmError`].
pub type Result<T> = std::result::Result<T, StmError>;
