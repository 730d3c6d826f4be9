use std::{fmt, time::Duration};

use crate::config::TargetId;

/// Failure of a single query attempt against one replica.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The replica could not be reached or the connection broke mid-query.
    #[error("connection error: {0}")]
    Connection(String),

    /// The replica rejected or failed to run the query.
    #[error("query error: {0}")]
    Query(String),

    /// A row could not be turned into text cells.
    #[error("decode error: {0}")]
    Decode(String),

    /// The attempt was abandoned because another replica already won.
    #[error("cancelled")]
    Cancelled,

    /// The race deadline elapsed before this replica answered.
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The replica's future panicked; the panic was contained to this attempt.
    #[error("attempt panicked: {0}")]
    Panicked(String),
}

impl QueryError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Returns true for outcomes caused by the race concluding rather than by the replica.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded(_))
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => Self::Connection(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_) => Self::Decode(err.to_string()),
            sqlx::Error::Database(db_err) => Self::Query(db_err.message().to_string()),
            _ => Self::Query(err.to_string()),
        }
    }
}

/// A query attempt that failed on one replica, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    pub target: TargetId,
    pub cause: QueryError,
}

impl ExecutionError {
    pub fn new(target: TargetId, cause: QueryError) -> Self {
        Self { target, cause }
    }

    pub fn cancelled(target: TargetId) -> Self {
        Self::new(target, QueryError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause.is_cancelled()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.cause)
    }
}

impl std::error::Error for ExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Errors a race reports to its caller.
#[derive(thiserror::Error, Debug)]
pub enum RaceError {
    /// The race was rejected before any attempt was spawned.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No target succeeded.
    ///
    /// Holds exactly one entry per target: reported failures in completion
    /// order, followed by the targets still running when the deadline fired.
    #[error("all targets failed: {}", render_failures(.0))]
    AllFailed(Vec<ExecutionError>),
}

impl RaceError {
    /// Per-target failures, empty for [`RaceError::InvalidInput`].
    pub fn failures(&self) -> &[ExecutionError] {
        match self {
            Self::AllFailed(failures) => failures,
            Self::InvalidInput(_) => &[],
        }
    }
}

fn render_failures(failures: &[ExecutionError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
