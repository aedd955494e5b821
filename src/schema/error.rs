use std::time::Duration;

use super::column::ColumnType;
use super::dialect::Dialect;

/// Failure of an evolution or revision run.
///
/// Connection-class failures are kept apart from schema failures so the
/// operator can tell "could not reach the database" from "the database said
/// no".
#[derive(Debug, thiserror::Error)]
pub enum EvolveError {
    #[error("database unreachable: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("timed out after {0:?} waiting for a database connection")]
    ConnectTimeout(Duration),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("`{0}` is not a valid SQL identifier")]
    InvalidIdentifier(String),
    #[error("column `{0}` appears more than once in the target")]
    DuplicateColumn(String),
    #[error("target for table `{0}` has no columns")]
    EmptyTarget(String),
    #[error("default for column `{column}` is not allowed: {reason}")]
    InvalidDefault { column: String, reason: &'static str },
    #[error("table `{0}` does not exist")]
    TableNotFound(String),
    #[error("column `{table}.{column}` exists as `{observed}`, which is incompatible with target type `{target}`")]
    TypeConflict {
        table: String,
        column: String,
        observed: String,
        target: ColumnType,
    },
    #[error("{operation} is not supported on {dialect}")]
    Unsupported {
        dialect: Dialect,
        operation: &'static str,
    },
    #[error("unsupported database backend `{0}`")]
    UnsupportedBackend(String),
    #[error("statement failed: {statement}")]
    Rejected {
        statement: String,
        /// Statements that were already committed when this one failed.
        /// Always empty for dialects with transactional DDL.
        applied: Vec<String>,
        #[source]
        source: sqlx::Error,
    },
}

impl EvolveError {
    /// Classify a driver error raised while running `statement`.
    pub(crate) fn from_sqlx(err: sqlx::Error, statement: &str, applied: &[String]) -> Self {
        if is_connection_failure(&err) {
            return EvolveError::Connection(err);
        }
        SchemaError::Rejected {
            statement: statement.to_string(),
            applied: applied.to_vec(),
            source: err,
        }
        .into()
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            EvolveError::Connection(_) | EvolveError::ConnectTimeout(_)
        )
    }

    pub fn schema_error(&self) -> Option<&SchemaError> {
        match self {
            EvolveError::Schema(err) => Some(err),
            _ => None,
        }
    }
}

fn is_connection_failure(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
