use miette::Diagnostic;
use thiserror::Error;

use crate::gid::IdError;
use crate::spicedb::ClientError;
use crate::storage::StorageError;

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Id(#[from] IdError),

    #[error("invalid resource type: {0}")]
    #[diagnostic(code(warden::query::invalid_type))]
    InvalidType(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    #[diagnostic(code(warden::query::precondition))]
    Precondition(String),

    /// The caller went away or a per-call deadline elapsed.
    #[error("operation canceled")]
    #[diagnostic(code(warden::query::canceled))]
    Canceled,

    #[error("internal error: {0}")]
    #[diagnostic(code(warden::query::internal))]
    Internal(String),
}

impl QueryError {
    /// Whether a retry by the caller could reasonably succeed. The engine
    /// itself never retries.
    pub fn is_transient(&self) -> bool {
        match self {
            QueryError::Client(err) => err.is_transient(),
            QueryError::Storage(StorageError::Db(_)) => true,
            _ => false,
        }
    }
}
