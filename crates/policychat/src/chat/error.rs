//! Chat store errors.

use policychat_protocol::TitleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing, or owned by someone else. The two are indistinguishable to callers.
    #[error("chat not found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<TitleError> for StoreError {
    fn from(err: TitleError) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
