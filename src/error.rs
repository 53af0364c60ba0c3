//! Error types shared by the store modules and the HTTP layer.
//!
//! Store functions return [`Result`]; the server maps each [`Error`]
//! variant onto an HTTP status code (see `server::ApiError`).

use thiserror::Error;

use crate::order_key::OrderKeyError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    /// A feature that depends on unset configuration (passcode, cron secret).
    #[error("{0}")]
    Unavailable(String),

    /// The schedule source could not be read.
    #[error("{0}")]
    Upstream(String),

    #[error("order key: {0}")]
    OrderKey(#[from] OrderKeyError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    /// True for SQLite `UNIQUE` constraint violations.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("page abc");
        assert_eq!(err.to_string(), "page abc not found");
    }

    #[test]
    fn test_non_database_errors_are_not_unique_violations() {
        assert!(!Error::bad_request("x").is_unique_violation());
        assert!(!Error::Conflict("slug".into()).is_unique_violation());
    }
}
