use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::cache::CacheError;
use crate::db::errors::DbError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Bad credentials. Deliberately the same for an unknown email and a wrong password.
    #[error("Unauthorized")]
    Unauthorized,

    /// A user with this (canonical) email already exists
    #[error("User exists")]
    UserExists,

    /// Only used where revealing existence is acceptable (back-office flows)
    #[error("User not found")]
    UserNotFound,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token not found")]
    TokenNotFound,

    /// Too many attempts within the current window
    #[error("Max attempts ({limit}) reached, retry in {ttl:?}")]
    LimitExceeded { ttl: Duration, limit: u64 },

    #[error("Name is required")]
    NameRequired,

    #[error("Email is required")]
    EmailRequired,

    #[error("Password is required")]
    PasswordRequired,

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Cache operation error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::SessionNotFound | Error::SessionExpired => StatusCode::UNAUTHORIZED,
            Error::UserExists => StatusCode::CONFLICT,
            Error::UserNotFound | Error::TokenNotFound => StatusCode::NOT_FOUND,
            Error::InvalidToken | Error::TokenExpired => StatusCode::BAD_REQUEST,
            Error::NameRequired | Error::EmailRequired | Error::PasswordRequired => StatusCode::BAD_REQUEST,
            Error::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Internal { .. } | Error::Cache(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthorized => "Invalid credentials".to_string(),
            Error::SessionNotFound | Error::SessionExpired => "Your session has ended, please sign in again".to_string(),
            Error::UserExists => "An account with this email address already exists".to_string(),
            Error::UserNotFound => "User not found".to_string(),
            Error::InvalidToken | Error::TokenNotFound => "This link is invalid".to_string(),
            Error::TokenExpired => "This link has expired".to_string(),
            Error::LimitExceeded { ttl, .. } => {
                format!("Too many attempts, please retry in {} seconds", retry_after_secs(*ttl))
            }
            Error::NameRequired => "Name is required".to_string(),
            Error::EmailRequired => "Email is required".to_string(),
            Error::PasswordRequired => "Password is required".to_string(),
            Error::Internal { .. } | Error::Cache(_) | Error::Other(_) => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { .. } => "Resource already exists".to_string(),
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
        }
    }
}

/// Whole seconds a client should wait, rounded up so it never retries early.
fn retry_after_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Cache(_) | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthorized | Error::LimitExceeded { .. } => {
                tracing::info!("Authentication error: {}", self);
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut response = (status, self.user_message()).into_response();

        if let Error::LimitExceeded { ttl, .. } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs(*ttl).to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}

/// Convert from String errors (e.g., from external functions)
impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
