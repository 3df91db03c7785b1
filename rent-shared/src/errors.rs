use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E2xxx: Profile and search-area errors
/// - E3xxx: Likes and matches
/// - E4xxx: Listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    InvalidArgument,
    NotFound,
    Forbidden,
    Conflict,
    Unavailable,
    Timeout,

    // Auth (E1xxx)
    Unauthorized,
    TokenExpired,
    TokenInvalid,

    // Profile (E2xxx)
    ProfileNotFound,
    InvalidSearchArea,

    // Likes and matches (E3xxx)
    InvalidTarget,
    NotMatched,

    // Listings (E4xxx)
    ListingNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::InvalidArgument => "E0002",
            Self::NotFound => "E0003",
            Self::Forbidden => "E0005",
            Self::Conflict => "E0006",
            Self::Unavailable => "E0007",
            Self::Timeout => "E0008",

            // Auth
            Self::Unauthorized => "E1001",
            Self::TokenExpired => "E1004",
            Self::TokenInvalid => "E1005",

            // Profile
            Self::ProfileNotFound => "E2001",
            Self::InvalidSearchArea => "E2002",

            // Likes and matches
            Self::InvalidTarget => "E3001",
            Self::NotMatched => "E3003",

            // Listings
            Self::ListingNotFound => "E4001",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidArgument | Self::InvalidSearchArea => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::ProfileNotFound | Self::ListingNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::TokenExpired | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::NotMatched => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,
            Self::InvalidTarget => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Collapse domain-specific codes onto the shared taxonomy.
    pub fn class(&self) -> ErrorCode {
        match self {
            Self::InvalidSearchArea => Self::InvalidArgument,
            Self::ProfileNotFound | Self::ListingNotFound => Self::NotFound,
            Self::NotMatched => Self::Forbidden,
            Self::TokenExpired | Self::TokenInvalid => Self::Unauthorized,
            other => *other,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTarget, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The error code this error surfaces as, including classified database failures.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(err) => classify_database_error(err),
            AppError::Validation(_) => ErrorCode::InvalidArgument,
        }
    }

    /// Shorthand for `self.code().class()`.
    pub fn class(&self) -> ErrorCode {
        self.code().class()
    }
}

fn classify_database_error(err: &diesel::result::Error) -> ErrorCode {
    use diesel::result::Error;

    match err {
        Error::NotFound => ErrorCode::NotFound,
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => ErrorCode::Conflict,
        Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => ErrorCode::Conflict,
        Error::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => ErrorCode::Unavailable,
        // Postgres reports statement_timeout as SQLSTATE 57014 which diesel leaves unclassified
        Error::DatabaseError(_, info) if info.message().contains("statement timeout") => ErrorCode::Timeout,
        _ => ErrorCode::InternalError,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                if status.is_server_error() {
                    tracing::error!(code = code.code(), "{message}");
                }
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new(ErrorCode::InternalError.code(), "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                let code = classify_database_error(err);
                let message = match code {
                    ErrorCode::NotFound => "resource not found",
                    ErrorCode::Conflict => "conflicting concurrent write",
                    ErrorCode::Unavailable => "database unavailable",
                    ErrorCode::Timeout => "database request timed out",
                    _ => "database error",
                };
                (code.status_code(), ApiErrorResponse::new(code.code(), message))
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new(ErrorCode::InvalidArgument.code(), msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
