use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Order number is invalid: {0}")]
    InvalidOrderNumber(String),

    #[error("Order {0} has already been registered by the current user")]
    AlreadyRegisteredBySelf(String),

    #[error("Order {0} belongs to another user")]
    AlreadyRegisteredByOther(String),

    /// Uniqueness violation on `order_number`, raised by the ledger store.
    /// Services resolve it into one of the two `AlreadyRegistered*` variants.
    #[error("Order number {0} already exists in the ledger")]
    DuplicateOrder(String),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// The ledger itself is unreachable. The reconciler stops on these.
    ///
    /// Errors tied to one row (constraint or range violations, decode
    /// failures) are not fatal: they only affect the order that caused them.
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Storage(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
            ),
            AppError::Migration(_) => true,
            _ => false,
        }
    }
}

/// Failures talking to the external accrual service.
///
/// None of these ever reach a foreground request path: the reconciler
/// leaves the order pending and retries it on a later tick.
#[derive(Error, Debug)]
pub enum AccrualError {
    #[error("Accrual service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Order is not registered in the accrual service")]
    NotRegistered,

    #[error("Accrual service rate limit hit, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Accrual service answered with unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed accrual response: {0}")]
    Malformed(String),

    #[error("Accrual lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::InvalidOrderNumber(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_ORDER_NUMBER",
                self.to_string(),
            ),
            AppError::AlreadyRegisteredBySelf(_) => (
                StatusCode::CONFLICT,
                "ALREADY_REGISTERED",
                self.to_string(),
            ),
            AppError::AlreadyRegisteredByOther(_) | AppError::DuplicateOrder(_) => (
                StatusCode::CONFLICT,
                "ORDER_CONFLICT",
                self.to_string(),
            ),
            AppError::InsufficientFunds { .. } => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_FUNDS",
                self.to_string(),
            ),
            AppError::InvalidInput(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                self.to_string(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required".to_string(),
            ),
            AppError::Storage(_) | AppError::Migration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            AppError::Config(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
