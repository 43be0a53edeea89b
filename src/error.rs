use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{SplitError, TransactionStatus};
use crate::ports::{ConflictKind, StoreError};
use crate::validation::ValidationError;

/// Seconds a client should wait before retrying a payout that collided with
/// one already in flight.
pub const CONCURRENT_PAYOUT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Insufficient balance: requested {requested} cents, {available} cents available")]
    InsufficientBalance { requested: i64, available: i64 },

    #[error("Payout already in flight for teacher {0}")]
    ConcurrentPayout(String),

    #[error("Idempotency key {0} was already used for a different payout")]
    IdempotencyConflict(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidAmount(_)
            | AppError::InvalidSplit(_)
            | AppError::Validation(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidStateTransition { .. } | AppError::ConcurrentPayout(_) => {
                StatusCode::CONFLICT
            }
            AppError::InsufficientBalance { .. } | AppError::IdempotencyConflict(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Integrity(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable identifier for clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::InvalidSplit(_) => "invalid_split",
            AppError::InvalidStateTransition { .. } => "invalid_state_transition",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::ConcurrentPayout(_) => "concurrent_payout",
            AppError::IdempotencyConflict(_) => "idempotency_conflict",
            AppError::Integrity(_) => "integrity_error",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether the same request may succeed later without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ConcurrentPayout(_) | AppError::StoreUnavailable(_)
        )
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("transaction {}", id)),
            StoreError::InvalidSplit(msg) => AppError::InvalidSplit(msg),
            StoreError::InvalidStateTransition { id, from, to } => {
                AppError::InvalidStateTransition { id, from, to }
            }
            StoreError::Conflict(ConflictKind::InFlightWithdrawal { teacher_ref }) => {
                AppError::ConcurrentPayout(teacher_ref)
            }
            StoreError::Conflict(ConflictKind::IdempotencyKey(key)) => {
                AppError::IdempotencyConflict(key)
            }
            StoreError::Conflict(ConflictKind::LiveRefund {
                original_transaction_id,
            }) => AppError::Validation(format!(
                "payment {} already has a refund",
                original_transaction_id
            )),
            StoreError::Conflict(ConflictKind::DuplicateId(id)) => {
                AppError::Internal(format!("duplicate transaction id {}", id))
            }
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::Corrupt(msg) => AppError::Integrity(msg),
        }
    }
}

impl From<SplitError> for AppError {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::InvalidAmount(_) | SplitError::AmountTooLarge(_) => {
                AppError::InvalidAmount(err.to_string())
            }
            SplitError::InvalidFeeRate(_) => AppError::InvalidSplit(err.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();
        if matches!(self, AppError::ConcurrentPayout(_)) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(CONCURRENT_PAYOUT_RETRY_AFTER_SECS),
            );
        }
        response
    }
}
