//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::{BingoError, GameError, LedgerError, StorageError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code (NOT_FOUND, INSUFFICIENT_BALANCE, ...)
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    InsufficientBalance(String),
    Conflict(String),
    InternalError(String),
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message),
            request_id,
        }
    }

    /// Map an engine error onto the HTTP taxonomy
    pub fn from_engine(request_id: String, error: BingoError) -> Self {
        let message = error.to_string();
        let kind = match error {
            BingoError::Game(GameError::NotFound(_)) => ApiErrorKind::NotFound(message),
            BingoError::Game(GameError::NotJoinable { .. } | GameError::InvalidTransition { .. }) => {
                ApiErrorKind::Conflict(message)
            }
            BingoError::Ledger(LedgerError::InsufficientBalance { .. }) => {
                ApiErrorKind::InsufficientBalance(message)
            }
            BingoError::Ledger(_) | BingoError::Configuration(_) => ApiErrorKind::BadRequest(message),
            BingoError::Storage(StorageError::PersistenceFailure(_)) => ApiErrorKind::ServiceUnavailable(message),
            _ => ApiErrorKind::InternalError(message),
        };
        Self { kind, request_id }
    }

    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiErrorKind::InsufficientBalance(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE", msg)
            }
            ApiErrorKind::Conflict(msg) => (StatusCode::CONFLICT, "GAME_NOT_JOINABLE", msg),
            ApiErrorKind::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiErrorKind::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, code, message) = self.parts();
        write!(f, "[{}] {}: {}", self.request_id, code, message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_status() {
        let cases = [
            (BingoError::Game(GameError::NotFound("g".into())), StatusCode::NOT_FOUND),
            (
                BingoError::Game(GameError::NotJoinable {
                    game_id: "g".into(),
                    status: "active".into(),
                }),
                StatusCode::CONFLICT,
            ),
            (
                BingoError::Ledger(LedgerError::InsufficientBalance {
                    user_id: "u".into(),
                    balance: 0,
                    required: 100,
                }),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                BingoError::Storage(StorageError::PersistenceFailure("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BingoError::Storage(StorageError::ReadFailed("io".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let response = ApiError::from_engine("req-1".into(), error).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
