use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::models::booking::BookingStatus;

/// Rejections raised by the booking state machine.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransitionError {
    #[error("cannot move a booking from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("a final price is required to confirm a booking")]
    MissingPrice,

    #[error("final price must be a non-negative amount, got {0}")]
    InvalidPrice(f64),

    #[error("invalid cancellation: {0}")]
    InvalidCancellationReason(String),

    #[error("booking is already {0} and cannot change")]
    TerminalState(BookingStatus),
}

impl TransitionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransitionError::InvalidTransition { .. } => "invalid_transition",
            TransitionError::MissingPrice => "missing_price",
            TransitionError::InvalidPrice(_) => "invalid_price",
            TransitionError::InvalidCancellationReason(_) => "invalid_cancellation_reason",
            TransitionError::TerminalState(_) => "terminal_state",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Transition(err) => {
                let body = Json(json!({
                    "error": err.to_string(),
                    "code": err.code(),
                }));
                return (StatusCode::UNPROCESSABLE_ENTITY, body).into_response();
            }
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
