use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;

/// The cardinal error kinds the gatekeeper, dispatcher, and handlers can raise.
///
/// Each variant carries its own human-readable detail so the HTTP layer and
/// the webhook event's `error_message` can both be populated from the same
/// value without reformatting.
#[derive(Debug)]
pub enum AppError {
    /// Payload violates the expected schema, references an unknown entity,
    /// or cross-references an entity inconsistently.
    InvalidPayload(String),

    /// A repeat delivery of a known `(provider, event_id)` whose timestamp
    /// or signature no longer matches the stored event.
    ReplayAttack(String),

    /// A referenced id (customer, subscription, event) does not exist.
    NotFound(String),

    /// Gatekeeper rejection: unknown provider, missing headers, bad
    /// timestamp, or a signature that matched no candidate secret.
    Unauthorized(String),

    /// Gatekeeper rejection: caller IP not in the configured allowlist, or
    /// a replayed event being reported back to the caller.
    Forbidden(String),

    /// Gatekeeper rejection: the sliding-window rate limit was exceeded.
    RateLimited,

    /// The verified body was not valid UTF-8.
    BadEncoding,

    /// Anything uncaught. Surfaces as 500; if the event was already
    /// inserted it is marked failed and enters the retry queue.
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidPayload(msg) => write!(f, "{msg}"),
            AppError::ReplayAttack(msg) => write!(f, "{msg}"),
            AppError::NotFound(msg) => write!(f, "{msg}"),
            AppError::Unauthorized(msg) => write!(f, "{msg}"),
            AppError::Forbidden(msg) => write!(f, "{msg}"),
            AppError::RateLimited => write!(f, "rate limit exceeded"),
            AppError::BadEncoding => write!(f, "invalid webhook body encoding"),
            AppError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl StdError for AppError {}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            AppError::BadEncoding => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::ReplayAttack(_) => StatusCode::FORBIDDEN,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = self.to_string();
        tracing::warn!(status = %status, detail = %detail, "request rejected");
        (status, axum::Json(ErrorBody { detail })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
