//! Error taxonomy and the HTTP-boundary error envelope.
//!
//! `ApiError` follows a constructor-per-code-class shape with an
//! `IntoApiError` extension trait, reporting `{success:false, message,
//! error_code}` using a small fixed taxonomy instead of free-form codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// The fixed error-code taxonomy. No other codes are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    TimeoutError,
    ConnectionError,
    HttpError,
    MissingKeyError,
    TypeError,
    RuntimeError,
    FileNotFoundError,
    PermissionError,
    RateLimited,
    ConversationNotFound,
    UnsupportedMode,
    StreamError,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::HttpError => "HTTP_ERROR",
            Self::MissingKeyError => "MISSING_KEY_ERROR",
            Self::TypeError => "TYPE_ERROR",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::FileNotFoundError => "FILE_NOT_FOUND_ERROR",
            Self::PermissionError => "PERMISSION_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            Self::UnsupportedMode => "UNSUPPORTED_MODE",
            Self::StreamError => "STREAM_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError => StatusCode::BAD_REQUEST,
            Self::TimeoutError => StatusCode::GATEWAY_TIMEOUT,
            Self::ConnectionError => StatusCode::BAD_GATEWAY,
            Self::HttpError => StatusCode::BAD_GATEWAY,
            Self::MissingKeyError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::TypeError => StatusCode::BAD_REQUEST,
            Self::RuntimeError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::FileNotFoundError => StatusCode::NOT_FOUND,
            Self::PermissionError => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ConversationNotFound => StatusCode::NOT_FOUND,
            Self::UnsupportedMode => StatusCode::BAD_REQUEST,
            Self::StreamError => StatusCode::CONFLICT,
            Self::UnknownError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-adapter failure. Never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("adapter call timed out")]
    Timeout,
    #[error("connection to upstream failed: {0}")]
    Connection(String),
    #[error("upstream returned HTTP {0}: {1}")]
    HttpStatus(u16, String),
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl AdapterError {
    /// Maps an adapter failure to a stable error code (the error classifier).
    pub fn classify(&self) -> ErrorCode {
        match self {
            Self::Timeout => ErrorCode::TimeoutError,
            Self::Connection(_) => ErrorCode::ConnectionError,
            Self::HttpStatus(_, _) => ErrorCode::HttpError,
            Self::Decode(_) => ErrorCode::TypeError,
            Self::Upstream(_) => ErrorCode::RuntimeError,
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdapterError::Timeout
        } else if e.is_connect() {
            AdapterError::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            AdapterError::HttpStatus(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            AdapterError::Decode(e.to_string())
        } else {
            AdapterError::Upstream(e.to_string())
        }
    }
}

/// Store-level failures (C3).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),
    #[error("conversation {0} already has a stream in progress")]
    LockContention(String),
}

impl StoreError {
    pub fn classify(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::ConversationNotFound,
            Self::UnsupportedMode(_) => ErrorCode::UnsupportedMode,
            Self::LockContention(_) => ErrorCode::StreamError,
        }
    }
}

/// Isolation-layer failures (C4): circuit breaker / rate limiter denials.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    #[error("circuit breaker open for {service}")]
    CircuitOpen { service: String },
    #[error("rate limit exceeded for {key}")]
    RateLimited { key: String },
}

impl IsolationError {
    pub fn classify(&self) -> ErrorCode {
        match self {
            Self::CircuitOpen { .. } => ErrorCode::ConnectionError,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
        }
    }
}

/// Errors a stage can fail with once all local fallbacks are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Isolation(#[from] IsolationError),
    #[error("{0}")]
    Other(String),
}

impl StageError {
    pub fn classify(&self) -> ErrorCode {
        match self {
            Self::Adapter(e) => e.classify(),
            Self::Isolation(e) => e.classify(),
            Self::Other(_) => ErrorCode::RuntimeError,
        }
    }
}

/// The HTTP-boundary error envelope: `{success:false, message, error_code}`.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub error_code: ErrorCode,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_code,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConversationNotFound, message)
    }

    pub fn unsupported_mode(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedMode, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RateLimited, message)
    }

    pub fn stream_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let code = e.classify();
        ApiError::new(code, e.to_string())
    }
}

impl From<IsolationError> for ApiError {
    fn from(e: IsolationError) -> Self {
        let code = e.classify();
        ApiError::new(code, e.to_string())
    }
}

impl From<StageError> for ApiError {
    fn from(e: StageError) -> Self {
        let code = e.classify();
        ApiError::new(code, e.to_string())
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    success: bool,
    message: String,
    error_code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error_code.status_code();
        let body = ApiErrorBody {
            success: false,
            message: self.message,
            error_code: self.error_code.as_str(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Extension trait for converting fallible results into [`ApiError`] at the
/// HTTP boundary.
pub trait IntoApiError<T> {
    fn into_api_error(self, code: ErrorCode, message: &str) -> ApiResult<T>;
}

impl<T, E: std::fmt::Debug> IntoApiError<T> for Result<T, E> {
    fn into_api_error(self, code: ErrorCode, message: &str) -> ApiResult<T> {
        self.map_err(|e| {
            tracing::error!("{}: {:?}", message, e);
            ApiError::new(code, message.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_timeout_classifies_to_timeout_error() {
        assert_eq!(AdapterError::Timeout.classify(), ErrorCode::TimeoutError);
    }

    #[test]
    fn store_not_found_classifies_to_conversation_not_found() {
        let e = StoreError::NotFound("x".into());
        assert_eq!(e.classify(), ErrorCode::ConversationNotFound);
    }

    #[test]
    fn lock_contention_classifies_to_stream_error() {
        let e = StoreError::LockContention("x".into());
        assert_eq!(e.classify(), ErrorCode::StreamError);
    }

    #[test]
    fn circuit_open_classifies_to_connection_error() {
        let e = IsolationError::CircuitOpen {
            service: "chat".into(),
        };
        assert_eq!(e.classify(), ErrorCode::ConnectionError);
    }
}
