// Error taxonomy - the single point where a failure kind becomes an HTTP status.
//
// Every component returns `Result<T, AppError>` (or a narrower error that
// converts into it via `From`) so the HTTP Edge is the only place that maps a
// failure to a status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotReady(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        AppError::NotReady(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AppError::Timeout(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        AppError::Upstream(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::NotReady(_) => "not_ready",
            AppError::Timeout(_) => "timeout",
            AppError::Upstream(_) => "upstream",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    kind: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), detail = %self, "request failed");
        } else {
            tracing::warn!(kind = self.kind(), detail = %self, "request rejected");
        }
        let body = ErrorBody {
            detail: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            AppError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::not_ready("x").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::timeout("x").status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::upstream("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
