//! Errors returned by the control API and their JSON rendering.

use crate::types::{ErrorBody, ErrorDetail};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Request failure, mapped one-to-one onto an HTTP status and error code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    Unauthorized(String),

    #[error("The failover ip is already routed to the selected server")]
    AlreadyRouted,

    #[error("The failover ip can not be set up due to an active lock.")]
    Locked,

    #[error("{0}")]
    Routing(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        ApiError::Unauthorized(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::AlreadyRouted | ApiError::Locked => StatusCode::CONFLICT,
            ApiError::Routing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Symbolic error code of the failover API.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::AlreadyRouted => "FAILOVER_ALREADY_ROUTED",
            ApiError::Locked => "FAILOVER_LOCKED",
            ApiError::Routing(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                status: self.status().as_u16(),
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
