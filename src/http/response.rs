//! API error responses.
//!
//! # Design Decisions
//! - Every error body is `{"error": "...", "status": <code>}`
//! - Kubernetes API status codes pass through (404, 409, 422, ...); transport
//!   failures become 503 so clients can tell "cluster said no" from
//!   "cluster unreachable"

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("workflow {0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{message}")]
    Cluster { status: StatusCode, message: String },

    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Cluster { status, .. } => *status,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<kube::Error> for ApiError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => ApiError::Cluster {
                status: StatusCode::from_u16(resp.code).unwrap_or(StatusCode::BAD_GATEWAY),
                message: resp.message,
            },
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Workflow API request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    #[test]
    fn test_api_status_passes_through() {
        let err = ApiError::from(kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "workflows.argoproj.io \"wf\" already exists".into(),
            reason: "AlreadyExists".into(),
            code: 409,
        }));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(ApiError::NotFound("wf".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::BadRequest("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unavailable("down".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
