use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::EngineError;
use crate::project::ProjectError;
use crate::schema::ValidationError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Error type for all handlers; rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            log::error!("request failed: {}", self.message);
        } else {
            log::debug!("request rejected ({}): {}", self.status, self.message);
        }
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<ProjectError> for ApiError {
    fn from(e: ProjectError) -> Self {
        Self::conflict(e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AlreadyRunning(_) | EngineError::Project(_) => StatusCode::CONFLICT,
            EngineError::Tracker(_) | EngineError::StageFailed { .. } | EngineError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectStatus;

    #[test]
    fn engine_errors_map_to_status() {
        let cases = [
            (EngineError::ProjectNotFound("p".into()), StatusCode::NOT_FOUND),
            (EngineError::AlreadyRunning("p".into()), StatusCode::CONFLICT),
            (
                EngineError::Project(ProjectError::InvalidTransition {
                    project_id: "p".into(),
                    from: ProjectStatus::Archived,
                    to: ProjectStatus::InProgress,
                }),
                StatusCode::CONFLICT,
            ),
            (
                EngineError::StageFailed {
                    stage_id: "outline".into(),
                    reason: "bad".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }

    #[test]
    fn validation_is_bad_request() {
        let err = ApiError::from(ValidationError {
            field: "top_p",
            message: "must be between 0 and 1".into(),
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "top_p must be between 0 and 1");
    }
}
