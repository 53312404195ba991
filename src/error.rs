use crate::batch::{ImportState, Operation};
use crate::models::DraftError;
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

// Row-level problems are data on the preview and never end up here.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("collaborator call failed: {0}")]
    Transport(String),
    #[error("file could not be decoded: {0}")]
    Decode(String),
    #[error("question store rejected the request: {0}")]
    Rejected(String),
    #[error("cannot {action} while the import is {state}")]
    InvalidTransition {
        state: ImportState,
        action: &'static str,
    },
    #[error("a {0} call is still outstanding")]
    Busy(Operation),
    #[error("result discarded because the import was cancelled")]
    Stale,
    #[error("no valid rows are selected")]
    NothingSelected,
    #[error("row {0} is not part of this batch")]
    UnknownRow(usize),
}

impl ImportError {
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Transport(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Decode(_) => (StatusCode::UNPROCESSABLE_ENTITY, "DECODE_ERROR"),
            Self::Rejected(_) | Self::InvalidTransition { .. } | Self::Busy(_) | Self::Stale => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            Self::NothingSelected => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Self::UnknownRow(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<&DraftError> for ErrorDetail {
    fn from(err: &DraftError) -> Self {
        Self {
            field: err.field(),
            issue: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn validation(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id)
    }

    pub fn not_found(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message, request_id)
    }

    pub fn from_import(err: ImportError, request_id: impl Into<String>) -> Self {
        let (status, code) = err.status();
        Self::new(status, code, err.to_string(), request_id)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_errors_map_to_statuses() {
        let cases = [
            (ImportError::Transport("down".into()), StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            (ImportError::Decode("bad".into()), StatusCode::UNPROCESSABLE_ENTITY, "DECODE_ERROR"),
            (ImportError::Stale, StatusCode::CONFLICT, "CONFLICT"),
            (ImportError::Busy(Operation::Preview), StatusCode::CONFLICT, "CONFLICT"),
            (ImportError::NothingSelected, StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (ImportError::UnknownRow(7), StatusCode::NOT_FOUND, "NOT_FOUND"),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status(), (status, code));
            let app = AppError::from_import(err, "r1");
            assert_eq!((app.status, app.code), (status, code));
            assert_eq!(app.request_id, "r1");
        }
    }

    #[test]
    fn draft_errors_become_details() {
        let detail = ErrorDetail::from(&DraftError::TooFewOptions);
        assert_eq!(detail.field, "languages.en.options");
        assert_eq!(detail.issue, "fewer than 2 options");
    }
}
