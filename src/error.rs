use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("study {study} with load uuid {uuid} is already loaded")]
    AlreadyLoaded { study: String, uuid: String },

    #[error("study {study} with load uuid {uuid} is partially loaded, discard and reload")]
    PartiallyLoaded { study: String, uuid: String },

    #[error("inconsistent partition: {0}")]
    Inconsistent(String),

    #[error("partition missing on disk: {0}")]
    MissingPartition(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl Error {
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::InvalidInput(_) => "BadRequest",
            Error::InvalidRange(_) => "BadRequest",
            Error::AlreadyLoaded { .. } => "AlreadyLoaded",
            Error::PartiallyLoaded { .. } => "PartiallyLoaded",
            Error::Inconsistent(_) => "Inconsistent",
            Error::MissingPartition(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => "InternalError",
        }
    }

    /// Expected conditions the caller can correct and retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidInput(_) | Error::InvalidRange(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::InvalidRange(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyLoaded { .. } | Error::PartiallyLoaded { .. } => StatusCode::CONFLICT,
            Error::Inconsistent(_)
            | Error::MissingPartition(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if !self.is_recoverable() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_type(),
                message: self.to_string(),
            },
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::NotFound("chromosome 24".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::InvalidRange("p_lower > p_upper".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::AlreadyLoaded {
                study: "s1".into(),
                uuid: "u".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::Inconsistent("size".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::InvalidInput("x".into()).is_recoverable());
        assert!(!Error::PartiallyLoaded {
            study: "s1".into(),
            uuid: "u".into()
        }
        .is_recoverable());
        assert!(!Error::MissingPartition(PathBuf::from("/1/100")).is_recoverable());
    }
}
