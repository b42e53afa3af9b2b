//! Server error type and its HTTP mapping

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use thiserror::Error;

/// Errors raised while starting the server or handling a request
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema error: {0}")]
    Schema(#[from] almadar_script::Error),

    #[error("Database error: {0}")]
    Database(#[from] almadar_db::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] almadar_core::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::Runtime(almadar_core::Error::OrbitalNotFound(_)) => StatusCode::NOT_FOUND,
            ServerError::Runtime(almadar_core::Error::Validation(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self.status() {
            StatusCode::BAD_REQUEST => "BAD_REQUEST",
            StatusCode::NOT_FOUND => "NOT_FOUND",
            StatusCode::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
            _ => "INTERNAL_ERROR",
        }
    }

    /// `{"success": false, "error": {code, message}}` with the mapped status
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({
            "success": false,
            "error": {"code": self.code(), "message": self.to_string()},
        });
        crate::router::json_response(self.status(), &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServerError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServerError::Runtime(almadar_core::Error::OrbitalNotFound("Tasks".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ServerError::Config("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ServerError::MethodNotAllowed.code(), "METHOD_NOT_ALLOWED");
    }
}
