use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failure answers of the mock backend. Every variant renders as `{ "message": ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    Unauthorized,
    BadRequest(String),
    NotFound(&'static str),
    Conflict(String),
    /// Fault injected through `MockBackend::fail_next`.
    Injected(StatusCode),
}

impl BackendError {
    pub fn status(&self) -> StatusCode {
        match self {
            BackendError::Unauthorized => StatusCode::UNAUTHORIZED,
            BackendError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BackendError::NotFound(_) => StatusCode::NOT_FOUND,
            BackendError::Conflict(_) => StatusCode::CONFLICT,
            BackendError::Injected(status) => *status,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BackendError::Unauthorized => "missing or invalid bearer token".to_string(),
            BackendError::BadRequest(message) | BackendError::Conflict(message) => message.clone(),
            BackendError::NotFound(what) => format!("{what} not found"),
            BackendError::Injected(status) => status.canonical_reason().unwrap_or("injected failure").to_string(),
        }
    }
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "answering with server error");
        } else {
            tracing::debug!(status = status.as_u16(), message = %self.message(), "rejecting request");
        }
        (status, Json(json!({ "message": self.message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(BackendError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(BackendError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(BackendError::NotFound("project").status(), StatusCode::NOT_FOUND);
        assert_eq!(BackendError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            BackendError::Injected(StatusCode::SERVICE_UNAVAILABLE).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn messages() {
        assert_eq!(BackendError::NotFound("organization").message(), "organization not found");
        assert_eq!(
            BackendError::Injected(StatusCode::SERVICE_UNAVAILABLE).message(),
            "Service Unavailable"
        );
    }
}
