//! Error types for the Valtro API client.
//!
//! # Design
//! Every failure the data layer can surface is one `ApiError`. Each variant
//! answers `status()`, `status_text()` and `body()` so callers can inspect a
//! failure without caring whether it came from the transport, the backend, or
//! a client-side check. Synthetic statuses follow the browser conventions the
//! backend contract was written against: 401 for a missing token, 408 for a
//! client-side timeout, 0 when no response was received at all.

use thiserror::Error;

/// Errors returned by `ApiClient` operations and the query layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The token provider had no token. No request was sent.
    #[error("authentication token not available")]
    Unauthorized,

    /// The request did not complete within the configured timeout and was aborted.
    #[error("request timeout")]
    Timeout,

    /// Transport-level failure: DNS, connection refused, reset.
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-2xx status.
    #[error("request failed: {status} {status_text}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    /// A 2xx response without a JSON content type.
    #[error("invalid response format")]
    InvalidResponseFormat { status: u16, status_text: String },

    /// A 2xx JSON response that does not match the expected envelope.
    #[error("deserialization failed: {message}")]
    Deserialization { status: u16, message: String },

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A name was rejected before anything was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ApiError {
    /// HTTP status of the failure, or the synthetic status for client-side failures.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Unauthorized => 401,
            ApiError::Timeout => 408,
            ApiError::Http { status, .. }
            | ApiError::InvalidResponseFormat { status, .. }
            | ApiError::Deserialization { status, .. } => *status,
            ApiError::Network(_) | ApiError::Serialization(_) | ApiError::Validation(_) => 0,
        }
    }

    pub fn status_text(&self) -> &str {
        match self {
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Timeout => "Request Timeout",
            ApiError::Network(_) => "Network Error",
            ApiError::Http { status_text, .. } | ApiError::InvalidResponseFormat { status_text, .. } => {
                status_text
            }
            ApiError::Deserialization { .. } => "Invalid Response Body",
            ApiError::Serialization(_) => "Serialization Error",
            ApiError::Validation(_) => "Validation Error",
        }
    }

    /// Raw response body, when the backend sent one.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Http { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized) || self.status() == 401
    }

    pub fn is_server_error(&self) -> bool {
        (500..=599).contains(&self.status())
    }

    pub fn is_client_error(&self) -> bool {
        (400..=499).contains(&self.status())
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "Invalid input. Please check the name and try again.",
            ApiError::Unauthorized => "Your session has expired. Please sign in again.",
            ApiError::Network(_) | ApiError::Timeout => {
                "Network error. Please check your connection and try again."
            }
            err => match err.status() {
                400 => "Invalid input. Please check your organization and project names.",
                409 => "Organization name already exists. Please choose a different name.",
                500..=599 => "Server error. Please try again later.",
                _ => "Something went wrong. Please try again.",
            },
        }
    }
}

/// Why a name was rejected by `validate_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    Empty,
    TooShort,
    TooLong,
    InvalidCharacters,
}

/// A client-side name check failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {}", describe(.rule))]
pub struct ValidationError {
    pub field: &'static str,
    pub rule: NameRule,
}

fn describe(rule: &NameRule) -> &'static str {
    match rule {
        NameRule::Empty => "is required",
        NameRule::TooShort => "must be at least 2 characters",
        NameRule::TooLong => "must be at most 50 characters",
        NameRule::InvalidCharacters => "contains invalid characters",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_statuses() {
        assert_eq!(ApiError::Unauthorized.status(), 401);
        assert_eq!(ApiError::Timeout.status(), 408);
        assert_eq!(ApiError::Network("refused".into()).status(), 0);
        assert_eq!(ApiError::Timeout.status_text(), "Request Timeout");
    }

    #[test]
    fn http_error_preserves_status_and_body() {
        let err = ApiError::Http {
            status: 409,
            status_text: "Conflict".into(),
            body: r#"{"message":"exists"}"#.into(),
        };
        assert_eq!(err.status(), 409);
        assert_eq!(err.status_text(), "Conflict");
        assert_eq!(err.body(), Some(r#"{"message":"exists"}"#));
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert_eq!(err.to_string(), "request failed: 409 Conflict");
    }

    #[test]
    fn empty_body_is_none() {
        let err = ApiError::Http {
            status: 503,
            status_text: "Service Unavailable".into(),
            body: String::new(),
        };
        assert_eq!(err.body(), None);
        assert!(err.is_server_error());
    }

    #[test]
    fn user_messages_follow_status() {
        let http = |status| ApiError::Http {
            status,
            status_text: String::new(),
            body: String::new(),
        };
        assert!(http(400).user_message().starts_with("Invalid input"));
        assert!(http(409).user_message().contains("already exists"));
        assert!(http(502).user_message().starts_with("Server error"));
        assert!(http(418).user_message().starts_with("Something went wrong"));
        assert!(ApiError::Network("reset".into()).user_message().starts_with("Network error"));
    }

    #[test]
    fn validation_error_display() {
        let err = ValidationError {
            field: "organization_name",
            rule: NameRule::TooLong,
        };
        assert_eq!(err.to_string(), "organization_name: must be at most 50 characters");
        let api: ApiError = err.into();
        assert_eq!(api.status(), 0);
        assert_eq!(api.status_text(), "Validation Error");
    }
}
