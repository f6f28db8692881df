//! Error types for the simple API server
//!
//! Two layers:
//! - [`Error`] covers startup, configuration and trust material. A
//!   configuration error is fatal: the process does not start.
//! - [`ApiError`] is what a client sees. It always renders as
//!   `{"error": <code>, "error_description": <text>}` and never carries
//!   internal detail such as file paths.

use std::io;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for the simple API server
pub type Result<T> = std::result::Result<T, Error>;

/// Server errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid settings, unreadable TLS material)
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS error while building a trust context
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Realm advertised in every authentication challenge.
pub const REALM: &str = "simple-api-server";

/// Stable machine-readable error codes used in response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed request, header or body
    InvalidRequest,
    /// Missing or wrong client credentials
    InvalidClient,
    /// Missing, unknown or expired bearer token
    InvalidToken,
    /// Token request with a grant type other than `client_credentials`
    UnsupportedGrantType,
    /// No resource at the requested path
    NotFound,
}

impl ErrorCode {
    /// Wire representation of the code
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidToken => "invalid_token",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::NotFound => "not_found",
        }
    }
}

/// `WWW-Authenticate` challenge paired with a 401 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    /// Bearer token challenge
    Bearer,
    /// HTTP Basic challenge
    Basic,
    /// Both schemes, used when either credential type is accepted
    BearerOrBasic,
}

impl Challenge {
    /// Header value for `WWW-Authenticate`
    #[must_use]
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Bearer => r#"Bearer realm="simple-api-server", error="invalid_token""#,
            Self::Basic => r#"Basic realm="simple-api-server""#,
            Self::BearerOrBasic => {
                r#"Bearer realm="simple-api-server", error="invalid_token", Basic realm="simple-api-server""#
            }
        }
    }
}

/// Client-facing error, rendered as a JSON body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 400: malformed body, header or form
    #[error("{description}")]
    BadRequest {
        /// Error code (`invalid_request` or `unsupported_grant_type`)
        code: ErrorCode,
        /// Human-readable description
        description: String,
    },

    /// 401: missing, invalid or expired credential
    #[error("{description}")]
    Unauthorized {
        /// Error code
        code: ErrorCode,
        /// Human-readable description
        description: String,
        /// Challenge advertised in `WWW-Authenticate`
        challenge: Challenge,
    },

    /// 404: resource or endpoint not found
    #[error("{0}")]
    NotFound(String),

    /// 405: method not accepted on this path
    #[error("{description}")]
    MethodNotAllowed {
        /// Value of the `Allow` header
        allow: &'static str,
        /// Human-readable description
        description: String,
    },
}

impl ApiError {
    /// 400 `invalid_request`
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::BadRequest {
            code: ErrorCode::InvalidRequest,
            description: description.into(),
        }
    }

    /// 401 with the given code and challenge
    pub fn unauthorized(
        code: ErrorCode,
        description: impl Into<String>,
        challenge: Challenge,
    ) -> Self {
        Self::Unauthorized {
            code,
            description: description.into(),
            challenge,
        }
    }

    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    /// Machine-readable code for the body
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::BadRequest { code, .. } | Self::Unauthorized { code, .. } => *code,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::MethodNotAllowed { .. } => ErrorCode::InvalidRequest,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code().as_str(),
            "error_description": self.to_string(),
        }));
        let mut response = (self.status(), body).into_response();
        let headers = response.headers_mut();
        match self {
            Self::Unauthorized { challenge, .. } => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static(challenge.header_value()),
                );
            }
            Self::MethodNotAllowed { allow, .. } => {
                headers.insert(header::ALLOW, HeaderValue::from_static(allow));
            }
            Self::BadRequest { .. } | Self::NotFound(_) => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_values_name_the_realm() {
        for challenge in [Challenge::Bearer, Challenge::Basic, Challenge::BearerOrBasic] {
            assert!(challenge.header_value().contains(REALM));
        }
        assert!(Challenge::BearerOrBasic.header_value().starts_with("Bearer "));
        assert!(Challenge::BearerOrBasic.header_value().contains("Basic realm="));
    }

    #[test]
    fn unauthorized_carries_challenge_header() {
        let response = ApiError::unauthorized(
            ErrorCode::InvalidClient,
            "basic authorization credentials are invalid",
            Challenge::Basic,
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Basic realm="simple-api-server""#
        );
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let response = ApiError::MethodNotAllowed {
            allow: "POST",
            description: "/token only accepts POST".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[test]
    fn codes_map_to_wire_strings() {
        assert_eq!(ApiError::invalid_request("x").code().as_str(), "invalid_request");
        assert_eq!(ApiError::NotFound("x".into()).code().as_str(), "not_found");
        assert_eq!(
            ErrorCode::UnsupportedGrantType.as_str(),
            "unsupported_grant_type"
        );
    }
}
