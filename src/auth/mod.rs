//! Request-layer authentication
//!
//! Supports:
//! - OAuth2 bearer tokens issued by the `/token` endpoint
//! - HTTP Basic credentials checked against a static username/password
//! - Both at once, selected by the `Authorization` scheme
//!
//! Mutual TLS is enforced earlier, at connection accept time (see
//! [`crate::mtls`]).

pub mod basic;
pub mod bearer;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::error::{ApiError, Challenge, ErrorCode};
use crate::path::NormalizedPath;
use crate::server::{HEALTH_PATH, TOKEN_PATH};
use crate::token::TokenRegistry;

pub use basic::{BasicCredentials, MalformedBasicHeader, parse_basic_header};
pub use bearer::extract_bearer_token;

/// Resolved request-layer authentication settings
#[derive(Clone)]
pub struct AuthSettings {
    /// Bearer enforcement and the `/token` endpoint
    pub oauth2: bool,
    /// Basic enforcement
    pub basic: bool,
    /// Static OAuth2 client id
    pub client_id: String,
    /// Static OAuth2 client secret
    pub client_secret: String,
    /// Basic auth username
    pub basic_username: String,
    /// Basic auth password
    pub basic_password: String,
    /// Lifetime of issued tokens
    pub token_ttl: Duration,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("oauth2", &self.oauth2)
            .field("basic", &self.basic)
            .field("client_id", &self.client_id)
            .field("basic_username", &self.basic_username)
            .field("token_ttl", &self.token_ttl)
            .finish_non_exhaustive()
    }
}

/// Which validator a request is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAuth {
    /// Neither scheme enforced
    Open,
    /// Bearer only
    Bearer,
    /// Basic only
    Basic,
    /// Either scheme, chosen by the header
    BearerOrBasic,
}

/// Decides whether a request carries a valid credential.
#[derive(Debug)]
pub struct Gatekeeper {
    settings: AuthSettings,
    tokens: Arc<TokenRegistry>,
}

impl Gatekeeper {
    /// Create a gatekeeper validating bearer tokens against `tokens`.
    #[must_use]
    pub fn new(settings: AuthSettings, tokens: Arc<TokenRegistry>) -> Self {
        Self { settings, tokens }
    }

    /// Settings this gatekeeper enforces
    #[must_use]
    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Token registry backing bearer validation
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenRegistry> {
        &self.tokens
    }

    /// Enforcement mode derived from the enable flags
    #[must_use]
    pub fn mode(&self) -> RequestAuth {
        match (self.settings.oauth2, self.settings.basic) {
            (false, false) => RequestAuth::Open,
            (true, false) => RequestAuth::Bearer,
            (false, true) => RequestAuth::Basic,
            (true, true) => RequestAuth::BearerOrBasic,
        }
    }

    /// Check the `Authorization` header of a request.
    ///
    /// With a single scheme enabled the request always goes to that
    /// validator, whatever scheme the header names. With both enabled the
    /// header scheme picks the validator and any other scheme is rejected.
    pub fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let raw = authorization_header(headers);
        let header = raw.as_deref().map(str::trim);

        match self.mode() {
            RequestAuth::Open => Ok(()),
            RequestAuth::Bearer => self.validate_bearer(header),
            RequestAuth::Basic => self.validate_basic(header),
            RequestAuth::BearerOrBasic => match header {
                Some(h) if strip_scheme(h, "Bearer").is_some() => self.validate_bearer(header),
                Some(h) if strip_scheme(h, "Basic").is_some() => self.validate_basic(header),
                _ => Err(ApiError::unauthorized(
                    ErrorCode::InvalidRequest,
                    "authorization header must use Bearer or Basic scheme",
                    Challenge::BearerOrBasic,
                )),
            },
        }
    }

    /// Whether `client_id`/`client_secret` match the configured OAuth2 client.
    #[must_use]
    pub fn client_credentials_match(&self, client_id: &str, client_secret: &str) -> bool {
        constant_time_eq(client_id, &self.settings.client_id)
            & constant_time_eq(client_secret, &self.settings.client_secret)
    }

    fn validate_bearer(&self, header: Option<&str>) -> Result<(), ApiError> {
        let Some(token) = extract_bearer_token(header) else {
            return Err(invalid_token("missing bearer token"));
        };
        if self.tokens.validate(token) {
            Ok(())
        } else {
            Err(invalid_token("token is invalid or expired"))
        }
    }

    fn validate_basic(&self, header: Option<&str>) -> Result<(), ApiError> {
        let credentials = parse_basic_header(header).map_err(|e| {
            ApiError::unauthorized(ErrorCode::InvalidRequest, e.to_string(), Challenge::Basic)
        })?;

        let Some(credentials) = credentials.filter(|c| {
            !c.username.is_empty() && !c.password.is_empty()
        }) else {
            return Err(invalid_client("missing basic authorization credentials"));
        };

        let matches = constant_time_eq(&credentials.username, &self.settings.basic_username)
            & constant_time_eq(&credentials.password, &self.settings.basic_password);
        if matches {
            Ok(())
        } else {
            Err(invalid_client("basic authorization credentials are invalid"))
        }
    }
}

/// Whether a request must pass the gatekeeper.
///
/// The token endpoint runs its own credential exchange, and health checks
/// and `OPTIONS` discovery are public.
#[must_use]
pub fn requires_authentication(method: &Method, path: &NormalizedPath) -> bool {
    if path.as_str() == TOKEN_PATH || *method == Method::OPTIONS {
        return false;
    }
    let is_health_read = path.as_str() == HEALTH_PATH
        && (*method == Method::GET || *method == Method::HEAD);
    !is_health_read
}

/// Authentication middleware
///
/// Expects the [`NormalizedPath`] extension inserted by the path
/// normalization layer.
pub async fn auth_middleware(
    State(gatekeeper): State<Arc<Gatekeeper>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request
        .extensions()
        .get::<NormalizedPath>()
        .cloned()
        .unwrap_or_else(|| NormalizedPath::normalize(request.uri().path()));

    if !requires_authentication(request.method(), &path) {
        return next.run(request).await;
    }

    match gatekeeper.authorize(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            debug!(
                method = %request.method(),
                path = %path,
                error = err.code().as_str(),
                "Rejected unauthenticated request"
            );
            err.into_response()
        }
    }
}

/// The `Authorization` header as text.
///
/// Bytes outside visible ASCII (obs-text) are replaced rather than making the
/// header look absent, so a garbled credential is reported as malformed.
pub(crate) fn authorization_header(headers: &HeaderMap) -> Option<Cow<'_, str>> {
    headers
        .get(header::AUTHORIZATION)
        .map(|v| String::from_utf8_lossy(v.as_bytes()))
}

/// Strip a case-insensitive `<scheme> ` prefix from a header value.
pub(crate) fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let (name, rest) = header.split_at_checked(scheme.len())?;
    if name.eq_ignore_ascii_case(scheme) {
        rest.strip_prefix(' ')
    } else {
        None
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn invalid_token(description: &str) -> ApiError {
    ApiError::unauthorized(ErrorCode::InvalidToken, description, Challenge::Bearer)
}

fn invalid_client(description: &str) -> ApiError {
    ApiError::unauthorized(ErrorCode::InvalidClient, description, Challenge::Basic)
}
