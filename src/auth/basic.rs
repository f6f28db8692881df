//! HTTP Basic credential parsing

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use super::strip_scheme;

/// Username and password from an `Authorization: Basic` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    /// Username (may be empty)
    pub username: String,
    /// Password (may be empty)
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The header claimed the Basic scheme but its payload is unusable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid basic authorization header")]
pub struct MalformedBasicHeader;

/// Parse an `Authorization` header value as Basic credentials.
///
/// Returns `Ok(None)` when the header is absent or uses another scheme.
/// Empty payload, invalid base64, non-UTF-8 content and a missing `:`
/// separator are all [`MalformedBasicHeader`].
pub fn parse_basic_header(
    header: Option<&str>,
) -> Result<Option<BasicCredentials>, MalformedBasicHeader> {
    let Some(encoded) = header.and_then(|h| strip_scheme(h.trim(), "Basic")) else {
        return Ok(None);
    };

    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(MalformedBasicHeader);
    }

    let decoded = STANDARD.decode(encoded).map_err(|_| MalformedBasicHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| MalformedBasicHeader)?;
    let (username, password) = decoded.split_once(':').ok_or(MalformedBasicHeader)?;

    Ok(Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    }))
}
