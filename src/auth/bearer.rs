//! Bearer token extraction

use super::strip_scheme;

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// Returns `None` if the header is absent, uses another scheme, or carries
/// an empty token.
#[must_use]
pub fn extract_bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| strip_scheme(h.trim(), "Bearer"))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
