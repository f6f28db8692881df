//! Request path normalization
//!
//! Every resource is keyed by a [`NormalizedPath`]: it starts with `/`, has
//! no trailing `/` (except the root itself), is percent-decoded, and carries
//! no query or fragment.

use std::fmt;

use percent_encoding::percent_decode_str;

/// Canonical, decoded request path used as the resource store key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NormalizedPath(String);

impl NormalizedPath {
    /// Normalize a raw request target (origin-form or absolute-form, with
    /// optional query and fragment).
    ///
    /// Malformed percent-escapes are passed through undecoded and invalid
    /// UTF-8 produced by decoding is replaced, so this never fails.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        let path = strip_authority(strip_query_and_fragment(raw));
        let path = if path.is_empty() { "/" } else { path };

        let decoded = percent_decode_str(path).decode_utf8_lossy();

        let mut normalized = String::with_capacity(decoded.len() + 1);
        if !decoded.starts_with('/') {
            normalized.push('/');
        }
        normalized.push_str(&decoded);

        let trimmed = normalized.trim_end_matches('/');
        if trimmed.is_empty() {
            Self::root()
        } else {
            Self(trimmed.to_owned())
        }
    }

    /// The root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Whether this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The path with its final segment removed. The parent of `/` is `/`.
    #[must_use]
    pub fn parent(&self) -> Self {
        match self.0.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => Self(parent.to_owned()),
            _ => Self::root(),
        }
    }

    /// Borrow the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn strip_query_and_fragment(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    &raw[..end]
}

/// Drop `scheme://authority` from an absolute-form target.
fn strip_authority(target: &str) -> &str {
    let Some(scheme_end) = target.find("://") else {
        return target;
    };
    // A `/` before `://` means the sequence is part of the path.
    if target[..scheme_end].contains('/') {
        return target;
    }
    let rest = &target[scheme_end + 3..];
    rest.find('/').map_or("", |slash| &rest[slash..])
}
