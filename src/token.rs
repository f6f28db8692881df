//! Bearer token registry
//!
//! Tokens are opaque, URL-safe strings carrying 256 bits of entropy. Each
//! maps to an absolute expiry. There is no background reaper: an expired
//! token is evicted the next time somebody presents it.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use tracing::debug;

/// Expiry horizon used when `now + ttl` does not fit in a `SystemTime`.
const MAX_LIFETIME: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A freshly issued bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// The opaque bearer value clients send in `Authorization: Bearer`.
    pub access_token: String,
    /// Absolute expiry.
    pub expires_at: SystemTime,
}

/// Issues and validates short-lived bearer tokens.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: Mutex<HashMap<String, SystemTime>>,
}

impl TokenRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new token valid for `ttl` from now.
    pub fn issue(&self, ttl: Duration) -> IssuedToken {
        let access_token = generate_token();
        let expires_at = expiry_after(SystemTime::now(), ttl);

        self.tokens.lock().insert(access_token.clone(), expires_at);
        debug!(ttl_secs = ttl.as_secs(), "Issued bearer token");

        IssuedToken {
            access_token,
            expires_at,
        }
    }

    /// Whether `token` is known and unexpired.
    ///
    /// A token that is past (or exactly at) its expiry is removed.
    pub fn validate(&self, token: &str) -> bool {
        let now = SystemTime::now();
        let mut tokens = self.tokens.lock();
        match tokens.get(token).copied() {
            Some(expires_at) if expires_at > now => true,
            Some(_) => {
                tokens.remove(token);
                drop(tokens);
                debug!("Lazy-evicted expired token");
                false
            }
            None => false,
        }
    }

    /// Number of tokens currently held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    /// Whether the registry holds no tokens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}

/// `now + ttl`, saturating at a far-future instant for huge TTLs.
fn expiry_after(now: SystemTime, ttl: Duration) -> SystemTime {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_LIFETIME))
        .unwrap_or(now)
}

/// 32 random bytes, URL-safe base64 without padding (43 characters).
fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn issued_token_validates_repeatedly_until_expiry() {
        let registry = TokenRegistry::new();
        let issued = registry.issue(Duration::from_secs(60));

        assert!(registry.validate(&issued.access_token));
        assert!(registry.validate(&issued.access_token));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expired_token_is_rejected_and_evicted() {
        let registry = TokenRegistry::new();
        let issued = registry.issue(Duration::ZERO);

        assert_eq!(registry.len(), 1);
        assert!(!registry.validate(&issued.access_token));
        assert!(registry.is_empty());
        assert!(!registry.validate(&issued.access_token));
    }

    #[test]
    fn short_ttl_expires_after_sleep() {
        let registry = TokenRegistry::new();
        let issued = registry.issue(Duration::from_millis(20));

        assert!(registry.validate(&issued.access_token));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!registry.validate(&issued.access_token));
    }

    #[test]
    fn unknown_token_is_rejected() {
        let registry = TokenRegistry::new();
        assert!(!registry.validate("not-a-token"));
        assert!(!registry.validate(""));
    }

    #[test]
    fn expiry_is_ttl_from_now() {
        let registry = TokenRegistry::new();
        let before = SystemTime::now();
        let issued = registry.issue(Duration::from_secs(3600));

        let delta = issued.expires_at.duration_since(before).unwrap();
        assert!(delta >= Duration::from_secs(3600));
        assert!(delta < Duration::from_secs(3601));
    }

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let registry = TokenRegistry::new();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let token = registry.issue(Duration::from_secs(60)).access_token;
            assert_eq!(token.len(), 43);
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn huge_ttl_saturates_instead_of_overflowing() {
        let registry = TokenRegistry::new();
        let issued = registry.issue(Duration::from_secs(u64::MAX));

        assert!(issued.expires_at > SystemTime::now() + Duration::from_secs(3600));
        assert!(registry.validate(&issued.access_token));

        let issued = registry.issue(Duration::MAX);
        assert!(registry.validate(&issued.access_token));
    }
}
