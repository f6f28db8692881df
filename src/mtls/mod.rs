//! Mutual TLS at the transport layer.
//!
//! # Architecture
//!
//! ```text
//! TCP connection
//!   → TlsContextProvider hands out a rustls ServerConfig
//!       (rebuilt per connection, or cached and refreshed by a file watcher)
//!   → TLS handshake (client cert verified against the current TrustBundle)
//!   → peer CN logged, stream handed to axum
//!   → [request-layer auth middleware runs]
//! ```
//!
//! # Modules
//!
//! - [`bundle`]: trust bundle discovery (`TrustBundle`)
//! - [`cert_manager`]: rustls config building and certificate generation
//! - [`verifier`]: client certificate verification (`TrustVerifier`)
//! - [`acceptor`]: per-connection handshakes (`TlsContextProvider`, `TlsListener`)
//! - [`watcher`]: file watcher driving `TrustReload::Watch`
//! - [`identity`]: X.509 subject extraction for logs

pub mod acceptor;
pub mod bundle;
pub mod cert_manager;
pub mod identity;
pub mod verifier;
pub mod watcher;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use acceptor::{TlsContextProvider, TlsListener};
pub use bundle::TrustBundle;
pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, LeafPurpose, PkiLayout,
    build_server_config, load_certs, load_private_key, write_pki_layout,
};
pub use identity::CertIdentity;
pub use verifier::TrustVerifier;
pub use watcher::TrustWatcher;

/// Where the trusted client certificates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustSource {
    /// Every `*.crt`, `*.pem` and `*.cer` file in a directory
    Directory(PathBuf),
    /// An explicit list of files, in order
    Files(Vec<PathBuf>),
}

impl fmt::Display for TrustSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(dir) => write!(f, "directory {}", dir.display()),
            Self::Files(files) => write!(f, "{} explicit file(s)", files.len()),
        }
    }
}

/// When the trust context is rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustReload {
    /// Rebuild for every accepted connection
    #[default]
    Connection,
    /// Build once and rebuild when trust material changes on disk
    Watch,
}

/// Resolved transport-layer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtlsSettings {
    /// Server certificate chain (PEM)
    pub server_cert: PathBuf,
    /// Server private key (PEM)
    pub server_key: PathBuf,
    /// Trusted client certificates
    pub trust: TrustSource,
    /// Reload strategy
    pub reload: TrustReload,
}
