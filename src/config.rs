//! Configuration management
//!
//! Settings come from an optional YAML file, then `SIMPLE_API_SERVER_*`
//! environment variables, then the same variables without the prefix. The
//! unprefixed name wins. Empty values count as unset.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::auth::AuthSettings;
use crate::mtls::{MtlsSettings, TrustReload, TrustSource};
use crate::{Error, Result};

/// Prefix accepted on every environment variable.
pub const ENV_PREFIX: &str = "SIMPLE_API_SERVER_";

/// Environment variable names (without prefix) the server reads.
const ENV_KEYS: &[&str] = &[
    "ENABLE_OAUTH2",
    "ENABLE_BASIC_AUTH",
    "ENABLE_MTLS",
    "TOKEN_TTL_SECONDS",
    "BIND_HOST",
    "BIND_PORT",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "BASIC_AUTH_USERNAME",
    "BASIC_AUTH_PASSWORD",
    "CERTS_DIR",
    "TLS_CERT_FILE",
    "TLS_KEY_FILE",
    "MTLS_CLIENT_CERT_DIR",
    "MTLS_CLIENT_CERT_FILES",
    "TRUST_RELOAD",
];

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serve `/token` and require bearer tokens on resource requests
    #[serde(deserialize_with = "env_value::flag")]
    pub enable_oauth2: bool,
    /// Require HTTP Basic credentials on resource requests
    #[serde(deserialize_with = "env_value::flag")]
    pub enable_basic_auth: bool,
    /// Wrap every connection in TLS and require a trusted client certificate
    #[serde(deserialize_with = "env_value::flag")]
    pub enable_mtls: bool,
    /// Lifetime of issued bearer tokens, in seconds
    pub token_ttl_seconds: u64,
    /// Host to bind to
    #[serde(deserialize_with = "env_value::text")]
    pub bind_host: String,
    /// Port to listen on
    pub bind_port: u16,
    /// Static OAuth2 client id
    #[serde(deserialize_with = "env_value::text")]
    pub client_id: String,
    /// Static OAuth2 client secret
    #[serde(deserialize_with = "env_value::text")]
    pub client_secret: String,
    /// Basic auth username (defaults to `client_id`)
    #[serde(deserialize_with = "env_value::optional_text")]
    pub basic_auth_username: Option<String>,
    /// Basic auth password (defaults to `client_secret`)
    #[serde(deserialize_with = "env_value::optional_text")]
    pub basic_auth_password: Option<String>,
    /// Base directory for TLS material
    pub certs_dir: PathBuf,
    /// Server certificate (defaults to `<certs_dir>/server/server.crt`)
    pub tls_cert_file: Option<PathBuf>,
    /// Server private key (defaults to `<certs_dir>/server/server.key`)
    pub tls_key_file: Option<PathBuf>,
    /// Directory of trusted client certificates
    /// (defaults to `<certs_dir>/clients/allowed`)
    pub mtls_client_cert_dir: Option<PathBuf>,
    /// Comma-separated list of trusted client certificate files.
    /// Takes precedence over the directory when non-empty.
    #[serde(deserialize_with = "env_value::optional_text")]
    pub mtls_client_cert_files: Option<String>,
    /// When the mTLS trust context is rebuilt
    pub trust_reload: TrustReload,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_oauth2: true,
            enable_basic_auth: false,
            enable_mtls: false,
            token_ttl_seconds: 3600,
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8080,
            client_id: "declarest-e2e-client".to_string(),
            client_secret: "declarest-e2e-secret".to_string(),
            basic_auth_username: None,
            basic_auth_password: None,
            certs_dir: PathBuf::from("/etc/simple-api-server/certs"),
            tls_cert_file: None,
            tls_key_file: None,
            mtls_client_cert_dir: None,
            mtls_client_cert_files: None,
            trust_reload: TrustReload::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, a value cannot be
    /// parsed, or a value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .only(ENV_KEYS)
                    .filter(|key| is_set(&format!("{ENV_PREFIX}{}", key.as_str()))),
            )
            .merge(
                Env::raw()
                    .only(ENV_KEYS)
                    .filter(|key| is_set(key.as_str())),
            );

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Check ranges serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.token_ttl_seconds == 0 {
            return Err(Error::Config(
                "TOKEN_TTL_SECONDS must be a positive integer".to_string(),
            ));
        }
        if self.bind_port == 0 {
            return Err(Error::Config(
                "BIND_PORT must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// Lifetime of issued tokens
    #[must_use]
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_seconds)
    }

    /// Effective Basic auth username
    #[must_use]
    pub fn basic_auth_username(&self) -> &str {
        self.basic_auth_username.as_deref().unwrap_or(&self.client_id)
    }

    /// Effective Basic auth password
    #[must_use]
    pub fn basic_auth_password(&self) -> &str {
        self.basic_auth_password
            .as_deref()
            .unwrap_or(&self.client_secret)
    }

    /// Effective server certificate path
    #[must_use]
    pub fn tls_cert_file(&self) -> PathBuf {
        self.tls_cert_file
            .clone()
            .unwrap_or_else(|| self.certs_dir.join("server").join("server.crt"))
    }

    /// Effective server key path
    #[must_use]
    pub fn tls_key_file(&self) -> PathBuf {
        self.tls_key_file
            .clone()
            .unwrap_or_else(|| self.certs_dir.join("server").join("server.key"))
    }

    /// Where trusted client certificates come from.
    ///
    /// A non-empty explicit file list wins over the directory.
    #[must_use]
    pub fn trust_source(&self) -> TrustSource {
        let files: Vec<PathBuf> = self
            .mtls_client_cert_files
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(PathBuf::from)
            .collect();

        if files.is_empty() {
            TrustSource::Directory(self.mtls_client_cert_dir.clone().unwrap_or_else(|| {
                self.certs_dir.join("clients").join("allowed")
            }))
        } else {
            TrustSource::Files(files)
        }
    }

    /// Request-layer authentication settings
    #[must_use]
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            oauth2: self.enable_oauth2,
            basic: self.enable_basic_auth,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            basic_username: self.basic_auth_username().to_string(),
            basic_password: self.basic_auth_password().to_string(),
            token_ttl: self.token_ttl(),
        }
    }

    /// Transport-layer mTLS settings
    #[must_use]
    pub fn mtls_settings(&self) -> MtlsSettings {
        MtlsSettings {
            server_cert: self.tls_cert_file(),
            server_key: self.tls_key_file(),
            trust: self.trust_source(),
            reload: self.trust_reload,
        }
    }
}

/// Whether an environment variable holds a non-blank value.
fn is_set(name: &str) -> bool {
    env::var(name).is_ok_and(|value| !value.trim().is_empty())
}

/// Lenient deserializers for values that arrive as environment strings.
///
/// figment types `"1"` as an integer and `"yes"` as a string, so flags and
/// free-form text accept any scalar.
pub mod env_value {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        UInt(u64),
        Float(f64),
        Text(String),
    }

    impl Scalar {
        fn into_text(self) -> String {
            match self {
                Self::Bool(b) => b.to_string(),
                Self::Int(i) => i.to_string(),
                Self::UInt(u) => u.to_string(),
                Self::Float(f) => f.to_string(),
                Self::Text(s) => s.trim().to_string(),
            }
        }
    }

    /// Parse `1/true/yes/on` or `0/false/no/off`, case-insensitively.
    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = Scalar::deserialize(deserializer)?
            .into_text()
            .to_ascii_lowercase();
        match text.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(D::Error::custom("must be true or false")),
        }
    }

    /// Any scalar, rendered as a trimmed string.
    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Scalar::deserialize(deserializer).map(Scalar::into_text)
    }

    /// Like [`text`], but blank values become `None`.
    pub fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Scalar>::deserialize(deserializer)?;
        Ok(value.map(Scalar::into_text).filter(|s| !s.is_empty()))
    }
}
