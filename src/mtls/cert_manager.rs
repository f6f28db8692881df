//! Certificate management: loading, rustls config building, and CLI helpers.
//!
//! Provides:
//! - [`build_server_config`]: build a `rustls::ServerConfig` from `MtlsSettings`
//! - [`load_certs`] / [`load_private_key`]: PEM file loading
//! - [`CertGenerator`]: `rcgen`-backed PKI generation, with [`write_pki_layout`] for the `certs` command
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, SanType, date_time_ymd,
};
use rcgen::string::Ia5String;
use rustls::ServerConfig;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, warn};

use super::MtlsSettings;
use super::bundle::TrustBundle;
use super::verifier::TrustVerifier;
use crate::{Error, Result};

/// Build a `rustls::ServerConfig` that requires a client certificate trusted
/// by the current bundle.
///
/// Reads the server certificate, key and every trust file from disk. An
/// empty bundle still yields a config: it refuses every client.
///
/// # Errors
///
/// Returns an error if any certificate or key file cannot be read or parsed,
/// or if the rustls config cannot be built (e.g. mismatched cert/key pair).
pub fn build_server_config(settings: &MtlsSettings) -> Result<ServerConfig> {
    let server_certs = load_certs(&settings.server_cert)?;
    let server_key = load_private_key(&settings.server_key)?;
    let bundle = TrustBundle::load(&settings.trust)?;

    if bundle.is_empty() {
        warn!(
            trust = %settings.trust,
            "No trusted client certificates configured; client access is denied"
        );
    }

    let provider = Arc::new(aws_lc_rs::default_provider());
    let verifier = TrustVerifier::new(&bundle, Arc::clone(&provider))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %settings.server_cert.display(),
        trusted_files = bundle.files().len(),
        trusted_certs = bundle.certificates().len(),
        "mTLS config built"
    );

    Ok(tls_cfg)
}

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Config(format!(
                "Failed to parse certs from '{}': {e:?}",
                path.display()
            ))
        })?;

    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#1 (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`) and SEC1
/// (`EC PRIVATE KEY`) blocks.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no private key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    PrivateKeyDer::from_pem_slice(&pem_data).map_err(|e| {
        Error::Config(format!(
            "No usable private key in '{}': {e:?}",
            path.display()
        ))
    })
}

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the root CA.
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// What a leaf certificate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafPurpose {
    /// TLS server (`serverAuth`)
    Server,
    /// TLS client (`clientAuth`)
    Client,
}

/// Parameters for generating a leaf certificate (server or client).
#[derive(Debug)]
pub struct LeafCertParams<'a> {
    /// Common Name.
    pub cn: &'a str,
    /// Subject Alternative Names: DNS entries.
    pub san_dns: Vec<String>,
    /// Extended key usage.
    pub purpose: LeafPurpose,
    /// Validity period in days.
    pub validity_days: u32,
}

/// Generated certificate and key pair in PEM format.
#[derive(Debug)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Certificate generator backed by `rcgen`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed CA certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or certificate serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate CA key: {e}")))?;

        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.not_after = validity_to_date(params.validity_days)?;

        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Config(format!("CA cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
        })
    }

    /// Issue a leaf certificate signed by `ca_cert_pem` / `ca_key_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA cert/key cannot be parsed, a SAN is not
    /// valid IA5, or signing fails.
    pub fn issue_leaf(
        params: &LeafCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::Config(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
            .map_err(|e| Error::Config(format!("Failed to parse CA cert: {e}")))?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::Config(format!("Failed to generate leaf key: {e}")))?;

        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        leaf_params.distinguished_name = dn;
        leaf_params.not_after = validity_to_date(params.validity_days)?;
        leaf_params.extended_key_usages = vec![match params.purpose {
            LeafPurpose::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafPurpose::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }];

        let mut sans: Vec<SanType> = Vec::new();
        for dns in &params.san_dns {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Config(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        leaf_params.subject_alt_names = sans;

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| Error::Config(format!("Leaf cert signing failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }

    /// Write a [`GeneratedCert`] as `<stem>.crt` and `<stem>.key` under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        fs::create_dir_all(dir)
            .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", dir.display())))?;

        fs::write(dir.join(format!("{stem}.crt")), &cert.cert_pem)
            .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

        fs::write(dir.join(format!("{stem}.key")), &cert.key_pem)
            .map_err(|e| Error::Config(format!("Cannot write key: {e}")))?;

        Ok(())
    }
}

/// Paths written by [`write_pki_layout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiLayout {
    /// CA certificate
    pub ca_cert: PathBuf,
    /// Server certificate (`server/server.crt`)
    pub server_cert: PathBuf,
    /// Server key (`server/server.key`)
    pub server_key: PathBuf,
    /// Client certificate for use by a test client (`clients/<cn>.crt`)
    pub client_cert: PathBuf,
    /// Client key (`clients/<cn>.key`)
    pub client_key: PathBuf,
    /// Trust directory holding a copy of the client certificate
    pub trust_dir: PathBuf,
}

/// Generate a CA, a server certificate and one trusted client certificate
/// under `out`, in the layout the default configuration expects.
///
/// # Errors
///
/// Returns an error if generation fails or a file cannot be written.
pub fn write_pki_layout(
    out: &Path,
    server_dns: &[String],
    client_cn: &str,
    validity_days: u32,
) -> Result<PkiLayout> {
    let ca = CertGenerator::init_ca(&CaParams {
        cn: "simple-api-server CA",
        validity_days,
    })?;
    CertGenerator::write_to_dir(&ca, out, "ca")?;

    let server_cn = server_dns.first().map_or("localhost", String::as_str);
    let server = CertGenerator::issue_leaf(
        &LeafCertParams {
            cn: server_cn,
            san_dns: server_dns.to_vec(),
            purpose: LeafPurpose::Server,
            validity_days,
        },
        &ca.cert_pem,
        &ca.key_pem,
    )?;
    let server_dir = out.join("server");
    CertGenerator::write_to_dir(&server, &server_dir, "server")?;

    let client = CertGenerator::issue_leaf(
        &LeafCertParams {
            cn: client_cn,
            san_dns: Vec::new(),
            purpose: LeafPurpose::Client,
            validity_days,
        },
        &ca.cert_pem,
        &ca.key_pem,
    )?;
    let clients_dir = out.join("clients");
    CertGenerator::write_to_dir(&client, &clients_dir, client_cn)?;

    let trust_dir = clients_dir.join("allowed");
    fs::create_dir_all(&trust_dir)
        .map_err(|e| Error::Config(format!("Cannot create dir '{}': {e}", trust_dir.display())))?;
    fs::write(trust_dir.join(format!("{client_cn}.crt")), &client.cert_pem)
        .map_err(|e| Error::Config(format!("Cannot write cert: {e}")))?;

    Ok(PkiLayout {
        ca_cert: out.join("ca.crt"),
        server_cert: server_dir.join("server.crt"),
        server_key: server_dir.join("server.key"),
        client_cert: clients_dir.join(format!("{client_cn}.crt")),
        client_key: clients_dir.join(format!("{client_cn}.key")),
        trust_dir,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{}': {e}", path.display())))
}

/// Convert a validity period (days) into a future `OffsetDateTime` for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Config(format!("System time error: {e}")))?
        .as_secs();

    let future_secs = now_secs.saturating_add(u64::from(days) * 86_400);

    let dt = time::OffsetDateTime::from_unix_timestamp(
        i64::try_from(future_secs).unwrap_or(i64::MAX),
    )
    .map_err(|e| Error::Config(format!("Date calculation error: {e}")))?;

    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}
