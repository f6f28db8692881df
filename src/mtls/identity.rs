//! Certificate identity extraction.
//!
//! Parses an X.509 DER-encoded certificate and pulls out the fields the
//! server logs for an accepted peer, plus the validity window used when a
//! trusted certificate is matched directly.

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity fields of a client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertIdentity {
    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Subject Alternative Name: DNS entries.
    pub san_dns_names: Vec<String>,

    /// Start of the validity window, seconds since the Unix epoch.
    pub not_before: i64,

    /// End of the validity window, seconds since the Unix epoch.
    pub not_after: i64,

    /// Human-readable label for logs.
    pub display_name: String,
}

impl CertIdentity {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Config(format!("Failed to parse certificate: {e}")))?;

        let common_name = extract_cn(&cert);
        let san_dns_names = extract_dns_sans(&cert);
        let validity = cert.validity();
        let display_name = build_display_name(common_name.as_deref(), &san_dns_names);

        Ok(Self {
            common_name,
            san_dns_names,
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            display_name,
        })
    }

    /// Whether `unix_secs` falls inside the validity window (inclusive).
    #[must_use]
    pub fn is_valid_at(&self, unix_secs: i64) -> bool {
        self.not_before <= unix_secs && unix_secs <= self.not_after
    }
}

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_dns_sans(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san_ext)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    san_ext
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_owned()),
            _ => None,
        })
        .collect()
}

/// CN first, then the first DNS SAN, then `"<unknown>"`.
fn build_display_name(cn: Option<&str>, dns_names: &[String]) -> String {
    cn.or_else(|| dns_names.first().map(String::as_str))
        .unwrap_or("<unknown>")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::string::Ia5String;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};

    fn make_cert_der(cn: Option<&str>, dns: &[&str]) -> Vec<u8> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        if let Some(cn) = cn {
            dn.push(DnType::CommonName, cn);
        }
        params.distinguished_name = dn;
        params.subject_alt_names = dns
            .iter()
            .map(|d| SanType::DnsName(Ia5String::try_from(*d).unwrap()))
            .collect();

        let key_pair = KeyPair::generate().expect("key generation failed");
        let cert = params
            .self_signed(&key_pair)
            .expect("rcgen cert generation failed");
        cert.der().to_vec()
    }

    #[test]
    fn from_der_extracts_common_name_and_sans() {
        let der = make_cert_der(Some("e2e-client"), &["client.local", "alt.local"]);
        let id = CertIdentity::from_der(&der).unwrap();

        assert_eq!(id.common_name.as_deref(), Some("e2e-client"));
        assert_eq!(id.san_dns_names, vec!["client.local", "alt.local"]);
        assert_eq!(id.display_name, "e2e-client");
    }

    #[test]
    fn display_name_falls_back_to_dns_san() {
        let der = make_cert_der(None, &["only-dns.local"]);
        let id = CertIdentity::from_der(&der).unwrap();
        assert!(id.common_name.is_none());
        assert_eq!(id.display_name, "only-dns.local");
    }

    #[test]
    fn display_name_is_unknown_without_cn_or_dns() {
        assert_eq!(build_display_name(None, &[]), "<unknown>");
    }

    #[test]
    fn validity_window_brackets_now() {
        let der = make_cert_der(Some("window"), &[]);
        let id = CertIdentity::from_der(&der).unwrap();

        // rcgen defaults span 1975..4096
        assert!(id.is_valid_at(1_700_000_000));
        assert!(!id.is_valid_at(id.not_before - 1));
        assert!(!id.is_valid_at(id.not_after + 1));
    }

    #[test]
    fn invalid_bytes_return_error() {
        assert!(CertIdentity::from_der(b"not a cert").is_err());
    }
}
