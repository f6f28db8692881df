//! Client certificate verification against a trust bundle
//!
//! A client certificate is accepted when either:
//! - it is byte-identical to a certificate in the bundle and inside its
//!   validity window, or
//! - it chains to a bundle certificate under WebPKI rules.
//!
//! An empty bundle still demands a certificate and rejects every one.

use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme,
};
use tracing::debug;

use super::bundle::TrustBundle;
use super::identity::CertIdentity;
use crate::{Error, Result};

/// A trusted certificate matched by exact DER comparison.
#[derive(Debug)]
struct Pinned {
    der: CertificateDer<'static>,
    identity: CertIdentity,
}

/// `ClientCertVerifier` backed by a [`TrustBundle`].
#[derive(Debug)]
pub struct TrustVerifier {
    pinned: Vec<Pinned>,
    chained: Option<Arc<dyn ClientCertVerifier>>,
    provider: Arc<CryptoProvider>,
}

impl TrustVerifier {
    /// Build a verifier trusting every certificate in `bundle`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a bundle certificate cannot be used as a
    /// trust anchor.
    pub fn new(bundle: &TrustBundle, provider: Arc<CryptoProvider>) -> Result<Self> {
        if bundle.is_empty() {
            return Ok(Self {
                pinned: Vec::new(),
                chained: None,
                provider,
            });
        }

        let mut roots = RootCertStore::empty();
        let mut pinned = Vec::with_capacity(bundle.certificates().len());
        for cert in bundle.certificates() {
            roots
                .add(cert.clone())
                .map_err(|e| Error::Config(format!("Failed to add trusted client cert: {e}")))?;
            pinned.push(Pinned {
                der: cert.clone(),
                identity: CertIdentity::from_der(cert)?,
            });
        }

        let chained = WebPkiClientVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::clone(&provider),
        )
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?;

        Ok(Self {
            pinned,
            chained: Some(chained),
            provider,
        })
    }

    /// Whether any certificate is trusted.
    #[must_use]
    pub fn accepts_any(&self) -> bool {
        self.chained.is_some()
    }

    fn pinned_match(&self, end_entity: &CertificateDer<'_>, now: UnixTime) -> Option<&Pinned> {
        let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
        self.pinned
            .iter()
            .find(|p| p.der.as_ref() == end_entity.as_ref() && p.identity.is_valid_at(now))
    }
}

impl ClientCertVerifier for TrustVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        match &self.chained {
            Some(chained) => chained.root_hint_subjects(),
            None => &[],
        }
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        if let Some(pinned) = self.pinned_match(end_entity, now) {
            debug!(peer = %pinned.identity.display_name, "Client certificate matched trusted file");
            return Ok(ClientCertVerified::assertion());
        }

        match &self.chained {
            Some(chained) => chained.verify_client_cert(end_entity, intermediates, now),
            None => Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            )),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
