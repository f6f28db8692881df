//! Trust bundle discovery
//!
//! The bundle is recomputed from disk every time a trust context is built,
//! so adding or removing a certificate file takes effect without a restart.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use glob::Pattern;
use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use super::TrustSource;
use super::cert_manager::load_certs;
use crate::{Error, Result};

/// Extensions recognised in a trust directory, scanned in this order.
pub const CERT_PATTERNS: &[&str] = &["*.crt", "*.pem", "*.cer"];

/// The client certificates currently accepted for mutual TLS.
#[derive(Debug, Clone, Default)]
pub struct TrustBundle {
    files: Vec<PathBuf>,
    certificates: Vec<CertificateDer<'static>>,
}

impl TrustBundle {
    /// Read every certificate named by `source`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if an existing file cannot be read or holds no
    /// PEM certificate. Files that do not exist are skipped with a warning.
    pub fn load(source: &TrustSource) -> Result<Self> {
        let files = collect_files(source)?;

        let mut certificates = Vec::new();
        for file in &files {
            certificates.extend(load_certs(file)?);
        }

        debug!(
            source = %source,
            files = files.len(),
            certificates = certificates.len(),
            "Trust bundle loaded"
        );

        Ok(Self {
            files,
            certificates,
        })
    }

    /// Files the bundle was read from, in scan order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Parsed certificates, in file order.
    #[must_use]
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// Whether no certificate is trusted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// Resolve `source` into an ordered, de-duplicated list of existing files.
///
/// # Errors
///
/// Returns `Error::Config` if a directory glob pattern cannot be built.
pub fn collect_files(source: &TrustSource) -> Result<Vec<PathBuf>> {
    let candidates = match source {
        TrustSource::Files(files) => files.clone(),
        TrustSource::Directory(dir) => scan_directory(dir)?,
    };

    let mut seen = HashSet::new();
    let mut files = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !seen.insert(candidate.clone()) {
            continue;
        }
        if !candidate.is_file() {
            warn!(path = %candidate.display(), "Trusted certificate file not found, skipping");
            continue;
        }
        files.push(candidate);
    }
    Ok(files)
}

fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let escaped = Pattern::escape(&dir.to_string_lossy());

    let mut files = Vec::new();
    for pattern in CERT_PATTERNS {
        let full = format!("{escaped}/{pattern}");
        let paths = glob::glob(&full)
            .map_err(|e| Error::Config(format!("Invalid trust directory pattern '{full}': {e}")))?;

        let mut matched: Vec<PathBuf> = paths.filter_map(std::result::Result::ok).collect();
        matched.sort();
        files.extend(matched);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::mtls::cert_manager::{CaParams, CertGenerator};

    fn write_ca(dir: &Path, name: &str) -> PathBuf {
        let ca = CertGenerator::init_ca(&CaParams {
            cn: name,
            validity_days: 30,
        })
        .unwrap();
        let path = dir.join(name);
        fs::write(&path, ca.cert_pem).unwrap();
        path
    }

    #[test]
    fn directory_scan_orders_by_pattern_then_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.pem", "z.crt", "a.cer", "a.crt", "notes.txt", "key.key"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        let files = collect_files(&TrustSource::Directory(dir.path().to_path_buf())).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.crt", "z.crt", "b.pem", "a.cer"]);
    }

    #[test]
    fn missing_directory_yields_empty_bundle() {
        let bundle =
            TrustBundle::load(&TrustSource::Directory(PathBuf::from("/nonexistent/allowed")))
                .unwrap();
        assert!(bundle.is_empty());
        assert!(bundle.files().is_empty());
    }

    #[test]
    fn explicit_files_are_deduplicated_and_missing_ones_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_ca(dir.path(), "first.crt");
        let second = write_ca(dir.path(), "second.pem");
        let missing = dir.path().join("gone.crt");

        let source = TrustSource::Files(vec![
            second.clone(),
            missing,
            first.clone(),
            second.clone(),
        ]);
        let bundle = TrustBundle::load(&source).unwrap();

        assert_eq!(bundle.files(), &[second, first]);
        assert_eq!(bundle.certificates().len(), 2);
    }

    #[test]
    fn file_with_several_certificates_contributes_all() {
        let dir = tempfile::tempdir().unwrap();
        let one = CertGenerator::init_ca(&CaParams { cn: "one", validity_days: 30 }).unwrap();
        let two = CertGenerator::init_ca(&CaParams { cn: "two", validity_days: 30 }).unwrap();
        let path = dir.path().join("bundle.pem");
        fs::write(&path, format!("{}\n{}", one.cert_pem, two.cert_pem)).unwrap();

        let bundle = TrustBundle::load(&TrustSource::Directory(dir.path().to_path_buf())).unwrap();
        assert_eq!(bundle.certificates().len(), 2);
    }

    #[test]
    fn unparseable_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.crt"), "not pem at all").unwrap();

        let err = TrustBundle::load(&TrustSource::Directory(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
