//! Loading of file-backed material (credentials, TLS cert/key/CA).
//!
//! All referenced files are read in one pass so a misconfigured deployment
//! sees every unreadable path at once.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{MaterialError, MaterialErrors, MaterialKind};

/// Reads and trims every `(kind, path)` entry, in order.
///
/// Returns all contents if every file was readable, otherwise every failure.
pub fn read_all(entries: &[(MaterialKind, &Path)]) -> Result<Vec<String>, MaterialErrors> {
    let mut contents = Vec::with_capacity(entries.len());
    let mut errors = Vec::new();
    for (kind, path) in entries {
        match std::fs::read_to_string(path) {
            Ok(s) => {
                debug!(%kind, path = %path.display(), bytes = s.len(), "loaded material");
                contents.push(s.trim().to_owned());
            }
            Err(source) => errors.push(MaterialError {
                kind: *kind,
                path: path.to_path_buf(),
                source,
            }),
        }
    }
    if errors.is_empty() {
        Ok(contents)
    } else {
        Err(MaterialErrors(errors))
    }
}

/// Optional TLS material referenced by the settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub ca: Option<PathBuf>,
}

impl TlsPaths {
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.ca.is_none()
    }

    /// Present entries in cert, key, ca order.
    pub fn entries(&self) -> Vec<(MaterialKind, &Path)> {
        [
            (MaterialKind::TlsCert, self.cert.as_deref()),
            (MaterialKind::TlsKey, self.key.as_deref()),
            (MaterialKind::TlsCa, self.ca.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, path)| path.map(|p| (kind, p)))
        .collect()
    }

    /// Eagerly reads every configured file so unreadable material is
    /// reported before a connection is attempted.
    pub fn verify(&self) -> Result<(), MaterialErrors> {
        read_all(&self.entries()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_read_all_trims_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  -----BEGIN NATS USER JWT-----  ").unwrap();
        let out = read_all(&[(MaterialKind::Credentials, file.path())]).unwrap();
        assert_eq!(out, vec!["-----BEGIN NATS USER JWT-----".to_owned()]);
    }

    #[test]
    fn test_read_all_aggregates_every_failure() {
        let good = tempfile::NamedTempFile::new().unwrap();
        let missing_a = Path::new("/nonexistent/stream-consumer/cert.pem");
        let missing_b = Path::new("/nonexistent/stream-consumer/ca.pem");
        let errs = read_all(&[
            (MaterialKind::TlsCert, missing_a),
            (MaterialKind::TlsKey, good.path()),
            (MaterialKind::TlsCa, missing_b),
        ])
        .unwrap_err();
        assert_eq!(errs.len(), 2);
        let kinds: Vec<_> = errs.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MaterialKind::TlsCert, MaterialKind::TlsCa]);
    }

    #[test]
    fn test_tls_paths_entries_and_verify() {
        let tls = TlsPaths::default();
        assert!(tls.is_empty());
        assert!(tls.verify().is_ok());

        let ca = tempfile::NamedTempFile::new().unwrap();
        let tls = TlsPaths {
            ca: Some(ca.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(tls.entries().len(), 1);
        assert!(tls.verify().is_ok());

        let tls = TlsPaths {
            cert: Some("/nonexistent/cert.pem".into()),
            key: Some("/nonexistent/key.pem".into()),
            ca: None,
        };
        assert_eq!(tls.verify().unwrap_err().len(), 2);
    }
}
