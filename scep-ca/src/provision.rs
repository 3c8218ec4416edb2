//! CA bootstrap.
//!
//! Exactly one strategy runs per bootstrap, first match wins:
//!
//! 1. [`Strategy::Inline`]: certificate and key PEM passed as values
//! 2. [`Strategy::PathCopy`]: certificate and key copied from files
//! 3. [`Strategy::Generate`]: new RSA key and self-signed certificate
//!
//! All artifacts go through [`FileDepot::create_exclusive`], so an existing
//! CA is never overwritten.

use std::path::PathBuf;

use crate::depot::{DepotError, FileDepot, CA_CERT_FILE, CA_KEY_FILE};
use crate::generate::{
    encode_private_key, generate_key, CaCertificateBuilder, CaSubject, DEFAULT_KEY_SIZE,
    DEFAULT_YEARS,
};
use crate::identity::Passphrase;

/// Errors that can occur during CA bootstrap.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// Writing to the depot failed.
    #[error(transparent)]
    Depot(#[from] DepotError),

    /// Reading path-copy source material failed.
    #[error("failed to read {}: {source}", path.display())]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Key size outside the supported range.
    #[error("unsupported RSA key size {0}")]
    KeySize(u32),

    /// Validity period is zero or overflows the calendar.
    #[error("invalid CA validity of {0} years")]
    Validity(u32),

    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// PEM encoding failed.
    #[error("failed to encode {what}: {reason}")]
    Encoding { what: &'static str, reason: String },

    /// Building or signing the CA certificate failed.
    #[error("failed to self-sign CA certificate: {0}")]
    SelfSign(String),
}

/// Which bootstrap strategy ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Inline,
    PathCopy,
    Generate,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline => f.write_str("inline"),
            Self::PathCopy => f.write_str("path"),
            Self::Generate => f.write_str("generate"),
        }
    }
}

/// Inputs to a CA bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapInputs {
    pub inline_cert: Option<String>,
    pub inline_key: Option<String>,
    pub path_cert: Option<PathBuf>,
    pub path_key: Option<PathBuf>,
    pub key_size: u32,
    pub years: u32,
    pub subject: CaSubject,
    /// Encrypts a generated key when non-empty.
    pub passphrase: Passphrase,
}

impl Default for BootstrapInputs {
    fn default() -> Self {
        Self {
            inline_cert: None,
            inline_key: None,
            path_cert: None,
            path_key: None,
            key_size: DEFAULT_KEY_SIZE,
            years: DEFAULT_YEARS,
            subject: CaSubject::default(),
            passphrase: Passphrase::default(),
        }
    }
}

impl BootstrapInputs {
    /// Pick the strategy these inputs select.
    ///
    /// Half-specified pairs are ignored, falling through to the next strategy.
    pub fn strategy(&self) -> Strategy {
        if both_present(&self.inline_cert, &self.inline_key) {
            Strategy::Inline
        } else if self.path_cert.as_ref().is_some_and(|p| !p.as_os_str().is_empty())
            && self.path_key.as_ref().is_some_and(|p| !p.as_os_str().is_empty())
        {
            Strategy::PathCopy
        } else {
            Strategy::Generate
        }
    }
}

fn both_present(a: &Option<String>, b: &Option<String>) -> bool {
    a.as_deref().is_some_and(|s| !s.is_empty()) && b.as_deref().is_some_and(|s| !s.is_empty())
}

/// Bootstrap the CA identity into `depot`.
///
/// Returns the strategy that ran.
///
/// # Errors
///
/// - `ProvisionError::Depot(DepotError::AlreadyExists)` if the depot already
///   holds CA material; existing files are left untouched
/// - `ProvisionError::ReadSource` if a path-copy source cannot be read
/// - key generation, encoding and self-signing errors for `Generate`
pub fn provision(depot: &FileDepot, inputs: &BootstrapInputs) -> Result<Strategy, ProvisionError> {
    let strategy = inputs.strategy();
    tracing::debug!(strategy = %strategy, depot = %depot.root().display(), "Provisioning CA");

    match strategy {
        Strategy::Inline => {
            let cert = inputs.inline_cert.as_deref().unwrap_or_default();
            let key = inputs.inline_key.as_deref().unwrap_or_default();
            write_pair(
                depot,
                (CA_CERT_FILE, cert.as_bytes()),
                (CA_KEY_FILE, key.as_bytes()),
            )?;
        }
        Strategy::PathCopy => {
            let cert = read_source(inputs.path_cert.as_ref())?;
            let key = read_source(inputs.path_key.as_ref())?;
            write_pair(depot, (CA_CERT_FILE, &cert), (CA_KEY_FILE, &key))?;
        }
        Strategy::Generate => {
            // Everything is built in memory before the depot is touched
            let key = generate_key(inputs.key_size)?;
            let key_pem = encode_private_key(&key, &inputs.passphrase)?;
            let cert = CaCertificateBuilder::new(inputs.subject.clone())
                .years(inputs.years)
                .build(&key)?;
            let cert_pem = cert.to_pem().map_err(|e| ProvisionError::Encoding {
                what: "CA certificate",
                reason: e.to_string(),
            })?;
            write_pair(depot, (CA_KEY_FILE, &key_pem), (CA_CERT_FILE, &cert_pem))?;
        }
    }

    tracing::info!(strategy = %strategy, depot = %depot.root().display(), "CA provisioned");
    Ok(strategy)
}

fn read_source(path: Option<&PathBuf>) -> Result<Vec<u8>, ProvisionError> {
    let path = path.cloned().unwrap_or_default();
    std::fs::read(&path).map_err(|source| ProvisionError::ReadSource { path, source })
}

/// Write two files in order. If the second fails, the first (created by this
/// call) is removed again.
fn write_pair(
    depot: &FileDepot,
    first: (&str, &[u8]),
    second: (&str, &[u8]),
) -> Result<(), ProvisionError> {
    depot.create_exclusive(first.0, first.1)?;
    if let Err(e) = depot.create_exclusive(second.0, second.1) {
        if let Err(cleanup) = depot.remove(first.0) {
            tracing::warn!(file = first.0, error = %cleanup, "Failed to roll back CA file");
        }
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_priority() {
        let mut inputs = BootstrapInputs::default();
        assert_eq!(inputs.strategy(), Strategy::Generate);

        inputs.path_cert = Some(PathBuf::from("/tmp/ca.pem"));
        assert_eq!(inputs.strategy(), Strategy::Generate, "half a pair is ignored");

        inputs.path_key = Some(PathBuf::from("/tmp/ca.key"));
        assert_eq!(inputs.strategy(), Strategy::PathCopy);

        inputs.inline_cert = Some("cert".to_string());
        inputs.inline_key = Some(String::new());
        assert_eq!(inputs.strategy(), Strategy::PathCopy, "empty inline key is absent");

        inputs.inline_key = Some("key".to_string());
        assert_eq!(inputs.strategy(), Strategy::Inline);
    }

    #[test]
    fn test_inline_writes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let depot = FileDepot::new(dir.path());
        let inputs = BootstrapInputs {
            inline_cert: Some("CERT BYTES".to_string()),
            inline_key: Some("KEY BYTES".to_string()),
            ..Default::default()
        };

        assert_eq!(provision(&depot, &inputs).unwrap(), Strategy::Inline);
        assert_eq!(std::fs::read(dir.path().join(CA_CERT_FILE)).unwrap(), b"CERT BYTES");
        assert_eq!(std::fs::read(dir.path().join(CA_KEY_FILE)).unwrap(), b"KEY BYTES");
    }

    #[test]
    fn test_second_file_conflict_rolls_back_first() {
        let dir = tempfile::tempdir().unwrap();
        let depot = FileDepot::new(dir.path());
        depot.create_exclusive(CA_KEY_FILE, b"pre-existing").unwrap();

        let inputs = BootstrapInputs {
            inline_cert: Some("cert".to_string()),
            inline_key: Some("key".to_string()),
            ..Default::default()
        };
        let err = provision(&depot, &inputs).unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Depot(DepotError::AlreadyExists { .. })
        ));

        // The cert written by this run is gone, the pre-existing key is intact
        assert!(!dir.path().join(CA_CERT_FILE).exists());
        assert_eq!(
            std::fs::read(dir.path().join(CA_KEY_FILE)).unwrap(),
            b"pre-existing"
        );
    }

    #[test]
    fn test_path_copy_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let depot = FileDepot::new(dir.path().join("depot"));
        let inputs = BootstrapInputs {
            path_cert: Some(dir.path().join("nope.pem")),
            path_key: Some(dir.path().join("nope.key")),
            ..Default::default()
        };

        let err = provision(&depot, &inputs).unwrap_err();
        assert!(matches!(err, ProvisionError::ReadSource { .. }));
        assert!(!depot.root().exists(), "depot untouched on read failure");
    }

    #[test]
    fn test_generate_failure_leaves_depot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let depot = FileDepot::new(dir.path().join("depot"));
        let inputs = BootstrapInputs {
            key_size: 100,
            ..Default::default()
        };

        let err = provision(&depot, &inputs).unwrap_err();
        assert!(matches!(err, ProvisionError::KeySize(100)));
        assert!(!depot.root().exists());
    }
}
