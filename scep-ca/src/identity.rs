//! CA identity types.
//!
//! - [`CaIdentity`] pairs the CA private key with its certificate and is
//!   only constructed once the two are known to match
//! - [`Passphrase`] is zeroized on drop and never shows up in `Debug` output

use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::depot::DepotError;

/// A passphrase protecting the CA private key.
///
/// Supplied at read time and never persisted. An empty passphrase means the
/// key is stored unencrypted.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    /// Wrap a passphrase.
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self(passphrase.into())
    }

    /// Returns true when no passphrase was configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The passphrase text. Never log the result.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw passphrase bytes, for handing to the key encoder.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Passphrase {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Passphrase(<empty>)")
        } else {
            f.write_str("Passphrase(<redacted>)")
        }
    }
}

/// The CA private key and the certificate binding its public half.
///
/// Read-only once loaded. Shared between concurrent signing operations
/// behind an `Arc`.
pub struct CaIdentity {
    key: PKey<Private>,
    certificate: X509,
}

impl CaIdentity {
    /// Pair a key with a certificate.
    ///
    /// # Errors
    ///
    /// Returns `DepotError::KeyMismatch` if the certificate's public key is
    /// not the public half of `key`.
    pub fn new(key: PKey<Private>, certificate: X509) -> Result<Self, DepotError> {
        let cert_key = certificate.public_key().map_err(|e| DepotError::Encoding {
            what: "CA certificate public key",
            reason: e.to_string(),
        })?;
        if !cert_key.public_eq(&key) {
            return Err(DepotError::KeyMismatch);
        }
        Ok(Self { key, certificate })
    }

    /// The CA certificate.
    #[must_use]
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// The CA private key.
    ///
    /// # Security
    ///
    /// Only the signer should need this. Never log or serialize it.
    #[must_use]
    pub fn private_key(&self) -> &PKey<Private> {
        &self.key
    }

    /// DER encoding of the CA certificate.
    pub fn certificate_der(&self) -> Result<Vec<u8>, ErrorStack> {
        self.certificate.to_der()
    }

    /// Common name of the CA subject, if present.
    #[must_use]
    pub fn common_name(&self) -> Option<String> {
        self.certificate
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| std::str::from_utf8(entry.data().as_slice()).ok())
            .map(str::to_string)
    }
}

// Explicitly NO key material in Debug output
impl std::fmt::Debug for CaIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaIdentity")
            .field("common_name", &self.common_name())
            .finish_non_exhaustive()
    }
}
