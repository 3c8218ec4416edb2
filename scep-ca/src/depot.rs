//! On-disk CA depot.
//!
//! The depot is a directory holding exactly one CA identity:
//!
//! ```text
//! depot/
//!   ca.key   PEM private key, optionally passphrase-encrypted (0600)
//!   ca.pem   PEM CA certificate (0644)
//! ```
//!
//! Files are only ever created with the OS create-new flag, so an existing
//! artifact is never overwritten. A write that fails after the file was
//! created removes the partial file again.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use crate::identity::{CaIdentity, Passphrase};

/// File name of the CA private key.
pub const CA_KEY_FILE: &str = "ca.key";
/// File name of the CA certificate.
pub const CA_CERT_FILE: &str = "ca.pem";

#[cfg(unix)]
const DEPOT_DIR_MODE: u32 = 0o755;
#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const PUBLIC_FILE_MODE: u32 = 0o644;

/// Errors that can occur while reading or writing the depot.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DepotError {
    /// A CA artifact is missing.
    #[error("CA material not found at {}", path.display())]
    NotFound { path: PathBuf },

    /// Refused to overwrite an existing CA artifact.
    #[error("refusing to overwrite existing CA material at {}", path.display())]
    AlreadyExists { path: PathBuf },

    /// The private key could not be decrypted with the supplied passphrase.
    #[error("failed to decrypt CA private key (wrong or missing passphrase)")]
    Decryption,

    /// An artifact exists but is not valid PEM/DER.
    #[error("malformed {what}: {reason}")]
    Encoding { what: &'static str, reason: String },

    /// The certificate does not belong to the private key.
    #[error("CA certificate does not match the CA private key")]
    KeyMismatch,

    /// Any other filesystem failure.
    #[error("depot I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One entry of a depot directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepotEntry {
    pub name: String,
    pub is_dir: bool,
}

/// File-backed CA depot rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileDepot {
    root: PathBuf,
}

impl FileDepot {
    /// Create a handle for the depot at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The depot directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true when a CA certificate is present.
    pub fn has_identity(&self) -> bool {
        self.root.join(CA_CERT_FILE).is_file()
    }

    /// Load and decrypt the CA identity.
    ///
    /// # Errors
    ///
    /// - `DepotError::NotFound` if `ca.pem` or `ca.key` is missing
    /// - `DepotError::Decryption` if the key is encrypted and `passphrase`
    ///   does not decrypt it
    /// - `DepotError::Encoding` if either file is not valid PEM
    /// - `DepotError::KeyMismatch` if the certificate and key do not pair
    pub fn open(&self, passphrase: &Passphrase) -> Result<CaIdentity, DepotError> {
        let cert_pem = self.read(CA_CERT_FILE)?;
        let key_pem = self.read(CA_KEY_FILE)?;

        let certificate = X509::from_pem(&cert_pem).map_err(|e| DepotError::Encoding {
            what: "CA certificate",
            reason: e.to_string(),
        })?;
        let key = decode_private_key(&key_pem, passphrase)?;

        CaIdentity::new(key, certificate)
    }

    /// Create `name` inside the depot with `bytes` as its content.
    ///
    /// See [`FileDepot::create_exclusive_with`].
    pub fn create_exclusive(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, DepotError> {
        self.create_exclusive_with(name, |file| file.write_all(bytes))
    }

    /// Create `name` inside the depot and fill it with `write`.
    ///
    /// The depot directory is created if missing. The file itself is created
    /// atomically with create-new semantics; if it already exists nothing is
    /// written and `DepotError::AlreadyExists` is returned. If `write` (or the
    /// final sync) fails, the partially written file is removed.
    pub fn create_exclusive_with<F>(&self, name: &str, write: F) -> Result<PathBuf, DepotError>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        self.ensure_root()?;
        let path = self.root.join(name);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(file_mode(name));
        }

        let mut file = options.open(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                DepotError::AlreadyExists { path: path.clone() }
            } else {
                DepotError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        if let Err(source) = write(&mut file).and_then(|()| file.sync_all()) {
            drop(file);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial depot file");
            }
            return Err(DepotError::Io { path, source });
        }

        Ok(path)
    }

    /// Remove a file previously created by this process.
    pub fn remove(&self, name: &str) -> Result<(), DepotError> {
        let path = self.root.join(name);
        fs::remove_file(&path).map_err(|source| DepotError::Io { path, source })
    }

    /// List the depot directory.
    pub fn list(&self) -> Result<Vec<DepotEntry>, DepotError> {
        let entries = fs::read_dir(&self.root).map_err(|source| self.io_error(&self.root, source))?;
        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| self.io_error(&self.root, source))?;
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            listing.push(DepotEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    /// Delete the whole depot directory. A missing depot is not an error.
    pub fn wipe(&self) -> Result<(), DepotError> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DepotError::Io {
                path: self.root.clone(),
                source,
            }),
        }
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, DepotError> {
        let path = self.root.join(name);
        fs::read(&path).map_err(|source| self.io_error(&path, source))
    }

    fn ensure_root(&self) -> Result<(), DepotError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DEPOT_DIR_MODE);
        }
        builder.create(&self.root).map_err(|source| DepotError::Io {
            path: self.root.clone(),
            source,
        })
    }

    fn io_error(&self, path: &Path, source: io::Error) -> DepotError {
        if source.kind() == io::ErrorKind::NotFound {
            DepotError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            DepotError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[cfg(unix)]
fn file_mode(name: &str) -> u32 {
    if name == CA_KEY_FILE {
        KEY_FILE_MODE
    } else {
        PUBLIC_FILE_MODE
    }
}

/// Returns true for PEM that carries an encrypted private key, either the
/// legacy `Proc-Type: 4,ENCRYPTED` header form or PKCS#8 `ENCRYPTED PRIVATE KEY`.
fn is_encrypted_pem(pem: &[u8]) -> bool {
    let text = String::from_utf8_lossy(pem);
    text.contains("Proc-Type: 4,ENCRYPTED") || text.contains("BEGIN ENCRYPTED PRIVATE KEY")
}

fn decode_private_key(pem: &[u8], passphrase: &Passphrase) -> Result<PKey<Private>, DepotError> {
    // An empty passphrase is a valid passphrase for an encrypted key
    if is_encrypted_pem(pem) {
        return PKey::private_key_from_pem_passphrase(pem, passphrase.as_bytes())
            .map_err(|_| DepotError::Decryption);
    }

    PKey::private_key_from_pem(pem).map_err(|e| DepotError::Encoding {
        what: "CA private key",
        reason: e.to_string(),
    })
}
