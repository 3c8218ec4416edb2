//! External CSR verification.
//!
//! The verifier receives the raw CSR DER and answers accept or reject. The
//! stock implementation runs a program, feeds the DER on stdin and accepts
//! iff the program exits with status 0.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use thiserror::Error;

use super::SigningRejection;
use crate::csr::SigningRequest;

/// Outcome of an external verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject { message: Option<String> },
}

/// Errors that can occur while setting up or running a verifier.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifierError {
    #[error("CSR verifier not found at {}", path.display())]
    NotFound { path: PathBuf },

    #[error("CSR verifier at {} is not executable", path.display())]
    NotExecutable { path: PathBuf },

    #[error("failed to run CSR verifier {}: {source}", path.display())]
    Run {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Decides whether a CSR may be signed.
pub trait CsrVerifier: Send + Sync {
    fn verify(&self, csr_der: &[u8]) -> Result<Verdict, VerifierError>;
}

/// Runs an executable for every request.
#[derive(Debug, Clone)]
pub struct ExecutableVerifier {
    program: PathBuf,
}

impl ExecutableVerifier {
    /// Check that `program` exists and is executable.
    ///
    /// # Errors
    ///
    /// - `VerifierError::NotFound` if the path does not exist or is not a file
    /// - `VerifierError::NotExecutable` if no execute bit is set (unix)
    pub fn new(program: impl Into<PathBuf>) -> Result<Self, VerifierError> {
        let program = program.into();
        let metadata = std::fs::metadata(&program).map_err(|_| VerifierError::NotFound {
            path: program.clone(),
        })?;
        if !metadata.is_file() {
            return Err(VerifierError::NotFound { path: program });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(VerifierError::NotExecutable { path: program });
            }
        }

        Ok(Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run_error(&self, source: io::Error) -> VerifierError {
        VerifierError::Run {
            path: self.program.clone(),
            source,
        }
    }
}

impl CsrVerifier for ExecutableVerifier {
    fn verify(&self, csr_der: &[u8]) -> Result<Verdict, VerifierError> {
        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.run_error(e))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A verifier may decide without reading all of its input
            match stdin.write_all(csr_der) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.run_error(e));
                }
            }
        }

        let output = child.wait_with_output().map_err(|e| self.run_error(e))?;
        if output.status.success() {
            return Ok(Verdict::Accept);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            Some(format!("verifier exited with {}", output.status))
        } else {
            Some(stderr)
        };
        Ok(Verdict::Reject { message })
    }
}

/// Policy stage that consults a [`CsrVerifier`].
#[derive(Clone)]
pub struct ExternalVerifierPolicy {
    verifier: Arc<dyn CsrVerifier>,
}

impl ExternalVerifierPolicy {
    pub fn new(verifier: Arc<dyn CsrVerifier>) -> Self {
        Self { verifier }
    }

    /// Hand the raw CSR to the verifier. A reject or a verifier error both
    /// refuse the request.
    pub fn check(&self, request: &SigningRequest) -> Result<(), SigningRejection> {
        match self.verifier.verify(request.der()) {
            Ok(Verdict::Accept) => Ok(()),
            Ok(Verdict::Reject { message }) => {
                let message = message.unwrap_or_else(|| "rejected by verifier".to_string());
                tracing::info!(common_name = ?request.common_name(), %message, "CSR rejected by verifier");
                Err(SigningRejection::Verification { message })
            }
            Err(e) => {
                tracing::warn!(error = %e, "CSR verifier failed");
                Err(SigningRejection::Verification {
                    message: e.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for ExternalVerifierPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalVerifierPolicy").finish_non_exhaustive()
    }
}
