//! Certificate signing.
//!
//! A [`SignerChain`] runs an ordered list of policy stages in front of a
//! terminal [`CsrSigner`], normally the [`DepotSigner`] holding the CA key.
//! The first stage that rejects ends evaluation; later stages and the
//! terminal signer never see the request.

mod chain;
mod challenge;
mod depot_signer;
mod verifier;

pub use chain::{PolicyStage, SignerChain, StageKind};
pub use challenge::ChallengePolicy;
pub use depot_signer::{DepotSigner, SignerOptions};
pub use verifier::{CsrVerifier, ExecutableVerifier, ExternalVerifierPolicy, Verdict, VerifierError};

use std::sync::Arc;

use openssl::error::ErrorStack;
use openssl::x509::X509;

use crate::csr::SigningRequest;

/// Policy reasons for refusing to issue a certificate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SigningRejection {
    /// The challenge password is missing or wrong.
    #[error("challenge password mismatch")]
    Challenge,

    /// The external CSR verifier refused the request.
    #[error("CSR verification failed: {message}")]
    Verification { message: String },

    /// The subject already holds a certificate outside its renewal window.
    #[error("certificate for {common_name} is not due for renewal ({days_remaining} days remaining)")]
    RenewalWindow {
        common_name: String,
        days_remaining: i64,
    },

    /// The requested validity is not acceptable.
    #[error("invalid validity: {0}")]
    Validity(String),

    /// The CSR self-signature does not verify.
    #[error("CSR signature is invalid")]
    BadSignature,
}

/// Errors returned by a signer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SignError {
    /// Refused by policy.
    #[error(transparent)]
    Rejected(#[from] SigningRejection),

    /// The crypto backend failed while building or signing.
    #[error("certificate signing failed: {0}")]
    Crypto(#[from] ErrorStack),

    /// Any other failure inside the signer.
    #[error("certificate signing failed: {0}")]
    Internal(String),
}

impl SignError {
    /// Returns true if the request was refused by policy rather than failing.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Produce a signed certificate from a signing request, or fail.
pub trait CsrSigner: Send + Sync {
    fn sign(&self, request: &SigningRequest) -> Result<X509, SignError>;
}

impl<S: CsrSigner + ?Sized> CsrSigner for Arc<S> {
    fn sign(&self, request: &SigningRequest) -> Result<X509, SignError> {
        (**self).sign(request)
    }
}
