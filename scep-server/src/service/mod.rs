//! SCEP enrollment service.
//!
//! [`ScepService`] answers the three SCEP operations on top of a CA identity
//! and a signer. [`compose`] builds the production stack: the policy-enforcing
//! signer chain wrapped in the service, wrapped in [`LoggingService`].

mod logging;

pub use logging::LoggingService;

use std::sync::Arc;

use scep_ca::{
    CaIdentity, CsrError, CsrSigner, CsrVerifier, DepotSigner, SignError, SignerChain,
    SignerOptions, SigningRequest,
};
use thiserror::Error;

/// Capabilities advertised by `GetCACaps`.
pub const CA_CAPABILITIES: &[&str] = &[
    "Renewal",
    "SHA-1",
    "SHA-256",
    "AES",
    "DES3",
    "SCEPStandard",
    "POSTPKIOperation",
];

/// Errors returned by an enrollment service.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The request message could not be decoded.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// The signer refused or failed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// Encoding the response failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CsrError> for ServiceError {
    fn from(e: CsrError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

/// The SCEP operations, independent of any transport.
pub trait EnrollmentService: Send + Sync + 'static {
    /// DER of the CA certificate.
    fn ca_certificate(&self) -> Result<Vec<u8>, ServiceError>;

    /// Newline-separated capability names.
    fn ca_capabilities(&self) -> Result<String, ServiceError>;

    /// Sign the request in `message` and return the issued certificate DER.
    fn pki_operation(&self, message: &[u8]) -> Result<Vec<u8>, ServiceError>;
}

impl<T: EnrollmentService + ?Sized> EnrollmentService for Arc<T> {
    fn ca_certificate(&self) -> Result<Vec<u8>, ServiceError> {
        (**self).ca_certificate()
    }

    fn ca_capabilities(&self) -> Result<String, ServiceError> {
        (**self).ca_capabilities()
    }

    fn pki_operation(&self, message: &[u8]) -> Result<Vec<u8>, ServiceError> {
        (**self).pki_operation(message)
    }
}

/// Enrollment service backed by a CA identity and a signer.
pub struct ScepService<S> {
    ca_der: Vec<u8>,
    signer: S,
}

impl<S: CsrSigner + 'static> ScepService<S> {
    pub fn new(identity: &CaIdentity, signer: S) -> Result<Self, ServiceError> {
        let ca_der = identity
            .certificate_der()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(Self { ca_der, signer })
    }
}

impl<S: CsrSigner + 'static> EnrollmentService for ScepService<S> {
    fn ca_certificate(&self) -> Result<Vec<u8>, ServiceError> {
        Ok(self.ca_der.clone())
    }

    fn ca_capabilities(&self) -> Result<String, ServiceError> {
        Ok(CA_CAPABILITIES.join("\n"))
    }

    fn pki_operation(&self, message: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let request = SigningRequest::from_der(message)?;
        let certificate = self.signer.sign(&request)?;
        certificate
            .to_der()
            .map_err(|e| ServiceError::Internal(e.to_string()))
    }
}

impl<S> std::fmt::Debug for ScepService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScepService").finish_non_exhaustive()
    }
}

/// Build the signer chain: depot signer, then the challenge policy if a
/// secret is set, then the external verifier if one is configured.
pub fn signer_chain(
    identity: Arc<CaIdentity>,
    options: SignerOptions,
    challenge: &str,
    verifier: Option<Arc<dyn CsrVerifier>>,
) -> SignerChain {
    let mut chain = SignerChain::new(DepotSigner::new(identity, options));
    if !challenge.is_empty() {
        chain = chain.with_challenge(challenge);
    }
    if let Some(verifier) = verifier {
        chain = chain.with_verifier(verifier);
    }
    chain
}

/// Wrap `signer` into the logged enrollment service.
pub fn compose<S: CsrSigner + 'static>(
    identity: &CaIdentity,
    signer: S,
) -> Result<LoggingService<ScepService<S>>, ServiceError> {
    Ok(LoggingService::new(ScepService::new(identity, signer)?))
}
