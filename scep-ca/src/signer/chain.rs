//! Ordered policy stages in front of a terminal signer.

use std::sync::Arc;

use openssl::x509::X509;

use super::challenge::ChallengePolicy;
use super::depot_signer::DepotSigner;
use super::verifier::{CsrVerifier, ExternalVerifierPolicy};
use super::{CsrSigner, SignError, SigningRejection};
use crate::csr::SigningRequest;

/// Identifies a step of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    ExternalVerifier,
    Challenge,
    Terminal,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExternalVerifier => f.write_str("external_verifier"),
            Self::Challenge => f.write_str("challenge"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

/// A policy check evaluated before the terminal signer.
#[derive(Debug)]
pub enum PolicyStage {
    ExternalVerifier(ExternalVerifierPolicy),
    Challenge(ChallengePolicy),
}

impl PolicyStage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::ExternalVerifier(_) => StageKind::ExternalVerifier,
            Self::Challenge(_) => StageKind::Challenge,
        }
    }

    fn check(&self, request: &SigningRequest) -> Result<(), SigningRejection> {
        match self {
            Self::ExternalVerifier(policy) => policy.check(request),
            Self::Challenge(policy) => policy.check(request),
        }
    }
}

/// Policy stages evaluated in order, then the terminal signer.
///
/// Each `with_*` call wraps the chain built so far, so the stage added last
/// runs first:
///
/// ```rust,ignore
/// let chain = SignerChain::new(depot_signer)
///     .with_challenge("secret")
///     .with_verifier(verifier);
/// assert_eq!(
///     chain.order(),
///     vec![StageKind::ExternalVerifier, StageKind::Challenge, StageKind::Terminal]
/// );
/// ```
#[derive(Debug)]
pub struct SignerChain<S = DepotSigner> {
    stages: Vec<PolicyStage>,
    terminal: S,
}

impl<S: CsrSigner> SignerChain<S> {
    /// A chain with no policy stages.
    pub fn new(terminal: S) -> Self {
        Self {
            stages: Vec::new(),
            terminal,
        }
    }

    /// Require the request's challenge password to equal `secret`.
    pub fn with_challenge(self, secret: impl Into<String>) -> Self {
        self.wrap(PolicyStage::Challenge(ChallengePolicy::new(secret)))
    }

    /// Consult `verifier` before anything else in the chain.
    pub fn with_verifier(self, verifier: Arc<dyn CsrVerifier>) -> Self {
        self.wrap(PolicyStage::ExternalVerifier(ExternalVerifierPolicy::new(
            verifier,
        )))
    }

    fn wrap(mut self, stage: PolicyStage) -> Self {
        self.stages.insert(0, stage);
        self
    }

    /// Evaluation order, ending with the terminal signer.
    pub fn order(&self) -> Vec<StageKind> {
        self.stages
            .iter()
            .map(PolicyStage::kind)
            .chain(std::iter::once(StageKind::Terminal))
            .collect()
    }

    pub fn terminal(&self) -> &S {
        &self.terminal
    }

    /// Sign, recording every step that was evaluated into `trace`.
    pub fn sign_traced(
        &self,
        request: &SigningRequest,
        trace: &mut Vec<StageKind>,
    ) -> Result<X509, SignError> {
        for stage in &self.stages {
            trace.push(stage.kind());
            if let Err(rejection) = stage.check(request) {
                tracing::debug!(stage = %stage.kind(), error = %rejection, "Signing request rejected");
                return Err(rejection.into());
            }
        }
        trace.push(StageKind::Terminal);
        self.terminal.sign(request)
    }
}

impl<S: CsrSigner> CsrSigner for SignerChain<S> {
    fn sign(&self, request: &SigningRequest) -> Result<X509, SignError> {
        self.sign_traced(request, &mut Vec::new())
    }
}
