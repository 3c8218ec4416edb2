//! Challenge password policy.

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::SigningRejection;
use crate::csr::SigningRequest;

/// Rejects requests whose challenge password does not match the shared secret.
pub struct ChallengePolicy {
    secret: Zeroizing<String>,
}

impl ChallengePolicy {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Compare the request's challenge (missing counts as empty) with the
    /// secret in constant time.
    pub fn check(&self, request: &SigningRequest) -> Result<(), SigningRejection> {
        let presented = request.challenge().unwrap_or_default();
        if bool::from(presented.as_bytes().ct_eq(self.secret.as_bytes())) {
            Ok(())
        } else {
            tracing::debug!(common_name = ?request.common_name(), "Challenge password mismatch");
            Err(SigningRejection::Challenge)
        }
    }
}

// Explicitly NO secret in Debug output
impl std::fmt::Debug for ChallengePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengePolicy").finish_non_exhaustive()
    }
}
