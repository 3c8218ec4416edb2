//! Terminal signer backed by the CA identity.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openssl::hash::MessageDigest;
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Req, X509};

use super::{CsrSigner, SignError, SigningRejection};
use crate::csr::{AltName, SigningRequest};
use crate::generate::{asn1_time, random_serial};
use crate::identity::CaIdentity;
use crate::ledger::IssuanceLedger;

const X509_VERSION_3: i32 = 2;
/// Backdating of notBefore to tolerate client clock skew, in seconds.
const CLOCK_SKEW_SECS: i64 = 600;

/// Issuance settings for the depot signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignerOptions {
    /// Validity of issued certificates in days. Must be positive.
    pub validity_days: u32,
    /// Days before expiry in which a subject may renew. `0` disables the check.
    pub renewal_days: u32,
    /// Add server key usages (keyEncipherment, dataEncipherment, serverAuth).
    pub server_attributes: bool,
}

impl Default for SignerOptions {
    fn default() -> Self {
        Self {
            validity_days: 365,
            renewal_days: 14,
            server_attributes: false,
        }
    }
}

/// Issues certificates with the CA key.
#[derive(Debug)]
pub struct DepotSigner {
    identity: Arc<CaIdentity>,
    options: SignerOptions,
    ledger: IssuanceLedger,
}

impl DepotSigner {
    pub fn new(identity: Arc<CaIdentity>, options: SignerOptions) -> Self {
        Self {
            identity,
            options,
            ledger: IssuanceLedger::new(),
        }
    }

    pub fn ledger(&self) -> &IssuanceLedger {
        &self.ledger
    }

    /// Sign `request` as if the current time were `now`.
    pub fn sign_at(&self, request: &SigningRequest, now: DateTime<Utc>) -> Result<X509, SignError> {
        if self.options.validity_days == 0 {
            return Err(
                SigningRejection::Validity("validity days must be positive".to_string()).into(),
            );
        }

        let csr = request.to_openssl()?;
        let public_key = csr.public_key()?;
        // A verification error is as good as a bad signature
        if !csr.verify(&public_key).unwrap_or(false) {
            return Err(SigningRejection::BadSignature.into());
        }

        let not_before = now - Duration::seconds(CLOCK_SKEW_SECS);
        let not_after = now + Duration::days(i64::from(self.options.validity_days));

        let certificate = self.ledger.issue(
            request.common_name(),
            now,
            not_after,
            self.options.renewal_days,
            || self.build(&csr, request.alt_names(), not_before, not_after),
        )?;

        tracing::info!(
            common_name = ?request.common_name(),
            not_after = %not_after,
            "Issued certificate"
        );
        Ok(certificate)
    }

    fn build(
        &self,
        csr: &X509Req,
        alt_names: &[AltName],
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<X509, SignError> {
        let ca = self.identity.certificate();
        let public_key = csr.public_key()?;

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;
        let serial = random_serial()?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(csr.subject_name())?;
        builder.set_issuer_name(ca.subject_name())?;
        builder.set_pubkey(&public_key)?;
        let not_before = asn1_time(not_before).map_err(SignError::Internal)?;
        let not_after = asn1_time(not_after).map_err(SignError::Internal)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        builder.append_extension(BasicConstraints::new().build()?)?;

        let mut key_usage = KeyUsage::new();
        key_usage.critical().digital_signature();
        let mut extended_key_usage = ExtendedKeyUsage::new();
        extended_key_usage.client_auth();
        if self.options.server_attributes {
            key_usage.key_encipherment().data_encipherment();
            extended_key_usage.server_auth();
        }
        builder.append_extension(key_usage.build()?)?;
        builder.append_extension(extended_key_usage.build()?)?;

        let subject_key_id =
            SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(ca), None))?;
        builder.append_extension(subject_key_id)?;
        let authority_key_id = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(ca), None))?;
        builder.append_extension(authority_key_id)?;

        if !alt_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in alt_names {
                match name {
                    AltName::Dns(dns) => san.dns(dns),
                    AltName::Email(email) => san.email(email),
                    AltName::Uri(uri) => san.uri(uri),
                    AltName::Ip(ip) => san.ip(&ip.to_string()),
                };
            }
            let san = san.build(&builder.x509v3_context(Some(ca), None))?;
            builder.append_extension(san)?;
        }

        builder.sign(self.identity.private_key(), MessageDigest::sha256())?;
        Ok(builder.build())
    }
}

impl CsrSigner for DepotSigner {
    fn sign(&self, request: &SigningRequest) -> Result<X509, SignError> {
        self.sign_at(request, Utc::now())
    }
}
