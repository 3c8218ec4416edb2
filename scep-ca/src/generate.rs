//! CA key and self-signed certificate generation.
//!
//! # Certificate Properties
//! - **Self-signed**: issuer and subject are the same CN/O/OU/C name
//! - **Basic Constraints**: CA=true, critical
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature, critical
//! - **Serial Number**: random 128-bit
//! - **Validity**: `years` calendar years from `not_before`
//! - **Signature**: SHA-256 with RSA

use chrono::{DateTime, Months, Utc};
use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::symm::Cipher;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509Name, X509};

use crate::identity::Passphrase;
use crate::provision::ProvisionError;

const X509_VERSION_3: i32 = 2;
/// Default RSA modulus size for a new CA key.
pub const DEFAULT_KEY_SIZE: u32 = 4096;
/// Default CA validity in years.
pub const DEFAULT_YEARS: u32 = 10;
const MIN_KEY_SIZE: u32 = 1024;
const MAX_KEY_SIZE: u32 = 16384;

/// Distinguished name fields of the CA subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaSubject {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub country: String,
}

impl Default for CaSubject {
    fn default() -> Self {
        Self {
            common_name: "MICROMDM SCEP CA".to_string(),
            organization: "scep-ca".to_string(),
            organizational_unit: "SCEP CA".to_string(),
            country: "US".to_string(),
        }
    }
}

/// Compute the validity window starting at `not_before` and lasting `years`
/// calendar years.
///
/// A start on Feb 29 ends on Feb 28 when the target year is not a leap year.
/// Returns `None` on overflow.
pub fn validity_window(
    not_before: DateTime<Utc>,
    years: u32,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let months = years.checked_mul(12)?;
    let not_after = not_before.checked_add_months(Months::new(months))?;
    Some((not_before, not_after))
}

/// Generate a new RSA key of `bits` length.
pub fn generate_key(bits: u32) -> Result<PKey<Private>, ProvisionError> {
    if !(MIN_KEY_SIZE..=MAX_KEY_SIZE).contains(&bits) {
        return Err(ProvisionError::KeySize(bits));
    }
    let rsa = Rsa::generate(bits).map_err(|e| ProvisionError::KeyGeneration(e.to_string()))?;
    PKey::from_rsa(rsa).map_err(|e| ProvisionError::KeyGeneration(e.to_string()))
}

/// Serialize a private key as PKCS#1 PEM.
///
/// With a non-empty passphrase the PEM is encrypted with AES-256-CBC under a
/// passphrase-derived key (`Proc-Type: 4,ENCRYPTED`). An empty passphrase
/// yields an unencrypted key.
pub fn encode_private_key(
    key: &PKey<Private>,
    passphrase: &Passphrase,
) -> Result<Vec<u8>, ProvisionError> {
    let encoding = |e: openssl::error::ErrorStack| ProvisionError::Encoding {
        what: "CA private key",
        reason: e.to_string(),
    };
    let rsa = key.rsa().map_err(encoding)?;
    if passphrase.is_empty() {
        rsa.private_key_to_pem().map_err(encoding)
    } else {
        rsa.private_key_to_pem_passphrase(Cipher::aes_256_cbc(), passphrase.as_bytes())
            .map_err(encoding)
    }
}

/// Builder for self-signed CA certificates.
///
/// # Examples
/// ```rust,no_run
/// use scep_ca::generate::{generate_key, CaCertificateBuilder, CaSubject};
/// # fn example() -> Result<(), scep_ca::ProvisionError> {
/// let key = generate_key(4096)?;
/// let certificate = CaCertificateBuilder::new(CaSubject::default())
///     .years(10)
///     .build(&key)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CaCertificateBuilder {
    subject: CaSubject,
    years: u32,
    not_before: Option<DateTime<Utc>>,
}

impl CaCertificateBuilder {
    /// Start a builder for `subject` with the default validity.
    pub fn new(subject: CaSubject) -> Self {
        Self {
            subject,
            years: DEFAULT_YEARS,
            not_before: None,
        }
    }

    /// Set the validity period in years.
    pub fn years(mut self, years: u32) -> Self {
        self.years = years;
        self
    }

    /// Pin the start of the validity window (defaults to now).
    pub fn not_before(mut self, not_before: DateTime<Utc>) -> Self {
        self.not_before = Some(not_before);
        self
    }

    /// Build and self-sign the certificate with `key`.
    ///
    /// # Errors
    ///
    /// - `ProvisionError::Validity` if `years` is zero or overflows
    /// - `ProvisionError::SelfSign` if any X.509 field or the signature fails
    pub fn build(self, key: &PKey<Private>) -> Result<X509, ProvisionError> {
        if self.years == 0 {
            return Err(ProvisionError::Validity(self.years));
        }
        let start = self.not_before.unwrap_or_else(Utc::now);
        let (not_before, not_after) =
            validity_window(start, self.years).ok_or(ProvisionError::Validity(self.years))?;

        let sign_err = |e: openssl::error::ErrorStack| ProvisionError::SelfSign(e.to_string());

        let mut builder = X509::builder().map_err(sign_err)?;
        builder.set_version(X509_VERSION_3).map_err(sign_err)?;

        let serial = random_serial().map_err(sign_err)?;
        builder.set_serial_number(&serial).map_err(sign_err)?;

        let mut name = X509Name::builder().map_err(sign_err)?;
        name.append_entry_by_nid(Nid::COUNTRYNAME, &self.subject.country)
            .map_err(sign_err)?;
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.subject.organization)
            .map_err(sign_err)?;
        name.append_entry_by_nid(
            Nid::ORGANIZATIONALUNITNAME,
            &self.subject.organizational_unit,
        )
        .map_err(sign_err)?;
        name.append_entry_by_nid(Nid::COMMONNAME, &self.subject.common_name)
            .map_err(sign_err)?;
        let name = name.build();

        builder.set_subject_name(&name).map_err(sign_err)?;
        builder.set_issuer_name(&name).map_err(sign_err)?;

        let not_before = asn1_time(not_before).map_err(ProvisionError::SelfSign)?;
        let not_after = asn1_time(not_after).map_err(ProvisionError::SelfSign)?;
        builder.set_not_before(&not_before).map_err(sign_err)?;
        builder.set_not_after(&not_after).map_err(sign_err)?;

        builder.set_pubkey(key).map_err(sign_err)?;

        let basic_constraints = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .map_err(sign_err)?;
        builder
            .append_extension(basic_constraints)
            .map_err(sign_err)?;

        let key_usage = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(sign_err)?;
        builder.append_extension(key_usage).map_err(sign_err)?;

        let subject_key_id = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .map_err(sign_err)?;
        builder.append_extension(subject_key_id).map_err(sign_err)?;

        builder
            .sign(key, MessageDigest::sha256())
            .map_err(sign_err)?;
        Ok(builder.build())
    }
}

/// A random 128-bit serial number.
pub(crate) fn random_serial() -> Result<Asn1Integer, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    serial.to_asn1_integer()
}

/// Convert a UTC timestamp into an ASN.1 time.
pub(crate) fn asn1_time(at: DateTime<Utc>) -> Result<Asn1Time, String> {
    let secs = at
        .timestamp()
        .try_into()
        .map_err(|_| format!("timestamp {} out of range", at))?;
    Asn1Time::from_unix(secs).map_err(|e| e.to_string())
}
