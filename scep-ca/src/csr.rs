//! PKCS#10 certificate signing requests.
//!
//! # Security
//!
//! - Input is limited to 16KB before any parsing happens
//! - ASN.1 parsing is done by x509_parser; the raw DER is kept verbatim for
//!   the external verifier and the signer

use std::net::IpAddr;

use openssl::x509::X509Req;
use thiserror::Error;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::cri_attributes::ParsedCriAttribute;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

/// Maximum CSR size (16KB is generous for a single request)
pub const MAX_CSR_SIZE: usize = 16 * 1024;

/// Errors that can occur while parsing a CSR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CsrError {
    #[error("CSR too large: {0} bytes (max {MAX_CSR_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse CSR: {0}")]
    Parse(String),
}

/// A subject alternative name requested in the CSR extension request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Email(String),
    Uri(String),
    Ip(IpAddr),
}

/// A parsed certificate signing request.
#[derive(Debug, Clone)]
pub struct SigningRequest {
    der: Vec<u8>,
    common_name: Option<String>,
    challenge: Option<String>,
    alt_names: Vec<AltName>,
}

impl SigningRequest {
    /// Parse a DER-encoded PKCS#10 request.
    ///
    /// # Errors
    ///
    /// Returns `CsrError::TooLarge` if the input exceeds 16KB.
    /// Returns `CsrError::Parse` if the request is malformed.
    pub fn from_der(der: &[u8]) -> Result<Self, CsrError> {
        if der.len() > MAX_CSR_SIZE {
            return Err(CsrError::TooLarge(der.len()));
        }

        let (_, csr) = X509CertificationRequest::from_der(der)
            .map_err(|e| CsrError::Parse(format!("{:?}", e)))?;
        let info = &csr.certification_request_info;

        let common_name = info
            .subject
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let challenge = info
            .iter_attributes()
            .find_map(|attr| match attr.parsed_attribute() {
                ParsedCriAttribute::ChallengePassword(password) => Some(password.0.clone()),
                _ => None,
            });

        let mut alt_names = Vec::new();
        if let Some(extensions) = csr.requested_extensions() {
            for extension in extensions {
                if let ParsedExtension::SubjectAlternativeName(san) = extension {
                    alt_names.extend(san.general_names.iter().filter_map(alt_name));
                }
            }
        }

        Ok(Self {
            der: der.to_vec(),
            common_name,
            challenge,
            alt_names,
        })
    }

    /// Parse a PEM-encoded request.
    pub fn from_pem(pem: &[u8]) -> Result<Self, CsrError> {
        let req = X509Req::from_pem(pem).map_err(|e| CsrError::Parse(e.to_string()))?;
        let der = req.to_der().map_err(|e| CsrError::Parse(e.to_string()))?;
        Self::from_der(&der)
    }

    /// Override the challenge password, e.g. when the transport carried it
    /// outside the CSR.
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    /// The raw DER bytes, exactly as received.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// The embedded challenge password, if any.
    pub fn challenge(&self) -> Option<&str> {
        self.challenge.as_deref()
    }

    pub fn alt_names(&self) -> &[AltName] {
        &self.alt_names
    }

    /// Re-parse with openssl for signature verification and issuance.
    pub fn to_openssl(&self) -> Result<X509Req, openssl::error::ErrorStack> {
        X509Req::from_der(&self.der)
    }
}

fn alt_name(name: &GeneralName<'_>) -> Option<AltName> {
    match name {
        GeneralName::DNSName(dns) => Some(AltName::Dns(dns.to_string())),
        GeneralName::RFC822Name(email) => Some(AltName::Email(email.to_string())),
        GeneralName::URI(uri) => Some(AltName::Uri(uri.to_string())),
        GeneralName::IPAddress(bytes) => match bytes.len() {
            4 => <[u8; 4]>::try_from(*bytes).ok().map(|b| AltName::Ip(IpAddr::from(b))),
            16 => <[u8; 16]>::try_from(*bytes).ok().map(|b| AltName::Ip(IpAddr::from(b))),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::stack::Stack;
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509NameBuilder, X509ReqBuilder};

    fn build_csr(cn: &str, sans: &[&str]) -> Vec<u8> {
        let key = PKey::from_rsa(Rsa::generate(1024).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let mut builder = X509ReqBuilder::new().unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        if !sans.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for entry in sans {
                san.dns(entry);
            }
            let ext = san.build(&builder.x509v3_context(None)).unwrap();
            let mut stack = Stack::new().unwrap();
            stack.push(ext).unwrap();
            builder.add_extensions(&stack).unwrap();
        }
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        builder.build().to_der().unwrap()
    }

    #[test]
    fn test_csr_too_large() {
        let large = vec![0u8; MAX_CSR_SIZE + 1];
        assert!(matches!(
            SigningRequest::from_der(&large),
            Err(CsrError::TooLarge(_))
        ));
    }

    #[test]
    fn test_invalid_csr() {
        assert!(matches!(
            SigningRequest::from_der(b"not a csr"),
            Err(CsrError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_subject_and_alt_names() {
        let der = build_csr("device-01", &["device-01.example.com", "alt.example.com"]);
        let req = SigningRequest::from_der(&der).unwrap();

        assert_eq!(req.der(), der.as_slice());
        assert_eq!(req.common_name(), Some("device-01"));
        assert_eq!(req.challenge(), None);
        assert_eq!(
            req.alt_names(),
            &[
                AltName::Dns("device-01.example.com".to_string()),
                AltName::Dns("alt.example.com".to_string()),
            ]
        );
    }

    #[test]
    fn test_with_challenge_overrides() {
        let der = build_csr("device-02", &[]);
        let req = SigningRequest::from_der(&der).unwrap().with_challenge("secret");
        assert_eq!(req.challenge(), Some("secret"));
        assert!(req.alt_names().is_empty());
    }

    #[test]
    fn test_from_pem() {
        let der = build_csr("device-03", &[]);
        let pem = X509Req::from_der(&der).unwrap().to_pem().unwrap();
        let req = SigningRequest::from_pem(&pem).unwrap();
        assert_eq!(req.common_name(), Some("device-03"));
        assert_eq!(req.der(), der.as_slice());
    }
}
