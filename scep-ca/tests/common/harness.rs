//! Test harnesses for CA bootstrap and signing tests.
//!
//! CSRs carrying a challengePassword attribute are assembled by hand because
//! the openssl request builder has no attribute setter.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509NameBuilder, X509ReqBuilder, X509};
use scep_ca::{
    provision, BootstrapInputs, CsrSigner, FileDepot, Passphrase, SignError, SigningRequest,
};

/// 1.2.840.113549.1.9.7
const OID_CHALLENGE_PASSWORD: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x09, 0x07];
/// 1.2.840.113549.1.1.11
const OID_SHA256_WITH_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B];

/// Small key for fast tests.
pub fn test_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(1024).expect("rsa keygen")).expect("pkey")
}

/// Bootstrap inputs that generate a small CA quickly.
pub fn fast_generate_inputs(passphrase: &str) -> BootstrapInputs {
    BootstrapInputs {
        key_size: 2048,
        years: 1,
        passphrase: Passphrase::new(passphrase),
        ..Default::default()
    }
}

/// Provision a generated CA into `dir` and return the depot.
pub fn generated_depot(dir: &Path, passphrase: &str) -> FileDepot {
    let depot = FileDepot::new(dir);
    provision(&depot, &fast_generate_inputs(passphrase)).expect("provision CA");
    depot
}

/// A plain CSR for `cn` without attributes.
pub fn csr_der(cn: &str) -> Vec<u8> {
    let key = test_key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509ReqBuilder::new().unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    builder.build().to_der().unwrap()
}

/// A CSR for `cn` carrying `challenge` as its challengePassword attribute.
pub fn csr_der_with_challenge(cn: &str, challenge: &str) -> Vec<u8> {
    let key = test_key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let attribute = tlv(
        0x30,
        &[
            tlv(0x06, OID_CHALLENGE_PASSWORD),
            tlv(0x31, &tlv(0x13, challenge.as_bytes())),
        ]
        .concat(),
    );
    let info = tlv(
        0x30,
        &[
            tlv(0x02, &[0x00]),
            name.to_der().unwrap(),
            key.public_key_to_der().unwrap(),
            tlv(0xA0, &attribute),
        ]
        .concat(),
    );

    let mut signer = Signer::new(MessageDigest::sha256(), &key).unwrap();
    signer.update(&info).unwrap();
    let signature = signer.sign_to_vec().unwrap();

    let algorithm = tlv(0x30, &[tlv(0x06, OID_SHA256_WITH_RSA), vec![0x05, 0x00]].concat());
    let mut bits = vec![0x00];
    bits.extend_from_slice(&signature);
    tlv(0x30, &[info, algorithm, tlv(0x03, &bits)].concat())
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    let len = content.len();
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
    out.extend_from_slice(content);
    out
}

/// Terminal signer that counts calls and delegates to an inner signer.
pub struct CountingSigner<S> {
    inner: S,
    calls: AtomicUsize,
}

impl<S: CsrSigner> CountingSigner<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<S: CsrSigner> CsrSigner for CountingSigner<S> {
    fn sign(&self, request: &SigningRequest) -> Result<X509, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sign(request)
    }
}
