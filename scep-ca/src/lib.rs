//! CA identity and certificate issuance for the SCEP server.
//!
//! This crate owns everything that touches CA key material:
//! - [`depot::FileDepot`] - On-disk CA identity with exclusive-create writes
//! - [`provision`] - CA bootstrap (inline, path copy or generate)
//! - [`csr::SigningRequest`] - Parsed PKCS#10 requests
//! - [`signer::SignerChain`] - Policy stages in front of the CA signer
//!
//! It is synchronous and has no logging sinks; it only emits `tracing` events.
//!
//! # Example
//!
//! ```ignore
//! use scep_ca::{FileDepot, Passphrase, SignerChain, DepotSigner, SignerOptions};
//!
//! let depot = FileDepot::new("depot");
//! let identity = Arc::new(depot.open(&Passphrase::new("secret"))?);
//! let chain = SignerChain::new(DepotSigner::new(identity, SignerOptions::default()))
//!     .with_challenge("enroll-me");
//! let cert = chain.sign(&SigningRequest::from_der(&csr_der)?)?;
//! ```

pub mod csr;
pub mod depot;
pub mod generate;
pub mod identity;
pub mod ledger;
pub mod provision;
pub mod signer;

pub use csr::{AltName, CsrError, SigningRequest};
pub use depot::{DepotEntry, DepotError, FileDepot, CA_CERT_FILE, CA_KEY_FILE};
pub use generate::CaSubject;
pub use identity::{CaIdentity, Passphrase};
pub use ledger::IssuanceLedger;
pub use provision::{provision, BootstrapInputs, ProvisionError, Strategy};
pub use signer::{
    CsrSigner, CsrVerifier, DepotSigner, ExecutableVerifier, SignError, SignerChain,
    SignerOptions, SigningRejection, StageKind, Verdict, VerifierError,
};
