//! End-to-end tests for CA bootstrap.
//!
//! These tests drive `provision` against real temporary depots:
//! 1. Exclusive-create: a second bootstrap never overwrites anything
//! 2. Passphrase handling of the generated key
//! 3. Inline and path-copy material round-trips through `open`

mod common;

use std::fs;

use openssl::symm::Cipher;

use common::{fast_generate_inputs, generated_depot};
use scep_ca::{
    provision, BootstrapInputs, DepotError, FileDepot, Passphrase, ProvisionError, Strategy,
    CA_CERT_FILE, CA_KEY_FILE,
};

// ============================================================================
// Exclusive Create
// ============================================================================

#[test]
fn test_generate_twice_leaves_depot_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let depot = generated_depot(dir.path(), "");

    let key_before = fs::read(dir.path().join(CA_KEY_FILE)).unwrap();
    let cert_before = fs::read(dir.path().join(CA_CERT_FILE)).unwrap();

    let err = provision(&depot, &fast_generate_inputs("")).unwrap_err();
    assert!(
        matches!(err, ProvisionError::Depot(DepotError::AlreadyExists { .. })),
        "unexpected error: {err}"
    );

    assert_eq!(fs::read(dir.path().join(CA_KEY_FILE)).unwrap(), key_before);
    assert_eq!(fs::read(dir.path().join(CA_CERT_FILE)).unwrap(), cert_before);
}

#[test]
fn test_inline_over_generated_leaves_depot_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let depot = generated_depot(dir.path(), "");
    let cert_before = fs::read(dir.path().join(CA_CERT_FILE)).unwrap();

    let inputs = BootstrapInputs {
        inline_cert: Some("other cert".to_string()),
        inline_key: Some("other key".to_string()),
        ..Default::default()
    };
    assert!(provision(&depot, &inputs).is_err());
    assert_eq!(fs::read(dir.path().join(CA_CERT_FILE)).unwrap(), cert_before);
    // Generated identity still opens
    depot.open(&Passphrase::default()).unwrap();
}

// ============================================================================
// Passphrase
// ============================================================================

#[test]
fn test_key_opens_only_with_its_passphrase() {
    let dir = tempfile::tempdir().unwrap();
    let depot = generated_depot(dir.path(), "correct horse");

    let key_pem = fs::read_to_string(dir.path().join(CA_KEY_FILE)).unwrap();
    assert!(key_pem.contains("Proc-Type: 4,ENCRYPTED"));
    assert!(key_pem.contains("DEK-Info: AES-256-CBC"));

    let identity = depot.open(&Passphrase::new("correct horse")).unwrap();
    assert_eq!(identity.common_name().as_deref(), Some("MICROMDM SCEP CA"));

    for wrong in ["", "correct", "correct horse "] {
        let err = depot.open(&Passphrase::new(wrong)).unwrap_err();
        assert!(
            matches!(err, DepotError::Decryption),
            "passphrase {wrong:?} gave {err}"
        );
    }
}

#[test]
fn test_unencrypted_key_opens_without_passphrase() {
    let dir = tempfile::tempdir().unwrap();
    let depot = generated_depot(dir.path(), "");

    let key_pem = fs::read_to_string(dir.path().join(CA_KEY_FILE)).unwrap();
    assert!(!key_pem.contains("ENCRYPTED"));
    depot.open(&Passphrase::default()).unwrap();
}

#[test]
fn test_key_encrypted_under_empty_passphrase_opens() {
    let source = tempfile::tempdir().unwrap();
    let generated = generated_depot(source.path(), "").open(&Passphrase::default()).unwrap();

    let encrypted = generated
        .private_key()
        .rsa()
        .unwrap()
        .private_key_to_pem_passphrase(Cipher::des_ede3_cbc(), b"")
        .unwrap();
    let key = String::from_utf8(encrypted).unwrap();
    assert!(key.contains("Proc-Type: 4,ENCRYPTED"));
    assert!(key.contains("DEK-Info: DES-EDE3-CBC"));

    let target = tempfile::tempdir().unwrap();
    let depot = FileDepot::new(target.path());
    let inputs = BootstrapInputs {
        inline_cert: Some(fs::read_to_string(source.path().join(CA_CERT_FILE)).unwrap()),
        inline_key: Some(key),
        ..Default::default()
    };
    provision(&depot, &inputs).unwrap();

    let identity = depot.open(&Passphrase::default()).unwrap();
    assert_eq!(
        identity.certificate_der().unwrap(),
        generated.certificate_der().unwrap()
    );

    let err = depot.open(&Passphrase::new("not empty")).unwrap_err();
    assert!(matches!(err, DepotError::Decryption));
}

// ============================================================================
// Inline / Path Copy
// ============================================================================

#[test]
fn test_inline_material_round_trips() {
    let source = tempfile::tempdir().unwrap();
    generated_depot(source.path(), "pw");
    let cert = fs::read_to_string(source.path().join(CA_CERT_FILE)).unwrap();
    let key = fs::read_to_string(source.path().join(CA_KEY_FILE)).unwrap();

    let target = tempfile::tempdir().unwrap();
    let depot = FileDepot::new(target.path().join("depot"));
    let inputs = BootstrapInputs {
        inline_cert: Some(cert.clone()),
        inline_key: Some(key.clone()),
        ..Default::default()
    };
    assert_eq!(provision(&depot, &inputs).unwrap(), Strategy::Inline);

    assert_eq!(fs::read_to_string(depot.root().join(CA_CERT_FILE)).unwrap(), cert);
    assert_eq!(fs::read_to_string(depot.root().join(CA_KEY_FILE)).unwrap(), key);

    let opened = depot.open(&Passphrase::new("pw")).unwrap();
    let original = FileDepot::new(source.path())
        .open(&Passphrase::new("pw"))
        .unwrap();
    assert_eq!(
        opened.certificate_der().unwrap(),
        original.certificate_der().unwrap()
    );
}

#[test]
fn test_path_copy_round_trips() {
    let source = tempfile::tempdir().unwrap();
    generated_depot(source.path(), "");

    let target = tempfile::tempdir().unwrap();
    let depot = FileDepot::new(target.path());
    let inputs = BootstrapInputs {
        path_cert: Some(source.path().join(CA_CERT_FILE)),
        path_key: Some(source.path().join(CA_KEY_FILE)),
        ..Default::default()
    };
    assert_eq!(provision(&depot, &inputs).unwrap(), Strategy::PathCopy);

    for name in [CA_CERT_FILE, CA_KEY_FILE] {
        assert_eq!(
            fs::read(target.path().join(name)).unwrap(),
            fs::read(source.path().join(name)).unwrap()
        );
    }
    depot.open(&Passphrase::default()).unwrap();
}

#[test]
fn test_mismatched_pair_is_key_mismatch() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    generated_depot(first.path(), "");
    generated_depot(second.path(), "");

    let target = tempfile::tempdir().unwrap();
    let depot = FileDepot::new(target.path());
    let inputs = BootstrapInputs {
        path_cert: Some(first.path().join(CA_CERT_FILE)),
        path_key: Some(second.path().join(CA_KEY_FILE)),
        ..Default::default()
    };
    provision(&depot, &inputs).unwrap();

    let err = depot.open(&Passphrase::default()).unwrap_err();
    assert!(matches!(err, DepotError::KeyMismatch));
}
