use super::*;
use crate::key_management::{KeyGenPolicy, KeyGenSpec, SoftwareKeyStore};
use chrono::Utc;

fn keypair(store: &SoftwareKeyStore, bits: usize) -> KeypairHandle {
    let policy = KeyGenPolicy {
        key_size: bits,
        ..KeyGenPolicy::default()
    };
    let spec = KeyGenSpec::negotiate("codec", &store.capabilities(), &policy, Utc::now()).unwrap();
    store.load_or_create_keypair(&spec).unwrap()
}

#[test]
fn test_encrypt_decrypt() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 1024);
    let codec = CipherCodec::new();

    let plaintext = b"secret1";
    let ciphertext = codec.encrypt(handle.public_key().unwrap(), plaintext).unwrap();

    // Verify ciphertext is one modulus and not the plaintext
    assert_eq!(ciphertext.len(), 128);
    assert_ne!(&ciphertext[..], &plaintext[..]);

    let decrypted = codec.decrypt(&store, &handle, &ciphertext).unwrap();
    assert_eq!(decrypted.as_bytes(), plaintext);
}

#[test]
fn test_encryption_is_randomized() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 1024);
    let codec = CipherCodec::new();
    let public_key = handle.public_key().unwrap();

    let first = codec.encrypt(public_key, b"same input").unwrap();
    let second = codec.encrypt(public_key, b"same input").unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_empty_plaintext() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 1024);
    let codec = CipherCodec::new();

    let ciphertext = codec.encrypt(handle.public_key().unwrap(), b"").unwrap();
    let decrypted = codec.decrypt(&store, &handle, &ciphertext).unwrap();
    assert!(decrypted.is_empty());
}

#[test]
fn test_payload_bound_2048() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 2048);
    let codec = CipherCodec::new();
    let public_key = handle.public_key().unwrap();

    assert_eq!(CipherCodec::max_plaintext_len(public_key), 245);

    let fits = vec![0xA5u8; 245];
    let ciphertext = codec.encrypt(public_key, &fits).unwrap();
    let decrypted = codec.decrypt(&store, &handle, &ciphertext).unwrap();
    assert_eq!(decrypted.as_bytes(), &fits[..]);

    let too_large = vec![0xA5u8; 246];
    match codec.encrypt(public_key, &too_large) {
        Err(CipherError::PayloadTooLarge { len, max }) => {
            assert_eq!(len, 246);
            assert_eq!(max, 245);
        }
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    }
}

#[test]
fn test_wrong_length_ciphertext() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 1024);
    let codec = CipherCodec::new();

    let result = codec.decrypt(&store, &handle, &[0u8; 17]);
    assert!(matches!(result, Err(CipherError::InvalidCiphertext(_))));
}

#[test]
fn test_tampered_ciphertext() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 1024);
    let codec = CipherCodec::new();

    let mut ciphertext = codec.encrypt(handle.public_key().unwrap(), b"secret1").unwrap();
    ciphertext[0] ^= 0xFF;
    ciphertext[64] ^= 0x01;

    // Tampering either fails the padding check or yields different bytes
    match codec.decrypt(&store, &handle, &ciphertext) {
        Err(CipherError::InvalidCiphertext(_)) => {}
        Ok(plaintext) => assert_ne!(plaintext.as_bytes(), b"secret1"),
        Err(other) => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_missing_key_is_underlying_failure() {
    let store = SoftwareKeyStore::in_memory();
    let handle = keypair(&store, 1024);
    let codec = CipherCodec::new();
    let ciphertext = codec.encrypt(handle.public_key().unwrap(), b"secret1").unwrap();

    store.delete_alias("codec").unwrap();
    let result = codec.decrypt(&store, &handle, &ciphertext);
    assert!(matches!(result, Err(CipherError::UnderlyingFailure { .. })));
}
