#![no_main]

use std::sync::{Arc, OnceLock};

use arbitrary::Arbitrary;
use keyseal::{
    error::{CipherError, SecretError},
    key_management::{KeyGenPolicy, SoftwareKeyStore},
    store::SecretStore,
};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct CodecFuzzInput {
    plaintext: Vec<u8>,
    ciphertext: Vec<u8>,
    flip_index: usize,
}

fn store() -> &'static SecretStore {
    static STORE: OnceLock<SecretStore> = OnceLock::new();
    STORE.get_or_init(|| {
        let facade = Arc::new(SoftwareKeyStore::in_memory());
        let store = SecretStore::new("fuzz", facade).with_policy(KeyGenPolicy {
            key_size: 1024,
            ..KeyGenPolicy::default()
        });
        store.init().expect("init");
        store
    })
}

fuzz_target!(|input: CodecFuzzInput| {
    let store = store();

    // Sealing either round-trips or reports the payload bound
    match store.seal(&input.plaintext) {
        Ok(mut sealed) => {
            let opened = store.open(&sealed).expect("fresh ciphertext must open");
            assert_eq!(opened.as_bytes(), &input.plaintext[..]);

            // A flipped bit must never break the key
            let index = input.flip_index % sealed.len();
            sealed[index] ^= 0x01;
            let _ = store.open(&sealed);
        }
        Err(SecretError::EncryptionFailed(CipherError::PayloadTooLarge { len, .. })) => {
            assert_eq!(len, input.plaintext.len());
        }
        Err(e) => panic!("unexpected seal error: {}", e),
    }

    // Arbitrary ciphertext is rejected without touching the key
    match store.open(&input.ciphertext) {
        Ok(_) | Err(SecretError::DecryptionFailed { .. }) => {}
        Err(e) => panic!("unexpected open error: {}", e),
    }
    assert_eq!(store.state(), keyseal::StoreState::Ready);
});
