//! End-to-end scenarios for the secret store
//!
//! These tests drive `SecretStore` the way an application would: one alias,
//! `init` at start-up, then `put`/`get`/`remove` calls.

mod common;

use std::sync::Arc;

use common::{faulty_store, FaultyKeyStore, ALIAS};
use keyseal::error::{CipherError, SecretError};
use keyseal::key_management::{
    HardwareIsolation, KeyGenPolicy, KeyStatus, KeyStoreFacade, SoftwareKeyStore,
};
use keyseal::store::{SecretStore, StoreState};

/// The canonical scenario: first init generates, put/get round-trips
#[test]
fn test_first_run_scenario() {
    let (facade, store) = faulty_store();
    assert_eq!(store.state(), StoreState::Uninitialized);

    store.init().expect("init should succeed");
    assert_eq!(store.state(), StoreState::Ready);
    assert_eq!(facade.generations(), 1);

    let report = store.last_report().expect("report after init");
    assert_eq!(report.alias, ALIAS);
    assert_eq!(report.status, KeyStatus::Generated);
    assert_eq!(report.isolation, HardwareIsolation::NotIsolated);

    let ciphertext = store.put("pwd", b"secret1").expect("put should succeed");
    assert!(!ciphertext.is_empty());
    assert_ne!(&ciphertext[..], b"secret1");

    let plaintext = store.get("pwd").expect("get should succeed");
    assert_eq!(plaintext.as_bytes(), b"secret1");
}

/// N calls on a ready store generate nothing
#[test]
fn test_idempotent_init() {
    let (facade, store) = faulty_store();
    store.init().unwrap();

    for _ in 0..5 {
        store.init().unwrap();
        assert_eq!(store.state(), StoreState::Ready);
        assert_eq!(store.last_report().unwrap().status, KeyStatus::AlreadyPresent);
    }

    assert_eq!(facade.generations(), 1);
    assert_eq!(facade.deletes(), 0);
}

/// At most one keypair per alias across any mix of operations
#[test]
fn test_single_key_invariant() {
    let (facade, store) = faulty_store();

    store.init().unwrap();
    store.put("a", b"1").unwrap();
    store.init().unwrap();
    store.get("a").unwrap();
    store.put("b", b"2").unwrap();
    store.init().unwrap();

    assert_eq!(facade.keypairs(ALIAS), 1);
    assert_eq!(facade.generations(), 1);
}

/// 245 bytes fit a 2048-bit block, 246 do not
#[test]
fn test_payload_bound_with_default_key_size() {
    let facade = Arc::new(SoftwareKeyStore::in_memory());
    let store = SecretStore::new(ALIAS, facade).with_policy(KeyGenPolicy::default());
    store.init().unwrap();

    let max = vec![b'x'; 245];
    store.put("max", &max).unwrap();
    assert_eq!(store.get("max").unwrap().as_bytes(), &max[..]);

    let over = vec![b'x'; 246];
    match store.put("over", &over) {
        Err(SecretError::EncryptionFailed(CipherError::PayloadTooLarge { len, max })) => {
            assert_eq!(len, 246);
            assert_eq!(max, 245);
        }
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    }

    // Nothing was persisted and the key is untouched
    assert!(!store.contains("over").unwrap());
    assert_eq!(store.state(), StoreState::Ready);
}

/// Overwriting a secret replaces its ciphertext
#[test]
fn test_overwrite_secret() {
    let (_, store) = faulty_store();
    store.init().unwrap();

    store.put("pwd", b"first").unwrap();
    store.put("pwd", b"second").unwrap();

    assert_eq!(store.get("pwd").unwrap().as_bytes(), b"second");
    assert_eq!(store.keys().unwrap(), vec!["pwd"]);
}

/// Removing a secret never touches the keypair
#[test]
fn test_remove_keeps_key() {
    let (facade, store) = faulty_store();
    store.init().unwrap();
    store.put("pwd", b"secret1").unwrap();

    store.remove("pwd").unwrap();
    store.remove("pwd").unwrap();

    assert!(matches!(store.get("pwd"), Err(SecretError::NotFound(_))));
    assert_eq!(facade.keypairs(ALIAS), 1);
    assert_eq!(facade.deletes(), 0);
}

/// Two stores with different aliases on one facade keep separate keys
#[test]
fn test_aliases_are_isolated() {
    let facade = FaultyKeyStore::new();
    let first = SecretStore::new("first", facade.clone()).with_policy(common::fast_policy());
    let second = SecretStore::new("second", facade.clone()).with_policy(common::fast_policy());
    first.init().unwrap();
    second.init().unwrap();

    let sealed = first.seal(b"only for first").unwrap();
    assert_eq!(first.open(&sealed).unwrap().as_bytes(), b"only for first");

    let cross = second.open(&sealed);
    assert!(cross.map_or(true, |p| p.as_bytes() != b"only for first"));

    assert_ne!(
        first.last_report().unwrap().fingerprint,
        second.last_report().unwrap().fingerprint
    );
    assert_eq!(facade.generations(), 2);
}

/// Concurrent callers share one key and all round-trip
#[test]
fn test_concurrent_put_get() {
    let (facade, store) = faulty_store();
    store.init().unwrap();
    let store = Arc::new(store);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let key = format!("secret-{}", i);
                let value = format!("value-{}", i);
                store.put(&key, value.as_bytes()).unwrap();
                assert_eq!(store.get(&key).unwrap().as_bytes(), value.as_bytes());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.keys().unwrap().len(), 8);
    assert_eq!(facade.generations(), 1);
}

/// Two stores built independently over one facade still generate one key
#[test]
fn test_stores_sharing_a_facade_serialize_on_the_alias() {
    let facade = FaultyKeyStore::new();
    facade
        .generation_delay_ms
        .store(100, std::sync::atomic::Ordering::SeqCst);
    let barrier = Arc::new(std::sync::Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let facade = Arc::clone(&facade);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let store = SecretStore::new(ALIAS, facade).with_policy(common::fast_policy());
                barrier.wait();
                store.init().unwrap();
                store.last_report().unwrap()
            })
        })
        .collect();

    let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(facade.max_concurrent_generations(), 1);
    assert_eq!(facade.generations(), 1);
    assert_eq!(reports.iter().filter(|r| r.is_generated()).count(), 1);

    let stored = facade.inner().get_keypair(ALIAS).unwrap().unwrap().fingerprint();
    assert!(reports.iter().all(|r| r.fingerprint == stored));
}
