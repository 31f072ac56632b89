//! Shared helpers for the integration tests
//!
//! [`FaultyKeyStore`] wraps a software key store, counts generations and
//! deletions, and fails individual operations on request.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use keyseal::error::{KeyStoreError, KeyStoreResult};
use keyseal::key_management::{
    AliasLocks, EncryptionPadding, KeyGenPolicy, KeyGenSpec, KeyStoreBackend, KeyStoreCapabilities,
    KeyStoreFacade, KeypairHandle, SoftwareKeyStore,
};
use keyseal::secure_memory::SecureBytes;
use keyseal::store::SecretStore;

pub const ALIAS: &str = "app";

/// Small keys keep the suite fast
pub fn fast_policy() -> KeyGenPolicy {
    KeyGenPolicy {
        key_size: 1024,
        ..KeyGenPolicy::default()
    }
}

pub struct FaultyKeyStore {
    inner: SoftwareKeyStore,
    pub fail_fetch: AtomicBool,
    pub fetch_unavailable: AtomicBool,
    pub fail_generation: AtomicBool,
    pub fail_decrypt: AtomicBool,
    /// Report the stored keypair without its private half
    pub drop_private_key: AtomicBool,
    /// Milliseconds each generation takes
    pub generation_delay_ms: AtomicU64,
    pub generations: AtomicUsize,
    pub deletes: AtomicUsize,
    generating: AtomicUsize,
    max_concurrent_generations: AtomicUsize,
}

impl FaultyKeyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SoftwareKeyStore::in_memory(),
            fail_fetch: AtomicBool::new(false),
            fetch_unavailable: AtomicBool::new(false),
            fail_generation: AtomicBool::new(false),
            fail_decrypt: AtomicBool::new(false),
            drop_private_key: AtomicBool::new(false),
            generation_delay_ms: AtomicU64::new(0),
            generations: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            generating: AtomicUsize::new(0),
            max_concurrent_generations: AtomicUsize::new(0),
        })
    }

    pub fn inner(&self) -> &SoftwareKeyStore {
        &self.inner
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Most generations ever observed running at the same time
    pub fn max_concurrent_generations(&self) -> usize {
        self.max_concurrent_generations.load(Ordering::SeqCst)
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    /// Number of complete keypairs stored under `alias` (0 or 1)
    pub fn keypairs(&self, alias: &str) -> usize {
        match self.inner().get_keypair(alias) {
            Ok(Some(handle)) if handle.is_complete() => 1,
            _ => 0,
        }
    }
}

impl KeyStoreFacade for FaultyKeyStore {
    fn alias_locks(&self) -> &AliasLocks {
        self.inner().alias_locks()
    }

    fn backend(&self) -> KeyStoreBackend {
        self.inner().backend()
    }

    fn capabilities(&self) -> KeyStoreCapabilities {
        self.inner().capabilities()
    }

    fn load_or_create_keypair(&self, spec: &KeyGenSpec) -> KeyStoreResult<KeypairHandle> {
        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(KeyStoreError::operation_failed("generate_keypair", "injected failure"));
        }
        let running = self.generating.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_generations.fetch_max(running, Ordering::SeqCst);

        let delay = self.generation_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        let result = self.inner().get_keypair(&spec.alias).and_then(|existing| {
            if existing.is_none() {
                self.generations.fetch_add(1, Ordering::SeqCst);
            }
            self.inner().load_or_create_keypair(spec)
        });
        self.generating.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn get_keypair(&self, alias: &str) -> KeyStoreResult<Option<KeypairHandle>> {
        if self.fetch_unavailable.load(Ordering::SeqCst) {
            return Err(KeyStoreError::unavailable("get_keypair", "injected outage"));
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(KeyStoreError::corrupted(alias, "injected corruption"));
        }
        let handle = self.inner().get_keypair(alias)?;
        if self.drop_private_key.load(Ordering::SeqCst) {
            return Ok(handle.map(|h| {
                KeypairHandle::new(alias, h.public_key().cloned(), false, h.backend())
            }));
        }
        Ok(handle)
    }

    fn delete_alias(&self, alias: &str) -> KeyStoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner().delete_alias(alias)
    }

    fn is_hardware_isolated(&self, handle: &KeypairHandle) -> KeyStoreResult<bool> {
        self.inner().is_hardware_isolated(handle)
    }

    fn decrypt(
        &self,
        handle: &KeypairHandle,
        ciphertext: &[u8],
        padding: EncryptionPadding,
    ) -> KeyStoreResult<SecureBytes> {
        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(KeyStoreError::operation_failed("decrypt", "injected failure"));
        }
        self.inner().decrypt(handle, ciphertext, padding)
    }
}

/// An uninitialized store over a fresh [`FaultyKeyStore`]
pub fn faulty_store() -> (Arc<FaultyKeyStore>, SecretStore) {
    let facade = FaultyKeyStore::new();
    let store = SecretStore::new(ALIAS, facade.clone()).with_policy(fast_policy());
    (facade, store)
}
