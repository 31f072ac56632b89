/*!
 * Secret Store
 *
 * The caller-facing façade. A [`SecretStore`] binds one key alias to a key
 * store backend and a ciphertext repository, and moves through the states
 *
 * ```text
 * Uninitialized -> Initializing -> Ready
 *                              \-> Failed   (retry with init())
 * ```
 *
 * Any key store failure while sealing or opening a secret deletes the alias
 * and drops the store back to `Uninitialized`; the next `init()` generates a
 * fresh keypair. Secrets sealed under the old key cannot be recovered.
 */

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::CipherCodec;
use crate::error::{CipherError, InitError, KeyError, SecretError, SecretResult};
use crate::key_management::{
    validate_alias, KeyGenPolicy, KeyLifecycleManager, KeyReport, KeyStoreFacade, KeypairHandle,
};
use crate::secure_memory::SecureBytes;

pub mod repository;


pub use repository::{validate_key, CiphertextRepository, FileRepository, MemoryRepository};

/// Default number of key setup attempts made by [`SecretStore::init`]
pub const DEFAULT_INIT_ATTEMPTS: u32 = 2;

/// Lifecycle state of a [`SecretStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreState::Uninitialized => write!(f, "uninitialized"),
            StoreState::Initializing => write!(f, "initializing"),
            StoreState::Ready => write!(f, "ready"),
            StoreState::Failed => write!(f, "failed"),
        }
    }
}

struct StoreStatus {
    state: StoreState,
    last_report: Option<KeyReport>,
}

/// Encrypts secrets under the keypair of one alias
pub struct SecretStore {
    alias: String,
    lifecycle: KeyLifecycleManager,
    codec: CipherCodec,
    repository: Box<dyn CiphertextRepository>,
    status: Mutex<StoreStatus>,
    init_attempts: u32,
}

impl SecretStore {
    /// Create an uninitialized store for `alias` with an in-memory repository
    /// and the default key policy.
    pub fn new(alias: &str, facade: Arc<dyn KeyStoreFacade>) -> Self {
        Self {
            alias: alias.to_string(),
            lifecycle: KeyLifecycleManager::new(facade, KeyGenPolicy::default()),
            codec: CipherCodec::new(),
            repository: Box::new(MemoryRepository::new()),
            status: Mutex::new(StoreStatus {
                state: StoreState::Uninitialized,
                last_report: None,
            }),
            init_attempts: DEFAULT_INIT_ATTEMPTS,
        }
    }

    pub fn with_repository(mut self, repository: Box<dyn CiphertextRepository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_policy(mut self, policy: KeyGenPolicy) -> Self {
        self.lifecycle = KeyLifecycleManager::new(Arc::clone(self.lifecycle.facade()), policy);
        self
    }

    /// Number of key setup attempts made by `init` (at least one)
    pub fn with_init_attempts(mut self, attempts: u32) -> Self {
        self.init_attempts = attempts.max(1);
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn state(&self) -> StoreState {
        self.status().state
    }

    /// Report from the most recent successful `init`
    pub fn last_report(&self) -> Option<KeyReport> {
        self.status().last_report.clone()
    }

    pub fn lifecycle(&self) -> &KeyLifecycleManager {
        &self.lifecycle
    }

    /// Make sure the keypair for this store's alias exists and is usable.
    ///
    /// Safe to call repeatedly: on a ready store it only re-validates the key.
    /// Generation failures are retried up to the configured attempt count.
    pub fn init(&self) -> Result<(), InitError> {
        {
            let mut status = self.status();
            if status.state != StoreState::Ready {
                status.state = StoreState::Initializing;
            }
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.ensure_key() {
                Ok(report) => {
                    log::info!(
                        "Secret store for alias '{}' ready ({:?}, {} backend)",
                        self.alias,
                        report.status,
                        report.backend
                    );
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempts < self.init_attempts => {
                    log::warn!(
                        "Key setup for alias '{}' failed (attempt {}/{}): {}",
                        self.alias,
                        attempts,
                        self.init_attempts,
                        err
                    );
                }
                Err(err) => {
                    log::error!("Secret store for alias '{}' failed to initialize: {}", self.alias, err);
                    let mut status = self.status();
                    status.state = StoreState::Failed;
                    status.last_report = None;
                    return Err(InitError::KeySetupFailed {
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }

    /// Encrypt `data`, persist the ciphertext under `key` and return it.
    ///
    /// # Errors
    ///
    /// * [`SecretError::NotReady`] unless the store is ready
    /// * [`SecretError::InvalidKey`] if `key` is not a valid secret name
    /// * [`SecretError::KeyUnavailable`] if the key was unusable; the alias has
    ///   been deleted and the store must be re-initialized
    /// * [`SecretError::EncryptionFailed`] if encryption failed
    /// * [`SecretError::Persistence`] if the repository could not save
    pub fn put(&self, key: &str, data: &[u8]) -> SecretResult<Vec<u8>> {
        validate_key(key)?;
        let ciphertext = self.seal(data)?;
        self.repository.save(key, &ciphertext)?;
        log::debug!("Stored secret '{}' ({} bytes of ciphertext)", key, ciphertext.len());
        Ok(ciphertext)
    }

    /// Load and decrypt the secret stored under `key`.
    ///
    /// # Errors
    ///
    /// * [`SecretError::NotReady`] unless the store is ready
    /// * [`SecretError::NotFound`] if nothing is stored under `key`
    /// * [`SecretError::KeyUnavailable`] if the key was unusable; the alias has
    ///   been deleted and the store must be re-initialized
    /// * [`SecretError::DecryptionFailed`] if the stored ciphertext is malformed
    pub fn get(&self, key: &str) -> SecretResult<SecureBytes> {
        validate_key(key)?;
        self.require_ready()?;

        let ciphertext = self
            .repository
            .load(key)?
            .ok_or_else(|| SecretError::NotFound(key.to_string()))?;
        self.open(&ciphertext)
    }

    /// Delete the ciphertext stored under `key`. The keypair is untouched and
    /// removing a missing secret succeeds.
    pub fn remove(&self, key: &str) -> SecretResult<()> {
        validate_key(key)?;
        if self.repository.delete(key)? {
            log::debug!("Removed secret '{}'", key);
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> SecretResult<bool> {
        validate_key(key)?;
        Ok(self.repository.load(key)?.is_some())
    }

    /// Names of all persisted secrets
    pub fn keys(&self) -> SecretResult<Vec<String>> {
        self.repository.keys()
    }

    /// Encrypt `data` without persisting it
    pub fn seal(&self, data: &[u8]) -> SecretResult<Vec<u8>> {
        self.require_ready()?;

        self.lifecycle.locks().with_alias(&self.alias, || {
            let handle = self.usable_keypair()?;
            let public_key = handle
                .public_key()
                .ok_or_else(|| self.self_heal("public key is missing"))?;

            match self.codec.encrypt(public_key, data) {
                Ok(ciphertext) => Ok(ciphertext),
                Err(err @ CipherError::PayloadTooLarge { .. }) => Err(SecretError::EncryptionFailed(err)),
                Err(err) => {
                    self.self_heal(&err.to_string());
                    Err(SecretError::EncryptionFailed(err))
                }
            }
        })
    }

    /// Decrypt ciphertext produced by [`Self::seal`] or [`Self::put`]
    pub fn open(&self, ciphertext: &[u8]) -> SecretResult<SecureBytes> {
        self.require_ready()?;

        self.lifecycle.locks().with_alias(&self.alias, || {
            let handle = self.usable_keypair()?;

            match self
                .codec
                .decrypt(self.lifecycle.facade().as_ref(), &handle, ciphertext)
            {
                Ok(plaintext) => Ok(plaintext),
                Err(CipherError::InvalidCiphertext(cause)) => {
                    Err(SecretError::DecryptionFailed { cause })
                }
                Err(err) => Err(self.self_heal(&err.to_string())),
            }
        })
    }

    /// Run one key setup attempt and publish `Ready` before the alias lock is
    /// released, so a concurrent self-heal cannot be overwritten.
    fn ensure_key(&self) -> Result<KeyReport, KeyError> {
        validate_alias(&self.alias)?;
        self.lifecycle.locks().with_alias(&self.alias, || {
            let report = self.lifecycle.ensure_key_locked(&self.alias)?;
            let mut status = self.status();
            status.state = StoreState::Ready;
            status.last_report = Some(report.clone());
            Ok(report)
        })
    }

    /// Fetch the complete keypair for the alias, healing on any failure.
    /// Must be called with the alias lock held.
    fn usable_keypair(&self) -> SecretResult<KeypairHandle> {
        match self.lifecycle.facade().get_keypair(&self.alias) {
            Ok(Some(handle)) if handle.is_complete() => Ok(handle),
            Ok(Some(_)) => Err(self.self_heal("keypair is incomplete")),
            Ok(None) => Err(self.self_heal("keypair is missing")),
            Err(err) => Err(self.self_heal(&err.to_string())),
        }
    }

    /// Delete the alias and fall back to `Uninitialized`.
    /// Must be called with the alias lock held.
    fn self_heal(&self, cause: &str) -> SecretError {
        log::warn!(
            "Key for alias '{}' is unusable, deleting it: {}",
            self.alias,
            cause
        );
        self.lifecycle.discard_locked(&self.alias);

        let mut status = self.status();
        status.state = StoreState::Uninitialized;
        status.last_report = None;

        SecretError::key_unavailable(&self.alias, cause)
    }

    fn require_ready(&self) -> SecretResult<()> {
        match self.status().state {
            StoreState::Ready => Ok(()),
            state => Err(SecretError::NotReady {
                state: state.to_string(),
            }),
        }
    }

    fn status(&self) -> MutexGuard<'_, StoreStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretStore")
            .field("alias", &self.alias)
            .field("state", &self.state())
            .field("lifecycle", &self.lifecycle)
            .field("init_attempts", &self.init_attempts)
            .finish()
    }
}
