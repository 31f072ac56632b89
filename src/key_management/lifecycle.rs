/*!
 * Key Lifecycle Management
 *
 * Guarantees exactly one usable RSA keypair per alias. The keypair is created
 * on first use, and an entry that turns out to be unreadable or half present
 * is deleted and regenerated rather than reported back to the caller.
 */

use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{KeyError, KeyResult};
use crate::key_management::facade::{KeyStoreBackend, KeyStoreFacade, KeypairHandle};
use crate::key_management::keygen::{KeyGenPolicy, KeyGenSpec, ValidityWindow};
use crate::key_management::locks::AliasLocks;

/// Longest alias accepted by [`validate_alias`]
pub const MAX_ALIAS_LEN: usize = 128;

/// Whether `ensure_key` found a key or had to make one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    AlreadyPresent,
    Generated,
}

/// Outcome of the hardware attestation query. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareIsolation {
    Isolated,
    NotIsolated,
    /// The key store could not answer
    Unknown,
}

impl HardwareIsolation {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HardwareIsolation::Isolated => Some(true),
            HardwareIsolation::NotIsolated => Some(false),
            HardwareIsolation::Unknown => None,
        }
    }
}

impl fmt::Display for HardwareIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardwareIsolation::Isolated => write!(f, "true"),
            HardwareIsolation::NotIsolated => write!(f, "false"),
            HardwareIsolation::Unknown => write!(f, "unknown"),
        }
    }
}

/// What `ensure_key` did and what it learned about the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyReport {
    pub alias: String,
    pub status: KeyStatus,
    pub isolation: HardwareIsolation,
    pub backend: KeyStoreBackend,
    pub validity: Option<ValidityWindow>,

    /// Hex SHA-256 of the PKCS#1 DER public key
    pub fingerprint: Option<String>,
}

impl KeyReport {
    pub fn is_generated(&self) -> bool {
        self.status == KeyStatus::Generated
    }
}

/// Check that `alias` can name a keypair slot.
///
/// Aliases must be non-empty, at most [`MAX_ALIAS_LEN`] characters, must not
/// start with `.`, and may not contain control characters or path separators.
pub fn validate_alias(alias: &str) -> KeyResult<()> {
    if alias.is_empty() {
        return Err(KeyError::InvalidAlias("alias cannot be empty".to_string()));
    }
    if alias.chars().count() > MAX_ALIAS_LEN {
        return Err(KeyError::InvalidAlias(format!(
            "alias exceeds {} characters",
            MAX_ALIAS_LEN
        )));
    }
    if alias.starts_with('.') {
        return Err(KeyError::InvalidAlias(format!("alias '{}' starts with '.'", alias)));
    }
    if alias.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(KeyError::InvalidAlias(alias.escape_debug().to_string()));
    }
    Ok(())
}

/// Owns the "one usable keypair per alias" guarantee on top of a [`KeyStoreFacade`]
///
/// Work on an alias runs under the facade's own [`AliasLocks`], so every
/// manager sharing a facade is serialized with every other.
pub struct KeyLifecycleManager {
    facade: Arc<dyn KeyStoreFacade>,
    policy: KeyGenPolicy,
}

impl KeyLifecycleManager {
    pub fn new(facade: Arc<dyn KeyStoreFacade>, policy: KeyGenPolicy) -> Self {
        Self { facade, policy }
    }

    pub fn facade(&self) -> &Arc<dyn KeyStoreFacade> {
        &self.facade
    }

    pub fn locks(&self) -> &AliasLocks {
        self.facade.alias_locks()
    }

    pub fn policy(&self) -> &KeyGenPolicy {
        &self.policy
    }

    /// Make sure a complete keypair exists for `alias`, creating it if needed.
    ///
    /// # Errors
    ///
    /// * [`KeyError::InvalidAlias`] when the alias is rejected by [`validate_alias`]
    /// * [`KeyError::ProviderUnavailable`] when the key store cannot be reached
    /// * [`KeyError::GenerationFailed`] when a new keypair could not be created;
    ///   any partial entry has been removed and the call may be retried
    pub fn ensure_key(&self, alias: &str) -> KeyResult<KeyReport> {
        validate_alias(alias)?;
        self.locks().with_alias(alias, || self.ensure_key_locked(alias))
    }

    /// Best-effort removal of every key object under `alias`.
    ///
    /// Returns whether the delete succeeded; failures are logged and dropped.
    pub fn discard(&self, alias: &str) -> bool {
        self.locks().with_alias(alias, || self.discard_locked(alias))
    }

    /// [`Self::discard`] for callers already holding the lock for `alias`
    pub(crate) fn discard_locked(&self, alias: &str) -> bool {
        match self.facade.delete_alias(alias) {
            Ok(()) => {
                log::warn!("Deleted key material for alias '{}'", alias);
                true
            }
            Err(err) => {
                log::warn!("Failed to delete key material for alias '{}': {}", alias, err);
                false
            }
        }
    }

    /// [`Self::ensure_key`] for callers already holding the lock for `alias`
    pub(crate) fn ensure_key_locked(&self, alias: &str) -> KeyResult<KeyReport> {
        let existing = match self.facade.get_keypair(alias) {
            Ok(existing) => existing,
            Err(err) if err.is_unavailable() => {
                return Err(KeyError::ProviderUnavailable {
                    cause: err.to_string(),
                });
            }
            Err(err) => {
                log::warn!("Key for alias '{}' is unreadable: {}", alias, err);
                self.discard_locked(alias);
                None
            }
        };

        let (handle, status) = match existing {
            Some(handle) if handle.is_complete() => {
                log::debug!("Key for alias '{}' already present", alias);
                (handle, KeyStatus::AlreadyPresent)
            }
            Some(_) => {
                log::warn!("Key for alias '{}' is incomplete", alias);
                self.discard_locked(alias);
                (self.generate(alias)?, KeyStatus::Generated)
            }
            None => (self.generate(alias)?, KeyStatus::Generated),
        };

        let isolation = self.attest(&handle);

        Ok(KeyReport {
            alias: alias.to_string(),
            status,
            isolation,
            backend: handle.backend(),
            validity: handle.validity().copied(),
            fingerprint: handle.fingerprint(),
        })
    }

    fn generate(&self, alias: &str) -> KeyResult<KeypairHandle> {
        let spec = KeyGenSpec::negotiate(alias, &self.facade.capabilities(), &self.policy, Utc::now())
            .map_err(|cause| self.generation_failed(alias, &cause))?;

        log::debug!(
            "Generating RSA-{} keypair for alias '{}' (parameters: {}, certificate: {})",
            spec.key_size,
            alias,
            spec.parameters.is_some(),
            spec.certificate.is_some()
        );

        match self.facade.load_or_create_keypair(&spec) {
            Ok(handle) if handle.is_complete() => {
                log::info!(
                    "Generated RSA-{} keypair for alias '{}' on {} key store",
                    spec.key_size,
                    alias,
                    self.facade.backend()
                );
                Ok(handle)
            }
            Ok(_) => Err(self.generation_failed(alias, "key store returned an incomplete keypair")),
            Err(err) => Err(self.generation_failed(alias, &err.to_string())),
        }
    }

    fn generation_failed(&self, alias: &str, cause: &str) -> KeyError {
        log::warn!("Key generation failed for alias '{}': {}", alias, cause);
        self.discard_locked(alias);
        KeyError::generation_failed(alias, cause)
    }

    fn attest(&self, handle: &KeypairHandle) -> HardwareIsolation {
        let isolation = match self.facade.is_hardware_isolated(handle) {
            Ok(true) => HardwareIsolation::Isolated,
            Ok(false) => HardwareIsolation::NotIsolated,
            Err(err) => {
                log::debug!("Hardware attestation for '{}' failed: {}", handle.alias(), err);
                HardwareIsolation::Unknown
            }
        };
        log::info!("Hardware-backed key store supported: {}", isolation);
        isolation
    }
}

impl fmt::Debug for KeyLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("backend", &self.facade.backend())
            .field("policy", &self.policy)
            .finish()
    }
}
