/*!
 * Keyseal Credential Store
 *
 * Encrypts small secrets (passwords, tokens) under an RSA keypair that lives
 * in a secure key store, so plaintext is never persisted and the private key
 * never enters application memory when the store is hardware backed.
 *
 * The pieces, leaves first:
 *
 * - [`key_management::KeyStoreFacade`]: the key store capability, with a
 *   software backend and a PKCS#11 backend
 * - [`key_management::KeyLifecycleManager`]: exactly one usable keypair per
 *   alias, generated on first use and regenerated when it breaks
 * - [`codec::CipherCodec`]: RSA/ECB/PKCS#1 v1.5, one block per secret
 * - [`store::SecretStore`]: `init` / `put` / `get` / `remove`
 *
 * # Example
 *
 * ```no_run
 * use std::sync::Arc;
 * use keyseal::prelude::*;
 *
 * fn main() -> Result<(), Box<dyn std::error::Error>> {
 *     let facade = Arc::new(SoftwareKeyStore::in_memory());
 *     let store = SecretStore::new("app", facade);
 *     store.init()?;
 *
 *     let ciphertext = store.put("pwd", b"secret1")?;
 *     assert_ne!(&ciphertext[..], b"secret1");
 *
 *     let plaintext = store.get("pwd")?;
 *     assert_eq!(plaintext.as_bytes(), b"secret1");
 *     Ok(())
 * }
 * ```
 */

/// RSA cipher codec
pub mod codec;

/// Store configuration
pub mod config;

/// Common error types
pub mod error;

/// Key stores, key generation specs and the key lifecycle
pub mod key_management;

/// Secure memory handling utilities
pub mod secure_memory;

/// The caller-facing secret store
pub mod store;

// Re-export main types for convenience
pub use codec::CipherCodec;
pub use config::{BackendConfig, StoreConfig};
pub use error::{
    CipherError, ConfigError, InitError, KeyError, KeyStoreError, SecretError, SecretResult,
};
pub use key_management::{KeyLifecycleManager, KeyReport, KeyStoreFacade};
pub use secure_memory::SecureBytes;
pub use store::{SecretStore, StoreState};

/// The types most callers need
pub mod prelude {
    pub use crate::codec::CipherCodec;
    pub use crate::config::BackendConfig;
    pub use crate::config::StoreConfig;
    pub use crate::error::CipherError;
    pub use crate::error::ConfigError;
    pub use crate::error::InitError;
    pub use crate::error::KeyError;
    pub use crate::error::SecretError;
    pub use crate::key_management::HardwareIsolation;
    pub use crate::key_management::KeyGenPolicy;
    pub use crate::key_management::KeyLifecycleManager;
    pub use crate::key_management::KeyReport;
    pub use crate::key_management::KeyStatus;
    pub use crate::key_management::KeyStoreFacade;
    pub use crate::key_management::Pkcs11KeyStore;
    pub use crate::key_management::SerialNumberPolicy;
    pub use crate::key_management::SoftwareKeyStore;
    pub use crate::secure_memory::SecureBytes;
    pub use crate::store::CiphertextRepository;
    pub use crate::store::FileRepository;
    pub use crate::store::MemoryRepository;
    pub use crate::store::SecretStore;
    pub use crate::store::StoreState;
}
