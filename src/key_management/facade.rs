/*!
 * Key Store Facade
 *
 * The secure key store is a platform capability that the credential store
 * consumes rather than implements. Backends (software or hardware) implement
 * [`KeyStoreFacade`]; the rest of the crate only ever talks to this trait.
 */

use std::fmt;

use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};

use crate::error::KeyStoreResult;
use crate::key_management::keygen::{EncryptionPadding, KeyGenSpec, ValidityWindow};
use crate::key_management::locks::AliasLocks;
use crate::secure_memory::SecureBytes;

/// Where the private key material of a backend lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStoreBackend {
    /// Key material is held by this process (software key store)
    Software,

    /// Key material is held by a token or secure element
    Hardware,
}

impl fmt::Display for KeyStoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStoreBackend::Software => write!(f, "software"),
            KeyStoreBackend::Hardware => write!(f, "hardware"),
        }
    }
}

/// Features a backend understands when generating keys
///
/// The lifecycle manager uses this to build the richest
/// [`KeyGenSpec`] the platform supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStoreCapabilities {
    /// Purposes, digests and paddings can be bound to the key
    pub algorithm_parameters: bool,

    /// A self-signed certificate (subject, serial, validity) is kept with the key
    pub self_signed_certificate: bool,

    /// RSA modulus sizes the backend can generate
    pub supported_key_sizes: Vec<usize>,
}

impl KeyStoreCapabilities {
    pub fn supports_key_size(&self, bits: usize) -> bool {
        self.supported_key_sizes.contains(&bits)
    }
}

/// Opaque reference to one keypair held by a key store
///
/// The public key is exportable and carried in the handle. The private key
/// never is: the handle only records whether it exists, and private key
/// operations go through [`KeyStoreFacade::decrypt`].
#[derive(Clone)]
pub struct KeypairHandle {
    alias: String,
    public_key: Option<RsaPublicKey>,
    has_private_key: bool,
    backend: KeyStoreBackend,
    validity: Option<ValidityWindow>,
}

impl KeypairHandle {
    pub fn new(
        alias: &str,
        public_key: Option<RsaPublicKey>,
        has_private_key: bool,
        backend: KeyStoreBackend,
    ) -> Self {
        Self {
            alias: alias.to_string(),
            public_key,
            has_private_key,
            backend,
            validity: None,
        }
    }

    pub fn with_validity(mut self, validity: Option<ValidityWindow>) -> Self {
        self.validity = validity;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.public_key.as_ref()
    }

    pub fn has_private_key(&self) -> bool {
        self.has_private_key
    }

    pub fn backend(&self) -> KeyStoreBackend {
        self.backend
    }

    pub fn validity(&self) -> Option<&ValidityWindow> {
        self.validity.as_ref()
    }

    /// Both halves are present, so the key can encrypt and decrypt
    pub fn is_complete(&self) -> bool {
        self.has_private_key && self.public_key.is_some()
    }

    /// Modulus size in bytes, when the public key is known
    pub fn modulus_len(&self) -> Option<usize> {
        self.public_key.as_ref().map(|key| key.size())
    }

    /// Hex SHA-256 of the PKCS#1 DER public key
    pub fn fingerprint(&self) -> Option<String> {
        let der = self.public_key.as_ref()?.to_pkcs1_der().ok()?;
        Some(hex::encode(Sha256::digest(der.as_bytes())))
    }
}

impl fmt::Debug for KeypairHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeypairHandle")
            .field("alias", &self.alias)
            .field("public_key", &self.public_key.as_ref().map(|_| "[RSA public key]"))
            .field("has_private_key", &self.has_private_key)
            .field("backend", &self.backend)
            .field("validity", &self.validity)
            .finish()
    }
}

/// Capability interface of a secure key store
///
/// Implementations must be safe to share across threads. Each store owns the
/// [`AliasLocks`] its callers hold while touching an alias, so every component
/// sharing one store serializes on the same locks.
pub trait KeyStoreFacade: Send + Sync {
    /// Per-alias locks guarding this store
    fn alias_locks(&self) -> &AliasLocks;

    /// Whether keys of this store live in software or hardware
    fn backend(&self) -> KeyStoreBackend;

    /// Key generation features this store supports
    fn capabilities(&self) -> KeyStoreCapabilities;

    /// Return the keypair stored under `spec.alias`, generating and persisting
    /// it from `spec` when the alias is empty.
    fn load_or_create_keypair(&self, spec: &KeyGenSpec) -> KeyStoreResult<KeypairHandle>;

    /// Fetch the keypair stored under `alias`, if any.
    ///
    /// A partially present entry is returned as an incomplete handle; an
    /// entry that cannot be read at all is reported as an error.
    fn get_keypair(&self, alias: &str) -> KeyStoreResult<Option<KeypairHandle>>;

    /// Remove every key object stored under `alias`. Deleting a missing alias succeeds.
    fn delete_alias(&self, alias: &str) -> KeyStoreResult<()>;

    /// Whether the private key of `handle` is confined to secure hardware
    fn is_hardware_isolated(&self, handle: &KeypairHandle) -> KeyStoreResult<bool>;

    /// Run the private key operation for `handle` inside the key store.
    fn decrypt(
        &self,
        handle: &KeypairHandle,
        ciphertext: &[u8],
        padding: EncryptionPadding,
    ) -> KeyStoreResult<SecureBytes>;
}
