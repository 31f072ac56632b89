/*!
 * Hardware Security Module (HSM) Key Store
 *
 * Implements [`KeyStoreFacade`] on top of a PKCS#11 token. RSA keypairs are
 * generated on the token as sensitive, non-extractable objects labelled with
 * the alias; only the public modulus and exponent ever leave the device, and
 * decryption runs on the token with `CKM_RSA_PKCS`.
 */

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as Pkcs11Error, RvError};
use cryptoki::mechanism::{Mechanism, MechanismType};
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::slot::Slot;
use cryptoki::types::AuthPin;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use crate::error::{KeyStoreError, KeyStoreResult};
use crate::key_management::facade::{
    KeyStoreBackend, KeyStoreCapabilities, KeyStoreFacade, KeypairHandle,
};
use crate::key_management::keygen::{EncryptionPadding, KeyAlgorithm, KeyGenSpec};
use crate::key_management::locks::AliasLocks;
use crate::secure_memory::SecureBytes;

/// RSA sizes probed against the token's mechanism limits
const CANDIDATE_KEY_SIZES: [usize; 4] = [1024, 2048, 3072, 4096];

/// Supported HSM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsmProvider {
    /// SoftHSM (software implementation, primarily for testing)
    SoftHsm,

    /// Thales Luna HSM
    ThalesLuna,

    /// AWS CloudHSM
    AwsCloudHsm,

    /// Utimaco HSM
    Utimaco,

    /// Generic PKCS#11 compliant HSM
    #[default]
    GenericPkcs11,
}

/// HSM configuration parameters
#[derive(Clone)]
pub struct HsmConfig {
    /// Path to the PKCS#11 library
    pub library_path: String,

    /// Slot ID to use
    pub slot_id: Option<u64>,

    /// Token label to use when no slot ID is given
    pub token_label: Option<String>,

    /// User PIN for authentication
    pub user_pin: Option<SecureBytes>,
}

impl fmt::Debug for HsmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmConfig")
            .field("library_path", &self.library_path)
            .field("slot_id", &self.slot_id)
            .field("token_label", &self.token_label)
            .field("user_pin", &"[REDACTED]")
            .finish()
    }
}

/// PKCS#11 implementation of [`KeyStoreFacade`]
pub struct Pkcs11KeyStore {
    provider: HsmProvider,
    slot: Slot,
    session: Mutex<Session>,
    capabilities: KeyStoreCapabilities,
    locks: AliasLocks,
    // Dropped after the session, which finalizes the library
    _context: Pkcs11,
}

impl Pkcs11KeyStore {
    /// Load the PKCS#11 library, pick a slot and open a logged-in session.
    ///
    /// The slot is chosen by `slot_id`, then by `token_label`, then the first
    /// slot holding a token.
    pub fn open(provider: HsmProvider, config: HsmConfig) -> KeyStoreResult<Self> {
        if !Path::new(&config.library_path).exists() {
            return Err(KeyStoreError::unavailable(
                "open",
                &format!("PKCS#11 library not found: {}", config.library_path),
            ));
        }

        log::info!("Initializing PKCS#11 library: {}", config.library_path);

        let context = Pkcs11::new(&config.library_path).map_err(|e| {
            KeyStoreError::unavailable("open", &format!("Failed to load PKCS#11 library: {}", e))
        })?;

        context.initialize(CInitializeArgs::OsThreads).map_err(|e| {
            KeyStoreError::unavailable(
                "open",
                &format!("Failed to initialize PKCS#11 library: {}", e),
            )
        })?;

        let slot = select_slot(&context, &config)?;
        log::info!("Using slot: {}", slot.id());

        let session = context.open_rw_session(slot).map_err(|e| {
            KeyStoreError::unavailable("open", &format!("Failed to open session: {}", e))
        })?;

        if let Some(pin) = &config.user_pin {
            if pin.is_empty() {
                return Err(KeyStoreError::InvalidSpec("PKCS#11 user PIN is empty".to_string()));
            }
            let auth_pin = AuthPin::new(String::from_utf8_lossy(pin.as_bytes()).to_string());
            match session.login(UserType::User, Some(&auth_pin)) {
                Ok(()) => log::info!("Logged in to HSM"),
                Err(Pkcs11Error::Pkcs11(RvError::UserAlreadyLoggedIn, _)) => {}
                Err(e) => {
                    return Err(KeyStoreError::unavailable(
                        "login",
                        &format!("Failed to login to HSM: {}", e),
                    ))
                }
            }
        }

        let capabilities = probe_capabilities(&context, slot);
        log::debug!(
            "HSM provider {:?} supports RSA sizes {:?}",
            provider,
            capabilities.supported_key_sizes
        );

        Ok(Self {
            provider,
            slot,
            session: Mutex::new(session),
            capabilities,
            locks: AliasLocks::new(),
            _context: context,
        })
    }

    pub fn provider(&self) -> HsmProvider {
        self.provider
    }

    pub fn slot_id(&self) -> u64 {
        self.slot.id()
    }

    fn session(&self) -> KeyStoreResult<MutexGuard<'_, Session>> {
        self.session
            .lock()
            .map_err(|_| KeyStoreError::unavailable("session", "HSM session lock poisoned"))
    }

    fn find(
        session: &Session,
        alias: &str,
        class: ObjectClass,
    ) -> KeyStoreResult<Option<ObjectHandle>> {
        let template = [Attribute::Class(class), Attribute::Label(alias.as_bytes().to_vec())];
        let mut objects = session
            .find_objects(&template)
            .map_err(|e| pkcs11_error("find_objects", e))?;

        match objects.len() {
            0 => Ok(None),
            1 => Ok(objects.pop()),
            n => Err(KeyStoreError::corrupted(
                alias,
                &format!("{} {} objects share this label", n, class),
            )),
        }
    }

    fn read_public_key(
        session: &Session,
        alias: &str,
        object: ObjectHandle,
    ) -> KeyStoreResult<RsaPublicKey> {
        let attributes = session
            .get_attributes(object, &[AttributeType::Modulus, AttributeType::PublicExponent])
            .map_err(|e| pkcs11_error("get_attributes", e))?;

        let mut modulus = None;
        let mut exponent = None;
        for attribute in attributes {
            match attribute {
                Attribute::Modulus(bytes) => modulus = Some(BigUint::from_bytes_be(&bytes)),
                Attribute::PublicExponent(bytes) => exponent = Some(BigUint::from_bytes_be(&bytes)),
                _ => {}
            }
        }

        match (modulus, exponent) {
            (Some(n), Some(e)) => RsaPublicKey::new(n, e)
                .map_err(|err| KeyStoreError::corrupted(alias, &format!("invalid public key: {}", err))),
            _ => Err(KeyStoreError::corrupted(alias, "public key attributes are missing")),
        }
    }

    fn handle_for(
        session: &Session,
        alias: &str,
        public: Option<ObjectHandle>,
        private: Option<ObjectHandle>,
    ) -> KeyStoreResult<KeypairHandle> {
        let public_key = public
            .map(|object| Self::read_public_key(session, alias, object))
            .transpose()?;
        Ok(KeypairHandle::new(
            alias,
            public_key,
            private.is_some(),
            KeyStoreBackend::Hardware,
        ))
    }

    fn generate(session: &Session, spec: &KeyGenSpec) -> KeyStoreResult<KeypairHandle> {
        let label = spec.alias.as_bytes().to_vec();
        let decrypt = spec.allows_decryption_with(EncryptionPadding::RsaPkcs1);

        let public_key_template = vec![
            Attribute::Token(true),
            Attribute::Private(false),
            Attribute::KeyType(KeyType::RSA),
            Attribute::Encrypt(true),
            Attribute::Verify(false),
            Attribute::Wrap(false),
            Attribute::PublicExponent(spec.public_exponent.to_be_bytes().to_vec()),
            Attribute::ModulusBits((spec.key_size as u64).into()),
            Attribute::Label(label.clone()),
            Attribute::Id(label.clone()),
        ];

        let private_key_template = vec![
            Attribute::Token(true),
            Attribute::Private(true),
            Attribute::Sensitive(true),
            Attribute::Extractable(false),
            Attribute::Decrypt(decrypt),
            Attribute::Sign(false),
            Attribute::Unwrap(false),
            Attribute::Label(label.clone()),
            Attribute::Id(label),
        ];

        let (public_handle, private_handle) = session
            .generate_key_pair(
                &Mechanism::RsaPkcsKeyPairGen,
                &public_key_template,
                &private_key_template,
            )
            .map_err(|e| pkcs11_error("generate_key_pair", e))?;

        log::info!(
            "Generated RSA-{} key pair on HSM for alias '{}'",
            spec.key_size,
            spec.alias
        );

        Self::handle_for(session, &spec.alias, Some(public_handle), Some(private_handle))
    }
}

impl KeyStoreFacade for Pkcs11KeyStore {
    fn alias_locks(&self) -> &AliasLocks {
        &self.locks
    }

    fn backend(&self) -> KeyStoreBackend {
        KeyStoreBackend::Hardware
    }

    fn capabilities(&self) -> KeyStoreCapabilities {
        self.capabilities.clone()
    }

    fn load_or_create_keypair(&self, spec: &KeyGenSpec) -> KeyStoreResult<KeypairHandle> {
        if spec.algorithm != KeyAlgorithm::Rsa {
            return Err(KeyStoreError::UnsupportedAlgorithm(format!("{:?}", spec.algorithm)));
        }
        if !self.capabilities.supports_key_size(spec.key_size) {
            return Err(KeyStoreError::UnsupportedAlgorithm(format!("RSA-{}", spec.key_size)));
        }

        let session = self.session()?;
        let public = Self::find(&session, &spec.alias, ObjectClass::PUBLIC_KEY)?;
        let private = Self::find(&session, &spec.alias, ObjectClass::PRIVATE_KEY)?;

        match (public, private) {
            (None, None) => Self::generate(&session, spec),
            (Some(_), Some(_)) => Self::handle_for(&session, &spec.alias, public, private),
            _ => Err(KeyStoreError::corrupted(&spec.alias, "keypair is incomplete")),
        }
    }

    fn get_keypair(&self, alias: &str) -> KeyStoreResult<Option<KeypairHandle>> {
        let session = self.session()?;
        let public = Self::find(&session, alias, ObjectClass::PUBLIC_KEY)?;
        let private = Self::find(&session, alias, ObjectClass::PRIVATE_KEY)?;

        if public.is_none() && private.is_none() {
            return Ok(None);
        }
        Self::handle_for(&session, alias, public, private).map(Some)
    }

    fn delete_alias(&self, alias: &str) -> KeyStoreResult<()> {
        let session = self.session()?;
        let objects = session
            .find_objects(&[Attribute::Label(alias.as_bytes().to_vec())])
            .map_err(|e| pkcs11_error("find_objects", e))?;

        for object in objects {
            session
                .destroy_object(object)
                .map_err(|e| pkcs11_error("destroy_object", e))?;
        }
        Ok(())
    }

    fn is_hardware_isolated(&self, handle: &KeypairHandle) -> KeyStoreResult<bool> {
        let session = self.session()?;
        let private = Self::find(&session, handle.alias(), ObjectClass::PRIVATE_KEY)?
            .ok_or_else(|| {
                KeyStoreError::operation_failed(
                    "is_hardware_isolated",
                    &format!("no private key stored under '{}'", handle.alias()),
                )
            })?;

        let attributes = session
            .get_attributes(
                private,
                &[
                    AttributeType::Sensitive,
                    AttributeType::Extractable,
                    AttributeType::NeverExtractable,
                ],
            )
            .map_err(|e| pkcs11_error("get_attributes", e))?;

        let mut sensitive = false;
        let mut extractable = true;
        let mut never_extractable = false;
        for attribute in attributes {
            match attribute {
                Attribute::Sensitive(value) => sensitive = value,
                Attribute::Extractable(value) => extractable = value,
                Attribute::NeverExtractable(value) => never_extractable = value,
                _ => {}
            }
        }

        Ok(sensitive && (!extractable || never_extractable))
    }

    fn decrypt(
        &self,
        handle: &KeypairHandle,
        ciphertext: &[u8],
        padding: EncryptionPadding,
    ) -> KeyStoreResult<SecureBytes> {
        let mechanism = match padding {
            EncryptionPadding::RsaPkcs1 => Mechanism::RsaPkcs,
        };

        let session = self.session()?;
        let private = Self::find(&session, handle.alias(), ObjectClass::PRIVATE_KEY)?
            .ok_or_else(|| {
                KeyStoreError::operation_failed(
                    "decrypt",
                    &format!("no private key stored under '{}'", handle.alias()),
                )
            })?;

        session
            .decrypt(&mechanism, private, ciphertext)
            .map(SecureBytes::from)
            .map_err(|e| pkcs11_error("decrypt", e))
    }
}

fn select_slot(context: &Pkcs11, config: &HsmConfig) -> KeyStoreResult<Slot> {
    let slots = context
        .get_slots_with_token()
        .map_err(|e| KeyStoreError::unavailable("open", &format!("Failed to get slots: {}", e)))?;

    if slots.is_empty() {
        return Err(KeyStoreError::unavailable("open", "No slots with tokens found"));
    }

    if let Some(slot_id) = config.slot_id {
        return slots
            .into_iter()
            .find(|slot| slot.id() == slot_id)
            .ok_or_else(|| KeyStoreError::unavailable("open", &format!("Slot {} not found", slot_id)));
    }

    if let Some(token_label) = &config.token_label {
        return slots
            .into_iter()
            .find(|slot| {
                context
                    .get_token_info(*slot)
                    .map(|info| info.label().trim() == token_label.trim())
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                KeyStoreError::unavailable(
                    "open",
                    &format!("Token with label '{}' not found", token_label),
                )
            });
    }

    Ok(slots[0])
}

fn probe_capabilities(context: &Pkcs11, slot: Slot) -> KeyStoreCapabilities {
    let supported_key_sizes = match context.get_mechanism_info(slot, MechanismType::RSA_PKCS_KEY_PAIR_GEN) {
        Ok(info) => CANDIDATE_KEY_SIZES
            .iter()
            .copied()
            .filter(|bits| *bits >= info.min_key_size() && *bits <= info.max_key_size())
            .collect(),
        Err(e) => {
            log::debug!("RSA mechanism info unavailable, assuming 2048-bit keys: {}", e);
            vec![2048]
        }
    };

    KeyStoreCapabilities {
        algorithm_parameters: true,
        self_signed_certificate: false,
        supported_key_sizes,
    }
}

/// Translate a PKCS#11 failure into the facade's error vocabulary
fn pkcs11_error(operation: &str, err: Pkcs11Error) -> KeyStoreError {
    match &err {
        Pkcs11Error::Pkcs11(rv, _) => match rv {
            RvError::EncryptedDataInvalid | RvError::EncryptedDataLenRange => {
                KeyStoreError::DecryptionRejected(err.to_string())
            }
            RvError::DeviceRemoved
            | RvError::DeviceError
            | RvError::TokenNotPresent
            | RvError::SessionClosed
            | RvError::SessionHandleInvalid
            | RvError::CryptokiNotInitialized
            | RvError::UserNotLoggedIn => KeyStoreError::unavailable(operation, &err.to_string()),
            RvError::KeySizeRange
            | RvError::MechanismInvalid
            | RvError::TemplateIncomplete
            | RvError::TemplateInconsistent => KeyStoreError::InvalidSpec(err.to_string()),
            _ => KeyStoreError::operation_failed(operation, &err.to_string()),
        },
        Pkcs11Error::LibraryLoading(_) => KeyStoreError::unavailable(operation, &err.to_string()),
        _ => KeyStoreError::operation_failed(operation, &err.to_string()),
    }
}
