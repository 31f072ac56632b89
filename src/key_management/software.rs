/*!
 * Software-Backed Key Store
 *
 * Generates and holds RSA keypairs in process memory, optionally persisting
 * each alias as `<alias>.json` in a private directory. This is the fallback
 * for platforms without secure hardware and the backend used by tests; it
 * always reports keys as not hardware isolated.
 */

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{KeyStoreError, KeyStoreResult};
use crate::key_management::facade::{
    KeyStoreBackend, KeyStoreCapabilities, KeyStoreFacade, KeypairHandle,
};
use crate::key_management::keygen::{
    AlgorithmParameters, CertificateSpec, EncryptionPadding, KeyAlgorithm, KeyGenSpec,
    ValidityWindow,
};
use crate::key_management::locks::AliasLocks;
use crate::secure_memory::SecureBytes;

/// Version of the on-disk key record format
const RECORD_VERSION: u8 = 1;

/// Extension of key record files
const RECORD_EXTENSION: &str = "json";

/// RSA sizes the software backend will generate
pub const SOFTWARE_KEY_SIZES: [usize; 4] = [1024, 2048, 3072, 4096];

/// On-disk representation of one alias
#[derive(Serialize, Deserialize)]
struct KeyRecord {
    version: u8,
    alias: String,
    algorithm: KeyAlgorithm,
    key_size: usize,
    created_at: DateTime<Utc>,
    validity: ValidityWindow,
    parameters: Option<AlgorithmParameters>,
    certificate: Option<CertificateSpec>,
    /// PKCS#8 DER, hex-encoded
    private_key: Option<String>,
    /// PKCS#1 DER, hex-encoded
    public_key: Option<String>,
}

impl Drop for KeyRecord {
    fn drop(&mut self) {
        if let Some(private_key) = self.private_key.as_mut() {
            private_key.zeroize();
        }
    }
}

/// A keypair held in memory. Either half may be missing when a record was
/// damaged on disk.
struct SoftwareEntry {
    private_key: Option<RsaPrivateKey>,
    public_key: Option<RsaPublicKey>,
    key_size: usize,
    created_at: DateTime<Utc>,
    validity: ValidityWindow,
    parameters: Option<AlgorithmParameters>,
    certificate: Option<CertificateSpec>,
}

impl SoftwareEntry {
    fn handle(&self, alias: &str) -> KeypairHandle {
        KeypairHandle::new(
            alias,
            self.public_key.clone(),
            self.private_key.is_some(),
            KeyStoreBackend::Software,
        )
        .with_validity(Some(self.validity))
    }

    fn is_complete(&self) -> bool {
        self.private_key.is_some() && self.public_key.is_some()
    }

    fn to_record(&self, alias: &str) -> KeyStoreResult<KeyRecord> {
        let private_key = match &self.private_key {
            Some(key) => {
                let der = key.to_pkcs8_der().map_err(|e| {
                    KeyStoreError::Serialization(format!("PKCS#8 encoding failed: {}", e))
                })?;
                Some(hex::encode(der.as_bytes()))
            }
            None => None,
        };

        let public_key = match &self.public_key {
            Some(key) => {
                let der = key.to_pkcs1_der().map_err(|e| {
                    KeyStoreError::Serialization(format!("PKCS#1 encoding failed: {}", e))
                })?;
                Some(hex::encode(der.as_bytes()))
            }
            None => None,
        };

        Ok(KeyRecord {
            version: RECORD_VERSION,
            alias: alias.to_string(),
            algorithm: KeyAlgorithm::Rsa,
            key_size: self.key_size,
            created_at: self.created_at,
            validity: self.validity,
            parameters: self.parameters.clone(),
            certificate: self.certificate.clone(),
            private_key,
            public_key,
        })
    }

    fn from_record(record: &KeyRecord) -> Result<Self, String> {
        if record.version != RECORD_VERSION {
            return Err(format!("unsupported record version {}", record.version));
        }

        let private_key = match &record.private_key {
            Some(encoded) => {
                let der = Zeroizing::new(
                    hex::decode(encoded).map_err(|e| format!("private key is not hex: {}", e))?,
                );
                Some(
                    RsaPrivateKey::from_pkcs8_der(&der)
                        .map_err(|e| format!("private key is not PKCS#8: {}", e))?,
                )
            }
            None => None,
        };

        let public_key = match &record.public_key {
            Some(encoded) => {
                let der = hex::decode(encoded).map_err(|e| format!("public key is not hex: {}", e))?;
                Some(
                    RsaPublicKey::from_pkcs1_der(&der)
                        .map_err(|e| format!("public key is not PKCS#1: {}", e))?,
                )
            }
            None => None,
        };

        if let (Some(private_key), Some(public_key)) = (&private_key, &public_key) {
            if &RsaPublicKey::from(private_key) != public_key {
                return Err("public key does not match private key".to_string());
            }
        }

        Ok(Self {
            private_key,
            public_key,
            key_size: record.key_size,
            created_at: record.created_at,
            validity: record.validity,
            parameters: record.parameters.clone(),
            certificate: record.certificate.clone(),
        })
    }
}

/// Readable entries, or the reason an alias could not be loaded
type Entries = HashMap<String, Result<SoftwareEntry, String>>;

/// Software implementation of [`KeyStoreFacade`]
pub struct SoftwareKeyStore {
    entries: Mutex<Entries>,
    directory: Option<PathBuf>,
    capabilities: KeyStoreCapabilities,
    locks: AliasLocks,
}

impl SoftwareKeyStore {
    /// A key store that forgets its keys when dropped
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            directory: None,
            capabilities: Self::default_capabilities(),
            locks: AliasLocks::new(),
        }
    }

    /// Open (or create) a key store persisted under `directory`.
    ///
    /// Records that cannot be parsed are kept as corrupted entries so the
    /// lifecycle manager can detect and replace them.
    pub fn open<P: AsRef<Path>>(directory: P) -> KeyStoreResult<Self> {
        let directory = directory.as_ref().to_path_buf();
        ensure_private_dir(&directory)?;

        let mut entries = HashMap::new();
        for dir_entry in fs::read_dir(&directory)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(alias) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let loaded = fs::read_to_string(&path)
                .map_err(|e| format!("unreadable record: {}", e))
                .and_then(|contents| {
                    let contents = Zeroizing::new(contents);
                    serde_json::from_str::<KeyRecord>(&contents)
                        .map_err(|e| format!("malformed record: {}", e))
                })
                .and_then(|record| {
                    if record.alias != alias {
                        return Err(format!("record belongs to alias '{}'", record.alias));
                    }
                    SoftwareEntry::from_record(&record)
                });

            if let Err(reason) = &loaded {
                log::warn!("Key record {} is unusable: {}", path.display(), reason);
            }
            entries.insert(alias, loaded);
        }

        log::debug!(
            "Opened software key store at {} ({} aliases)",
            directory.display(),
            entries.len()
        );

        Ok(Self {
            entries: Mutex::new(entries),
            directory: Some(directory),
            capabilities: Self::default_capabilities(),
            locks: AliasLocks::new(),
        })
    }

    /// Replace the advertised capabilities, e.g. to emulate an older platform
    pub fn with_capabilities(mut self, capabilities: KeyStoreCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn default_capabilities() -> KeyStoreCapabilities {
        KeyStoreCapabilities {
            algorithm_parameters: true,
            self_signed_certificate: true,
            supported_key_sizes: SOFTWARE_KEY_SIZES.to_vec(),
        }
    }

    fn entries(&self) -> KeyStoreResult<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| KeyStoreError::unavailable("lock", "software key store lock poisoned"))
    }

    fn record_path(&self, alias: &str) -> Option<PathBuf> {
        self.directory
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", alias, RECORD_EXTENSION)))
    }

    fn persist(&self, alias: &str, entry: &SoftwareEntry) -> KeyStoreResult<()> {
        let Some(path) = self.record_path(alias) else {
            return Ok(());
        };

        let record = entry.to_record(alias)?;
        let json = Zeroizing::new(serde_json::to_string_pretty(&record)?);
        write_private_file(&path, json.as_bytes())?;
        log::debug!("Persisted key record for alias '{}' to {}", alias, path.display());
        Ok(())
    }

    fn validate_spec(&self, spec: &KeyGenSpec) -> KeyStoreResult<()> {
        if spec.algorithm != KeyAlgorithm::Rsa {
            return Err(KeyStoreError::UnsupportedAlgorithm(format!("{:?}", spec.algorithm)));
        }
        if !self.capabilities.supports_key_size(spec.key_size) {
            return Err(KeyStoreError::UnsupportedAlgorithm(format!("RSA-{}", spec.key_size)));
        }
        if spec.public_exponent != crate::key_management::keygen::RSA_PUBLIC_EXPONENT {
            return Err(KeyStoreError::InvalidSpec(format!(
                "public exponent {} is not supported",
                spec.public_exponent
            )));
        }
        if spec.alias.is_empty()
            || spec.alias.starts_with('.')
            || spec.alias.contains(['/', '\\'])
            || spec.alias.chars().any(char::is_control)
        {
            return Err(KeyStoreError::InvalidSpec(format!(
                "alias '{}' cannot name a key record",
                spec.alias
            )));
        }
        Ok(())
    }
}

impl KeyStoreFacade for SoftwareKeyStore {
    fn alias_locks(&self) -> &AliasLocks {
        &self.locks
    }

    fn backend(&self) -> KeyStoreBackend {
        KeyStoreBackend::Software
    }

    fn capabilities(&self) -> KeyStoreCapabilities {
        self.capabilities.clone()
    }

    fn load_or_create_keypair(&self, spec: &KeyGenSpec) -> KeyStoreResult<KeypairHandle> {
        self.validate_spec(spec)?;

        match self.entries()?.get(&spec.alias) {
            Some(Ok(entry)) if entry.is_complete() => return Ok(entry.handle(&spec.alias)),
            Some(Ok(_)) => {
                return Err(KeyStoreError::corrupted(&spec.alias, "keypair is incomplete"))
            }
            Some(Err(reason)) => return Err(KeyStoreError::corrupted(&spec.alias, reason)),
            None => {}
        }

        // Generation takes a while; keep other aliases usable meanwhile.
        log::debug!("Generating RSA-{} keypair for alias '{}'", spec.key_size, spec.alias);
        let private_key = RsaPrivateKey::new(&mut OsRng, spec.key_size).map_err(|e| {
            KeyStoreError::operation_failed("generate_keypair", &format!("RSA generation failed: {}", e))
        })?;
        let public_key = RsaPublicKey::from(&private_key);

        let entry = SoftwareEntry {
            private_key: Some(private_key),
            public_key: Some(public_key),
            key_size: spec.key_size,
            created_at: Utc::now(),
            validity: spec.validity,
            parameters: spec.parameters.clone(),
            certificate: spec.certificate.clone(),
        };

        self.persist(&spec.alias, &entry)?;

        let handle = entry.handle(&spec.alias);
        self.entries()?.insert(spec.alias.clone(), Ok(entry));
        Ok(handle)
    }

    fn get_keypair(&self, alias: &str) -> KeyStoreResult<Option<KeypairHandle>> {
        match self.entries()?.get(alias) {
            Some(Ok(entry)) => Ok(Some(entry.handle(alias))),
            Some(Err(reason)) => Err(KeyStoreError::corrupted(alias, reason)),
            None => Ok(None),
        }
    }

    fn delete_alias(&self, alias: &str) -> KeyStoreResult<()> {
        self.entries()?.remove(alias);

        if let Some(path) = self.record_path(alias) {
            match fs::remove_file(&path) {
                Ok(()) => log::debug!("Removed key record {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn is_hardware_isolated(&self, handle: &KeypairHandle) -> KeyStoreResult<bool> {
        match self.entries()?.get(handle.alias()) {
            Some(Ok(_)) => Ok(false),
            Some(Err(reason)) => Err(KeyStoreError::corrupted(handle.alias(), reason)),
            None => Err(KeyStoreError::operation_failed(
                "is_hardware_isolated",
                &format!("no key stored under '{}'", handle.alias()),
            )),
        }
    }

    fn decrypt(
        &self,
        handle: &KeypairHandle,
        ciphertext: &[u8],
        padding: EncryptionPadding,
    ) -> KeyStoreResult<SecureBytes> {
        let entries = self.entries()?;
        let entry = match entries.get(handle.alias()) {
            Some(Ok(entry)) => entry,
            Some(Err(reason)) => return Err(KeyStoreError::corrupted(handle.alias(), reason)),
            None => {
                return Err(KeyStoreError::operation_failed(
                    "decrypt",
                    &format!("no key stored under '{}'", handle.alias()),
                ))
            }
        };

        let private_key = entry
            .private_key
            .as_ref()
            .ok_or_else(|| KeyStoreError::corrupted(handle.alias(), "private key is missing"))?;

        if let Some(params) = &entry.parameters {
            if !params.allows_decryption_with(padding) {
                return Err(KeyStoreError::operation_failed(
                    "decrypt",
                    &format!("key is not authorized to decrypt with {}", padding),
                ));
            }
        }

        let plaintext = match padding {
            EncryptionPadding::RsaPkcs1 => private_key
                .decrypt(Pkcs1v15Encrypt, ciphertext)
                .map_err(|e| KeyStoreError::DecryptionRejected(e.to_string()))?,
        };

        Ok(SecureBytes::from(plaintext))
    }
}

/// Create `directory` if needed and restrict it to the owner.
pub(crate) fn ensure_private_dir(directory: &Path) -> std::io::Result<()> {
    fs::create_dir_all(directory)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(directory, fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

/// Write `data` to `path` readable by the owner only.
///
/// Each call writes its own uniquely named temporary file, created with mode
/// 0600, and renames it over `path`, so concurrent writers never share a file.
pub(crate) fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{:016x}.tmp", file_name, rand::random::<u64>()));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let written = options
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp, path));

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}
