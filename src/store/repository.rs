//! Ciphertext persistence.
//!
//! The store never persists plaintext. What it hands to a
//! [`CiphertextRepository`] is the raw RSA block returned by the codec.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{SecretError, SecretResult};
use crate::key_management::software::{ensure_private_dir, write_private_file};

/// Maximum secret name length
pub const MAX_KEY_LEN: usize = 128;

/// Extension of ciphertext files written by [`FileRepository`]
const CIPHERTEXT_EXTENSION: &str = "bin";

/// Validate a secret name: 1-128 characters of ASCII alphanumerics, `_`,
/// `-` and `.`, not starting with `.`.
pub fn validate_key(key: &str) -> SecretResult<()> {
    if key.is_empty() {
        return Err(SecretError::InvalidKey("name must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(SecretError::InvalidKey(format!(
            "name exceeds maximum length of {} characters",
            MAX_KEY_LEN
        )));
    }
    if key.starts_with('.') {
        return Err(SecretError::InvalidKey(format!("name must not start with '.': {}", key)));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(SecretError::InvalidKey(format!(
            "name contains invalid characters (allowed: alphanumeric, underscore, hyphen, dot): {}",
            key
        )));
    }
    Ok(())
}

/// Where ciphertext produced by the store is kept
pub trait CiphertextRepository: Send + Sync {
    /// Store `ciphertext` under `key`, replacing any previous value
    fn save(&self, key: &str, ciphertext: &[u8]) -> SecretResult<()>;

    /// Load the ciphertext stored under `key`
    fn load(&self, key: &str) -> SecretResult<Option<Vec<u8>>>;

    /// Delete the ciphertext stored under `key`; returns whether one existed
    fn delete(&self, key: &str) -> SecretResult<bool>;

    /// Names of all stored secrets, sorted
    fn keys(&self) -> SecretResult<Vec<String>>;
}

/// Repository that keeps ciphertext in memory
#[derive(Debug, Default)]
pub struct MemoryRepository {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> SecretResult<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| SecretError::persistence("lock", "repository lock poisoned"))
    }
}

impl CiphertextRepository for MemoryRepository {
    fn save(&self, key: &str, ciphertext: &[u8]) -> SecretResult<()> {
        self.entries()?.insert(key.to_string(), ciphertext.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> SecretResult<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn delete(&self, key: &str) -> SecretResult<bool> {
        Ok(self.entries()?.remove(key).is_some())
    }

    fn keys(&self) -> SecretResult<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

/// Repository that writes one `<key>.bin` file per secret, mode 0600
#[derive(Debug, Clone)]
pub struct FileRepository {
    base_dir: PathBuf,
}

impl FileRepository {
    /// Open a repository rooted at `base_dir`, creating it with mode 0700
    pub fn open<P: AsRef<Path>>(base_dir: P) -> SecretResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        ensure_private_dir(&base_dir).map_err(|e| {
            SecretError::persistence(
                "open",
                &format!("cannot create {}: {}", base_dir.display(), e),
            )
        })?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.{}", key, CIPHERTEXT_EXTENSION))
    }
}

impl CiphertextRepository for FileRepository {
    fn save(&self, key: &str, ciphertext: &[u8]) -> SecretResult<()> {
        validate_key(key)?;
        write_private_file(&self.path_for(key), ciphertext)
            .map_err(|e| SecretError::persistence("save", &e.to_string()))
    }

    fn load(&self, key: &str) -> SecretResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SecretError::persistence("load", &e.to_string())),
        }
    }

    fn delete(&self, key: &str) -> SecretResult<bool> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SecretError::persistence("delete", &e.to_string())),
        }
    }

    fn keys(&self) -> SecretResult<Vec<String>> {
        let entries = fs::read_dir(&self.base_dir)
            .map_err(|e| SecretError::persistence("keys", &e.to_string()))?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SecretError::persistence("keys", &e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(CIPHERTEXT_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
