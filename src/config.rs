//! Store configuration.
//!
//! A [`StoreConfig`] is read from a JSON file and/or the environment and turns
//! into a ready-to-init [`SecretStore`]:
//!
//! ```json
//! {
//!   "alias": "app",
//!   "key_size": 2048,
//!   "backend": { "type": "software", "directory": "/var/lib/app/keys" },
//!   "repository_dir": "/var/lib/app/secrets"
//! }
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::key_management::keygen::{DEFAULT_KEY_SIZE, DEFAULT_VALIDITY_YEARS};
use crate::key_management::{
    validate_alias, HsmConfig, HsmProvider, KeyGenPolicy, KeyStoreFacade, Pkcs11KeyStore,
    SerialNumberPolicy, SoftwareKeyStore,
};
use crate::secure_memory::SecureBytes;
use crate::store::{
    CiphertextRepository, FileRepository, MemoryRepository, SecretStore, DEFAULT_INIT_ATTEMPTS,
};

/// Path of a JSON configuration file
pub const ENV_CONFIG: &str = "KEYSEAL_CONFIG";
/// Overrides `alias`
pub const ENV_ALIAS: &str = "KEYSEAL_ALIAS";
/// Overrides `key_size`
pub const ENV_KEY_SIZE: &str = "KEYSEAL_KEY_SIZE";
/// Base directory for software keys (`keys/`) and ciphertext (`secrets/`)
pub const ENV_STORE_DIR: &str = "KEYSEAL_STORE_DIR";

const DEFAULT_ALIAS: &str = "keyseal";
const MIN_KEY_SIZE: usize = 1024;
const MAX_VALIDITY_YEARS: u32 = 100;

/// Key stores opened by [`StoreConfig::build_facade`] that are still alive
static OPEN_FACADES: OnceLock<Mutex<HashMap<BackendConfig, Weak<dyn KeyStoreFacade>>>> =
    OnceLock::new();

/// Default base directory, `~/.keyseal`
pub fn default_store_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".keyseal")
}

/// Which key store holds the keypair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Software key store; keys are kept in memory only when `directory` is absent
    Software {
        #[serde(default)]
        directory: Option<PathBuf>,
    },

    /// PKCS#11 token
    Pkcs11 {
        library_path: String,
        #[serde(default)]
        slot_id: Option<u64>,
        #[serde(default)]
        token_label: Option<String>,
        /// Environment variable holding the user PIN
        #[serde(default)]
        pin_env: Option<String>,
        #[serde(default)]
        provider: HsmProvider,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Software {
            directory: Some(default_store_dir().join("keys")),
        }
    }
}

/// Everything needed to open a [`SecretStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub alias: String,
    pub key_size: usize,
    pub validity_years: u32,
    pub serial_number: SerialNumberPolicy,
    pub init_attempts: u32,
    pub backend: BackendConfig,
    /// Ciphertext directory; secrets stay in memory when absent
    pub repository_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            alias: DEFAULT_ALIAS.to_string(),
            key_size: DEFAULT_KEY_SIZE,
            validity_years: DEFAULT_VALIDITY_YEARS,
            serial_number: SerialNumberPolicy::default(),
            init_attempts: DEFAULT_INIT_ATTEMPTS,
            backend: BackendConfig::default(),
            repository_dir: Some(default_store_dir().join("secrets")),
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from `KEYSEAL_CONFIG` (or defaults) and apply the
    /// `KEYSEAL_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(alias) = lookup(ENV_ALIAS) {
            config.alias = alias;
        }

        if let Some(key_size) = lookup(ENV_KEY_SIZE) {
            config.key_size = key_size.trim().parse().map_err(|_| {
                ConfigError::invalid_value(ENV_KEY_SIZE, &format!("'{}' is not a number", key_size))
            })?;
        }

        if let Some(dir) = lookup(ENV_STORE_DIR) {
            let dir = PathBuf::from(dir);
            if let BackendConfig::Software { directory } = &mut config.backend {
                *directory = Some(dir.join("keys"));
            }
            config.repository_dir = Some(dir.join("secrets"));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting the first invalid one
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_alias(&self.alias).map_err(|e| ConfigError::invalid_value("alias", &e.to_string()))?;

        if self.key_size < MIN_KEY_SIZE || self.key_size % 8 != 0 {
            return Err(ConfigError::invalid_value(
                "key_size",
                &format!("{} is not a supported RSA size", self.key_size),
            ));
        }

        if self.validity_years == 0 || self.validity_years > MAX_VALIDITY_YEARS {
            return Err(ConfigError::invalid_value(
                "validity_years",
                &format!("must be 1-{}, got {}", MAX_VALIDITY_YEARS, self.validity_years),
            ));
        }

        if self.init_attempts == 0 {
            return Err(ConfigError::invalid_value("init_attempts", "must be at least 1"));
        }

        if let BackendConfig::Pkcs11 { library_path, .. } = &self.backend {
            if library_path.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    "backend.library_path",
                    "PKCS#11 library path is empty",
                ));
            }
        }

        Ok(())
    }

    /// Key generation policy described by this configuration
    pub fn policy(&self) -> KeyGenPolicy {
        KeyGenPolicy {
            key_size: self.key_size,
            validity_years: self.validity_years,
            serial_number: self.serial_number,
        }
    }

    /// Open the configured key store backend.
    ///
    /// A persistent backend that is already open in this process is shared
    /// rather than opened twice, so every store built for it serializes on
    /// the same alias locks. In-memory software stores are always fresh.
    pub fn build_facade(&self) -> Result<Arc<dyn KeyStoreFacade>, ConfigError> {
        if let BackendConfig::Software { directory: None } = &self.backend {
            return Ok(Arc::new(SoftwareKeyStore::in_memory()));
        }

        let mut open = OPEN_FACADES
            .get_or_init(|| Mutex::new(HashMap::new()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        open.retain(|_, facade| facade.strong_count() > 0);

        if let Some(facade) = open.get(&self.backend).and_then(Weak::upgrade) {
            log::debug!("Reusing open {} key store", facade.backend());
            return Ok(facade);
        }

        let facade = self.open_backend()?;
        open.insert(self.backend.clone(), Arc::downgrade(&facade));
        Ok(facade)
    }

    fn open_backend(&self) -> Result<Arc<dyn KeyStoreFacade>, ConfigError> {
        match &self.backend {
            BackendConfig::Software { directory: Some(directory) } => {
                let store = SoftwareKeyStore::open(directory).map_err(ConfigError::Backend)?;
                Ok(Arc::new(store))
            }
            BackendConfig::Software { directory: None } => Ok(Arc::new(SoftwareKeyStore::in_memory())),
            BackendConfig::Pkcs11 {
                library_path,
                slot_id,
                token_label,
                pin_env,
                provider,
            } => {
                let user_pin = match pin_env {
                    Some(var) => Some(
                        std::env::var(var)
                            .map(|pin| SecureBytes::from(pin.into_bytes()))
                            .map_err(|_| {
                                ConfigError::invalid_value(
                                    "backend.pin_env",
                                    &format!("environment variable {} is not set", var),
                                )
                            })?,
                    ),
                    None => None,
                };

                let hsm_config = HsmConfig {
                    library_path: library_path.clone(),
                    slot_id: *slot_id,
                    token_label: token_label.clone(),
                    user_pin,
                };
                let store = Pkcs11KeyStore::open(*provider, hsm_config).map_err(ConfigError::Backend)?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Validate, open the backend and repository, and assemble an
    /// uninitialized [`SecretStore`]
    pub fn open_store(&self) -> Result<SecretStore, ConfigError> {
        self.validate()?;
        let facade = self.build_facade()?;

        let repository: Box<dyn CiphertextRepository> = match &self.repository_dir {
            Some(dir) => Box::new(
                FileRepository::open(dir)
                    .map_err(|e| ConfigError::invalid_value("repository_dir", &e.to_string()))?,
            ),
            None => Box::new(MemoryRepository::new()),
        };

        log::debug!(
            "Opening secret store for alias '{}' on {} backend",
            self.alias,
            facade.backend()
        );

        Ok(SecretStore::new(&self.alias, facade)
            .with_policy(self.policy())
            .with_init_attempts(self.init_attempts)
            .with_repository(repository))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreState;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, String)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.key_size, 2048);
        assert_eq!(config.validity_years, 10);
        assert_eq!(config.init_attempts, 2);
        assert_eq!(config.serial_number, SerialNumberPolicy::Fixed(1337));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_json() {
        let config = StoreConfig::parse(r#"{ "alias": "app", "backend": { "type": "software" } }"#).unwrap();
        assert_eq!(config.alias, "app");
        assert_eq!(config.key_size, 2048);
        assert_eq!(config.backend, BackendConfig::Software { directory: None });
    }

    #[test]
    fn test_parse_pkcs11_backend() {
        let config = StoreConfig::parse(
            r#"{
                "alias": "hsm-app",
                "serial_number": { "kind": "random" },
                "backend": {
                    "type": "pkcs11",
                    "library_path": "/usr/lib/softhsm/libsofthsm2.so",
                    "token_label": "test",
                    "pin_env": "HSM_PIN",
                    "provider": "soft_hsm"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.serial_number, SerialNumberPolicy::Random);
        match config.backend {
            BackendConfig::Pkcs11 {
                token_label,
                pin_env,
                provider,
                slot_id,
                ..
            } => {
                assert_eq!(token_label.as_deref(), Some("test"));
                assert_eq!(pin_env.as_deref(), Some("HSM_PIN"));
                assert_eq!(provider, HsmProvider::SoftHsm);
                assert_eq!(slot_id, None);
            }
            other => panic!("expected pkcs11 backend, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(StoreConfig::parse("{ nope"), Err(ConfigError::Parse(_))));
        assert!(matches!(
            StoreConfig::from_file("/nonexistent/keyseal.json"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            StoreConfig { alias: String::new(), ..StoreConfig::default() },
            StoreConfig { key_size: 512, ..StoreConfig::default() },
            StoreConfig { validity_years: 0, ..StoreConfig::default() },
            StoreConfig { init_attempts: 0, ..StoreConfig::default() },
            StoreConfig {
                backend: BackendConfig::Pkcs11 {
                    library_path: " ".to_string(),
                    slot_id: None,
                    token_label: None,
                    pin_env: None,
                    provider: HsmProvider::GenericPkcs11,
                },
                ..StoreConfig::default()
            },
        ];

        for config in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{:?}", config);
        }
    }

    #[test]
    fn test_environment_overrides() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig::from_lookup(lookup_from(&[
            (ENV_ALIAS, "app".to_string()),
            (ENV_KEY_SIZE, "3072".to_string()),
            (ENV_STORE_DIR, tmp.path().display().to_string()),
        ]))
        .unwrap();

        assert_eq!(config.alias, "app");
        assert_eq!(config.key_size, 3072);
        assert_eq!(
            config.backend,
            BackendConfig::Software {
                directory: Some(tmp.path().join("keys"))
            }
        );
        assert_eq!(config.repository_dir, Some(tmp.path().join("secrets")));
    }

    #[test]
    fn test_environment_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keyseal.json");
        fs::write(&path, r#"{ "alias": "from-file", "init_attempts": 3 }"#).unwrap();

        let config = StoreConfig::from_lookup(lookup_from(&[(
            ENV_CONFIG,
            path.display().to_string(),
        )]))
        .unwrap();
        assert_eq!(config.alias, "from-file");
        assert_eq!(config.init_attempts, 3);
    }

    #[test]
    fn test_environment_bad_key_size() {
        let result = StoreConfig::from_lookup(lookup_from(&[(ENV_KEY_SIZE, "big".to_string())]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_open_store() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            alias: "app".to_string(),
            key_size: 1024,
            backend: BackendConfig::Software {
                directory: Some(tmp.path().join("keys")),
            },
            repository_dir: Some(tmp.path().join("secrets")),
            ..StoreConfig::default()
        };

        let store = config.open_store().unwrap();
        assert_eq!(store.state(), StoreState::Uninitialized);
        store.init().unwrap();
        store.put("pwd", b"secret1").unwrap();

        assert!(tmp.path().join("keys/app.json").exists());
        assert!(tmp.path().join("secrets/pwd.bin").exists());
    }

    #[test]
    fn test_open_store_shares_persistent_backend() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            key_size: 1024,
            backend: BackendConfig::Software {
                directory: Some(tmp.path().join("keys")),
            },
            repository_dir: None,
            ..StoreConfig::default()
        };

        let first = config.open_store().unwrap();
        let second = config.open_store().unwrap();
        assert!(Arc::ptr_eq(first.lifecycle().facade(), second.lifecycle().facade()));

        first.init().unwrap();
        second.init().unwrap();
        assert_eq!(
            first.last_report().unwrap().fingerprint,
            second.last_report().unwrap().fingerprint
        );
        assert!(!second.last_report().unwrap().is_generated());

        // Once every store is gone the backend is opened afresh
        drop(first);
        drop(second);
        let reopened = config.open_store().unwrap();
        reopened.init().unwrap();
        assert!(!reopened.last_report().unwrap().is_generated());
    }

    #[test]
    fn test_in_memory_backends_are_independent() {
        let config = StoreConfig {
            key_size: 1024,
            backend: BackendConfig::Software { directory: None },
            repository_dir: None,
            ..StoreConfig::default()
        };

        let first = config.build_facade().unwrap();
        let second = config.build_facade().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_missing_pin_variable() {
        let config = StoreConfig {
            backend: BackendConfig::Pkcs11 {
                library_path: "/usr/lib/softhsm/libsofthsm2.so".to_string(),
                slot_id: None,
                token_label: None,
                pin_env: Some("KEYSEAL_TEST_PIN_THAT_IS_NEVER_SET".to_string()),
                provider: HsmProvider::SoftHsm,
            },
            ..StoreConfig::default()
        };

        let result = config.build_facade();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
