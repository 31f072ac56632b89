/*!
 * Error Handling for the Keyseal Credential Store
 *
 * Each layer of the store has its own error type. Raw key store failures
 * ([`KeyStoreError`]) never cross the public API: they are caught by the
 * lifecycle manager, the codec or the store façade and re-signalled as one of
 * the typed errors below.
 */

use std::collections::HashMap;
use thiserror::Error;

/// Error code constants for the different error categories
pub mod error_codes {
    // Key store (facade) errors: 1000-1999
    pub const KEYSTORE_UNAVAILABLE: u32 = 1001;
    pub const KEYSTORE_UNSUPPORTED_ALGORITHM: u32 = 1002;
    pub const KEYSTORE_INVALID_SPEC: u32 = 1003;
    pub const KEYSTORE_CORRUPTED_ENTRY: u32 = 1004;
    pub const KEYSTORE_DECRYPTION_REJECTED: u32 = 1005;
    pub const KEYSTORE_OPERATION_FAILED: u32 = 1006;
    pub const KEYSTORE_IO_FAILED: u32 = 1007;
    pub const KEYSTORE_SERIALIZATION_FAILED: u32 = 1008;

    // Key lifecycle errors: 2000-2999
    pub const KEY_GENERATION_FAILED: u32 = 2001;
    pub const KEY_PROVIDER_UNAVAILABLE: u32 = 2002;
    pub const KEY_INVALID_ALIAS: u32 = 2003;

    // Cipher errors: 3000-3999
    pub const CIPHER_PAYLOAD_TOO_LARGE: u32 = 3001;
    pub const CIPHER_UNDERLYING_FAILURE: u32 = 3002;
    pub const CIPHER_INVALID_CIPHERTEXT: u32 = 3003;

    // Secret store errors: 4000-4999
    pub const SECRET_KEY_UNAVAILABLE: u32 = 4001;
    pub const SECRET_ENCRYPTION_FAILED: u32 = 4002;
    pub const SECRET_DECRYPTION_FAILED: u32 = 4003;
    pub const SECRET_NOT_READY: u32 = 4004;
    pub const SECRET_NOT_FOUND: u32 = 4005;
    pub const SECRET_INVALID_KEY: u32 = 4006;
    pub const SECRET_PERSISTENCE_FAILED: u32 = 4007;
    pub const SECRET_INIT_FAILED: u32 = 4008;

    // Configuration errors: 5000-5999
    pub const CONFIG_READ_FAILED: u32 = 5001;
    pub const CONFIG_PARSE_FAILED: u32 = 5002;
    pub const CONFIG_INVALID_VALUE: u32 = 5003;
    pub const CONFIG_BACKEND_FAILED: u32 = 5004;
}

/// Raw errors reported by a [`crate::key_management::KeyStoreFacade`] backend
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key store unavailable: {operation} - {cause}")]
    Unavailable { operation: String, cause: String },

    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid key generation spec: {0}")]
    InvalidSpec(String),

    #[error("Key entry '{alias}' is corrupted: {details}")]
    Corrupted { alias: String, details: String },

    #[error("Ciphertext rejected by key store: {0}")]
    DecryptionRejected(String),

    #[error("Key store operation failed: {operation} - {cause}")]
    OperationFailed { operation: String, cause: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl KeyStoreError {
    pub fn unavailable(operation: &str, cause: &str) -> Self {
        KeyStoreError::Unavailable {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn corrupted(alias: &str, details: &str) -> Self {
        KeyStoreError::Corrupted {
            alias: alias.to_string(),
            details: details.to_string(),
        }
    }

    pub fn operation_failed(operation: &str, cause: &str) -> Self {
        KeyStoreError::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Get the numeric error code for this error
    pub fn error_code(&self) -> u32 {
        match self {
            KeyStoreError::Unavailable { .. } => error_codes::KEYSTORE_UNAVAILABLE,
            KeyStoreError::UnsupportedAlgorithm(_) => error_codes::KEYSTORE_UNSUPPORTED_ALGORITHM,
            KeyStoreError::InvalidSpec(_) => error_codes::KEYSTORE_INVALID_SPEC,
            KeyStoreError::Corrupted { .. } => error_codes::KEYSTORE_CORRUPTED_ENTRY,
            KeyStoreError::DecryptionRejected(_) => error_codes::KEYSTORE_DECRYPTION_REJECTED,
            KeyStoreError::OperationFailed { .. } => error_codes::KEYSTORE_OPERATION_FAILED,
            KeyStoreError::Io(_) => error_codes::KEYSTORE_IO_FAILED,
            KeyStoreError::Serialization(_) => error_codes::KEYSTORE_SERIALIZATION_FAILED,
        }
    }

    /// Whether the provider itself could not be reached (as opposed to a bad entry)
    pub fn is_unavailable(&self) -> bool {
        matches!(self, KeyStoreError::Unavailable { .. })
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            KeyStoreError::Unavailable { .. } => {
                "The secure key store could not be reached.".to_string()
            }
            KeyStoreError::UnsupportedAlgorithm(algorithm) => {
                format!("The key store does not support {} keys.", algorithm)
            }
            KeyStoreError::InvalidSpec(_) => {
                "The key store rejected the requested key settings.".to_string()
            }
            KeyStoreError::Corrupted { alias, .. } => {
                format!("The stored key '{}' is damaged.", alias)
            }
            KeyStoreError::DecryptionRejected(_) => {
                "The key store could not decrypt the data.".to_string()
            }
            KeyStoreError::OperationFailed { .. } => "A key store operation failed.".to_string(),
            KeyStoreError::Io(_) => "Key files could not be read or written.".to_string(),
            KeyStoreError::Serialization(_) => "A key record could not be decoded.".to_string(),
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            KeyStoreError::Unavailable { .. } => Some(
                "Check that the PKCS#11 library and token are present and the PIN is correct."
                    .to_string(),
            ),
            KeyStoreError::InvalidSpec(_) => {
                Some("Choose a key size the backend lists as supported.".to_string())
            }
            KeyStoreError::Io(_) => {
                Some("Check permissions on the key directory.".to_string())
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyStoreError {
    fn from(err: std::io::Error) -> Self {
        KeyStoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for KeyStoreError {
    fn from(err: serde_json::Error) -> Self {
        KeyStoreError::Serialization(err.to_string())
    }
}

/// Errors from the key lifecycle manager
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key generation failed for alias '{alias}': {cause}")]
    GenerationFailed { alias: String, cause: String },

    #[error("Key store provider unavailable: {cause}")]
    ProviderUnavailable { cause: String },

    #[error("Invalid alias: {0}")]
    InvalidAlias(String),
}

impl KeyError {
    pub fn generation_failed(alias: &str, cause: &str) -> Self {
        KeyError::GenerationFailed {
            alias: alias.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn error_code(&self) -> u32 {
        match self {
            KeyError::GenerationFailed { .. } => error_codes::KEY_GENERATION_FAILED,
            KeyError::ProviderUnavailable { .. } => error_codes::KEY_PROVIDER_UNAVAILABLE,
            KeyError::InvalidAlias(_) => error_codes::KEY_INVALID_ALIAS,
        }
    }

    /// Generation failures are transient enough to be worth one more attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeyError::GenerationFailed { .. })
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            KeyError::GenerationFailed { alias, .. } => format!(
                "A new key for '{}' could not be created. Try initializing the store again.",
                alias
            ),
            KeyError::ProviderUnavailable { .. } => {
                "The secure key store could not be reached.".to_string()
            }
            KeyError::InvalidAlias(alias) => format!("'{}' cannot be used as a key alias.", alias),
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            KeyError::GenerationFailed { .. } => Some("Call init() again.".to_string()),
            KeyError::ProviderUnavailable { .. } => Some(
                "Make sure the key store backend is reachable, then call init() again.".to_string(),
            ),
            KeyError::InvalidAlias(_) => Some(
                "Use a non-empty alias of at most 128 characters without path separators or a leading '.'."
                    .to_string(),
            ),
        }
    }
}

/// Errors from the RSA cipher codec
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("Payload too large: {len} bytes (maximum {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Cipher operation failed: {operation} - {cause}")]
    UnderlyingFailure { operation: String, cause: String },

    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}

impl CipherError {
    pub fn underlying(operation: &str, cause: &str) -> Self {
        CipherError::UnderlyingFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn error_code(&self) -> u32 {
        match self {
            CipherError::PayloadTooLarge { .. } => error_codes::CIPHER_PAYLOAD_TOO_LARGE,
            CipherError::UnderlyingFailure { .. } => error_codes::CIPHER_UNDERLYING_FAILURE,
            CipherError::InvalidCiphertext(_) => error_codes::CIPHER_INVALID_CIPHERTEXT,
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            CipherError::PayloadTooLarge { max, .. } => {
                format!("The data is too long to encrypt (at most {} bytes).", max)
            }
            CipherError::UnderlyingFailure { .. } => "The cipher operation failed.".to_string(),
            CipherError::InvalidCiphertext(_) => "The encrypted data is damaged.".to_string(),
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            CipherError::PayloadTooLarge { .. } => {
                Some("Encrypt a shorter value or use a larger key size.".to_string())
            }
            _ => None,
        }
    }
}

/// Errors surfaced by [`crate::store::SecretStore`]
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Key unavailable for alias '{alias}': {cause}")]
    KeyUnavailable { alias: String, cause: String },

    #[error("Encryption failed: {0}")]
    EncryptionFailed(#[source] CipherError),

    #[error("Decryption failed: {cause}")]
    DecryptionFailed { cause: String },

    #[error("Secret store is not ready (state: {state})")]
    NotReady { state: String },

    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Invalid secret key: {0}")]
    InvalidKey(String),

    #[error("Ciphertext persistence failed: {operation} - {cause}")]
    Persistence { operation: String, cause: String },
}

impl SecretError {
    pub fn key_unavailable(alias: &str, cause: &str) -> Self {
        SecretError::KeyUnavailable {
            alias: alias.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn persistence(operation: &str, cause: &str) -> Self {
        SecretError::Persistence {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn error_code(&self) -> u32 {
        match self {
            SecretError::KeyUnavailable { .. } => error_codes::SECRET_KEY_UNAVAILABLE,
            SecretError::EncryptionFailed(_) => error_codes::SECRET_ENCRYPTION_FAILED,
            SecretError::DecryptionFailed { .. } => error_codes::SECRET_DECRYPTION_FAILED,
            SecretError::NotReady { .. } => error_codes::SECRET_NOT_READY,
            SecretError::NotFound(_) => error_codes::SECRET_NOT_FOUND,
            SecretError::InvalidKey(_) => error_codes::SECRET_INVALID_KEY,
            SecretError::Persistence { .. } => error_codes::SECRET_PERSISTENCE_FAILED,
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            SecretError::KeyUnavailable { .. } => {
                "The encryption key was unusable and has been reset. Previously stored secrets must be saved again."
                    .to_string()
            }
            SecretError::EncryptionFailed(CipherError::PayloadTooLarge { max, .. }) => {
                format!("The secret is too long to store (at most {} bytes).", max)
            }
            SecretError::EncryptionFailed(_) => "The secret could not be encrypted.".to_string(),
            SecretError::DecryptionFailed { .. } => {
                "The stored secret could not be decrypted. It may be damaged.".to_string()
            }
            SecretError::NotReady { .. } => {
                "The secret store has not been initialized.".to_string()
            }
            SecretError::NotFound(key) => format!("No secret is stored under '{}'.", key),
            SecretError::InvalidKey(key) => format!("'{}' is not a valid secret name.", key),
            SecretError::Persistence { .. } => {
                "Stored secrets could not be read or written. Check file permissions and disk space."
                    .to_string()
            }
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            SecretError::KeyUnavailable { .. } => {
                Some("Call init() to generate a fresh key before storing secrets again.".to_string())
            }
            SecretError::NotReady { .. } => Some("Call init() and check its result.".to_string()),
            SecretError::EncryptionFailed(CipherError::PayloadTooLarge { .. }) => Some(
                "Store a shorter secret; a single RSA block cannot hold more than the key allows."
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Get technical details for debugging
    pub fn technical_details(&self) -> HashMap<String, String> {
        let mut details = HashMap::new();
        details.insert("error_code".to_string(), self.error_code().to_string());
        details.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());

        match self {
            SecretError::KeyUnavailable { alias, cause } => {
                details.insert("alias".to_string(), alias.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            SecretError::EncryptionFailed(inner) => {
                details.insert("cipher_error_code".to_string(), inner.error_code().to_string());
                details.insert("cause".to_string(), inner.to_string());
            }
            SecretError::Persistence { operation, cause } => {
                details.insert("operation".to_string(), operation.clone());
                details.insert("cause".to_string(), cause.clone());
            }
            _ => {
                details.insert("details".to_string(), self.to_string());
            }
        }

        details
    }
}

/// Error returned by [`crate::store::SecretStore::init`]
#[derive(Debug, Error)]
pub enum InitError {
    #[error("Key setup failed after {attempts} attempt(s): {source}")]
    KeySetupFailed {
        attempts: u32,
        #[source]
        source: KeyError,
    },
}

impl InitError {
    pub fn error_code(&self) -> u32 {
        error_codes::SECRET_INIT_FAILED
    }

    /// The lifecycle error behind the failed initialization
    pub fn key_error(&self) -> &KeyError {
        match self {
            InitError::KeySetupFailed { source, .. } => source,
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            InitError::KeySetupFailed { attempts, source } => format!(
                "The secret store could not be set up after {} attempt(s). {}",
                attempts,
                source.user_friendly_message()
            ),
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        self.key_error().suggested_remediation()
    }
}

/// Errors while loading or applying a [`crate::config::StoreConfig`]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {cause}")]
    Read { path: String, cause: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to open key store backend: {0}")]
    Backend(#[source] KeyStoreError),
}

impl ConfigError {
    pub fn invalid_value(field: &str, reason: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn error_code(&self) -> u32 {
        match self {
            ConfigError::Read { .. } => error_codes::CONFIG_READ_FAILED,
            ConfigError::Parse(_) => error_codes::CONFIG_PARSE_FAILED,
            ConfigError::InvalidValue { .. } => error_codes::CONFIG_INVALID_VALUE,
            ConfigError::Backend(_) => error_codes::CONFIG_BACKEND_FAILED,
        }
    }

    /// Get a user-friendly error message
    pub fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::Read { path, .. } => {
                format!("The configuration file {} could not be read.", path)
            }
            ConfigError::Parse(_) => "The configuration file is not valid JSON.".to_string(),
            ConfigError::InvalidValue { field, reason } => {
                format!("The configuration value '{}' is invalid: {}.", field, reason)
            }
            ConfigError::Backend(inner) => inner.user_friendly_message(),
        }
    }

    /// Get suggested remediation steps
    pub fn suggested_remediation(&self) -> Option<String> {
        match self {
            ConfigError::Read { .. } => Some(format!(
                "Check the path in {} and its permissions.",
                crate::config::ENV_CONFIG
            )),
            ConfigError::Parse(_) => Some("Fix the JSON syntax in the configuration file.".to_string()),
            ConfigError::InvalidValue { field, .. } => {
                Some(format!("Correct '{}' in the configuration or environment.", field))
            }
            ConfigError::Backend(inner) => inner.suggested_remediation(),
        }
    }
}

/// Result type alias for key store backend operations
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

/// Result type alias for key lifecycle operations
pub type KeyResult<T> = Result<T, KeyError>;

/// Result type alias for cipher operations
pub type CipherResult<T> = Result<T, CipherError>;

/// Result type alias for secret store operations
pub type SecretResult<T> = Result<T, SecretError>;
