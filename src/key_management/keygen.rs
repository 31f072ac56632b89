/*!
 * Key Generation Specification
 *
 * Describes the keypair the lifecycle manager asks a backend to create, and
 * negotiates it against what the backend says it supports.
 */

use std::fmt;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::key_management::facade::KeyStoreCapabilities;

/// Default RSA modulus size
pub const DEFAULT_KEY_SIZE: usize = 2048;

/// Default lifetime of a generated keypair
pub const DEFAULT_VALIDITY_YEARS: u32 = 10;

/// Serial number used when the policy asks for a fixed one
pub const DEFAULT_FIXED_SERIAL: u64 = 1337;

/// RSA public exponent (65537)
pub const RSA_PUBLIC_EXPONENT: u32 = 65_537;

/// Asymmetric algorithm of a generated key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Rsa,
}

/// Operation a key is allowed to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    Encrypt,
    Decrypt,
}

/// Digest algorithms a key may be used with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

/// Encryption padding schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionPadding {
    /// RSAES-PKCS1-v1_5
    RsaPkcs1,
}

impl EncryptionPadding {
    /// Bytes of each RSA block consumed by the padding
    pub fn overhead(&self) -> usize {
        match self {
            EncryptionPadding::RsaPkcs1 => 11,
        }
    }
}

impl fmt::Display for EncryptionPadding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionPadding::RsaPkcs1 => write!(f, "PKCS1Padding"),
        }
    }
}

/// Start and end of a keypair's validity. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityWindow {
    /// A window starting at `start` and lasting `years` calendar years
    pub fn starting_at(start: DateTime<Utc>, years: u32) -> Option<Self> {
        let not_after = start.checked_add_months(Months::new(years.checked_mul(12)?))?;
        Some(Self {
            not_before: start,
            not_after,
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.not_before && instant <= self.not_after
    }
}

/// How the certificate serial number is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum SerialNumberPolicy {
    Fixed(u64),
    Random,
}

impl SerialNumberPolicy {
    fn assign(&self) -> u64 {
        match self {
            SerialNumberPolicy::Fixed(serial) => *serial,
            // Keep the value positive when encoded as a signed DER integer
            SerialNumberPolicy::Random => rand::random::<u64>() >> 1,
        }
    }
}

impl Default for SerialNumberPolicy {
    fn default() -> Self {
        SerialNumberPolicy::Fixed(DEFAULT_FIXED_SERIAL)
    }
}

/// Settings that stay the same for every key the lifecycle manager creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenPolicy {
    pub key_size: usize,
    pub validity_years: u32,
    pub serial_number: SerialNumberPolicy,
}

impl Default for KeyGenPolicy {
    fn default() -> Self {
        Self {
            key_size: DEFAULT_KEY_SIZE,
            validity_years: DEFAULT_VALIDITY_YEARS,
            serial_number: SerialNumberPolicy::default(),
        }
    }
}

/// Self-signed certificate details bound to a generated keypair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSpec {
    /// X.500 subject, `CN=<alias>`
    pub subject: String,
    pub serial_number: u64,
}

/// Usage restrictions bound to a generated keypair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmParameters {
    pub purposes: Vec<KeyPurpose>,
    pub digests: Vec<DigestAlgorithm>,
    pub encryption_paddings: Vec<EncryptionPadding>,
}

impl AlgorithmParameters {
    fn for_decryption() -> Self {
        Self {
            purposes: vec![KeyPurpose::Decrypt],
            digests: vec![DigestAlgorithm::Sha256, DigestAlgorithm::Sha512],
            encryption_paddings: vec![EncryptionPadding::RsaPkcs1],
        }
    }

    pub fn allows_decryption_with(&self, padding: EncryptionPadding) -> bool {
        self.purposes.contains(&KeyPurpose::Decrypt) && self.encryption_paddings.contains(&padding)
    }
}

/// Everything a backend needs to create one keypair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenSpec {
    pub alias: String,
    pub algorithm: KeyAlgorithm,
    pub key_size: usize,
    pub public_exponent: u32,
    pub validity: ValidityWindow,

    /// Present when the backend can bind purposes, digests and paddings
    pub parameters: Option<AlgorithmParameters>,

    /// Present when the backend keeps a self-signed certificate
    pub certificate: Option<CertificateSpec>,
}

impl KeyGenSpec {
    /// Build the richest spec `capabilities` allows for `alias`.
    ///
    /// Returns an error message when the policy asks for something the
    /// backend cannot do at all.
    pub fn negotiate(
        alias: &str,
        capabilities: &KeyStoreCapabilities,
        policy: &KeyGenPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self, String> {
        if !capabilities.supports_key_size(policy.key_size) {
            return Err(format!(
                "RSA-{} is not supported (available: {:?})",
                policy.key_size, capabilities.supported_key_sizes
            ));
        }

        let validity = ValidityWindow::starting_at(now, policy.validity_years)
            .ok_or_else(|| format!("validity of {} years overflows", policy.validity_years))?;

        let parameters = capabilities
            .algorithm_parameters
            .then(AlgorithmParameters::for_decryption);

        let certificate = capabilities.self_signed_certificate.then(|| CertificateSpec {
            subject: format!("CN={}", alias),
            serial_number: policy.serial_number.assign(),
        });

        Ok(Self {
            alias: alias.to_string(),
            algorithm: KeyAlgorithm::Rsa,
            key_size: policy.key_size,
            public_exponent: RSA_PUBLIC_EXPONENT,
            validity,
            parameters,
            certificate,
        })
    }

    /// Whether keys made from this spec may decrypt with `padding`.
    /// Specs without a parameter block carry no restriction.
    pub fn allows_decryption_with(&self, padding: EncryptionPadding) -> bool {
        self.parameters
            .as_ref()
            .map_or(true, |params| params.allows_decryption_with(padding))
    }
}
