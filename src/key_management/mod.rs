/*!
 * Key Management for the credential store
 *
 * This module owns the asymmetric keypair that protects stored secrets: the
 * [`KeyStoreFacade`] capability trait with its software and PKCS#11 backends,
 * the negotiated [`KeyGenSpec`], and the [`KeyLifecycleManager`] that keeps
 * exactly one usable keypair per alias.
 */

pub mod facade;
pub mod hsm;
pub mod keygen;
pub mod lifecycle;
pub mod locks;
pub mod software;


pub use facade::KeyStoreBackend;
pub use facade::KeyStoreCapabilities;
pub use facade::KeyStoreFacade;
pub use facade::KeypairHandle;
pub use hsm::HsmConfig;
pub use hsm::HsmProvider;
pub use hsm::Pkcs11KeyStore;
pub use keygen::AlgorithmParameters;
pub use keygen::CertificateSpec;
pub use keygen::EncryptionPadding;
pub use keygen::KeyGenPolicy;
pub use keygen::KeyGenSpec;
pub use keygen::SerialNumberPolicy;
pub use keygen::ValidityWindow;
pub use lifecycle::validate_alias;
pub use lifecycle::HardwareIsolation;
pub use lifecycle::KeyLifecycleManager;
pub use lifecycle::KeyReport;
pub use lifecycle::KeyStatus;
pub use locks::AliasLocks;
pub use software::SoftwareKeyStore;
