/*!
 * RSA Cipher Codec
 *
 * Encrypts a plaintext buffer as a single RSA block with PKCS#1 v1.5 padding
 * ("RSA/ECB/PKCS1Padding"). Encryption only needs the exportable public key;
 * decryption is handed to the key store so the private key never leaves it.
 *
 * One block means a hard payload bound of `modulus_bytes - 11`: 245 bytes
 * for 2048-bit keys. Larger payloads are rejected, never truncated.
 */

use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::error::{CipherError, CipherResult, KeyStoreError};
use crate::key_management::{EncryptionPadding, KeyStoreFacade, KeypairHandle};
use crate::secure_memory::SecureBytes;

#[cfg(test)]
mod tests;

/// Padding used for every block
pub const PADDING: EncryptionPadding = EncryptionPadding::RsaPkcs1;

/// Stateless RSA/ECB/PKCS#1 v1.5 codec
#[derive(Debug, Clone, Copy, Default)]
pub struct CipherCodec;

impl CipherCodec {
    pub fn new() -> Self {
        Self
    }

    /// Largest plaintext a single block can hold under `public_key`
    pub fn max_plaintext_len(public_key: &RsaPublicKey) -> usize {
        public_key.size().saturating_sub(PADDING.overhead())
    }

    /// Encrypt `plaintext` under `public_key`.
    ///
    /// Returns the raw ciphertext, exactly one modulus in length.
    ///
    /// # Errors
    ///
    /// * [`CipherError::PayloadTooLarge`] if `plaintext` exceeds
    ///   [`Self::max_plaintext_len`]
    /// * [`CipherError::UnderlyingFailure`] if the RSA operation fails
    pub fn encrypt(&self, public_key: &RsaPublicKey, plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        let max = Self::max_plaintext_len(public_key);
        if plaintext.len() > max {
            return Err(CipherError::PayloadTooLarge {
                len: plaintext.len(),
                max,
            });
        }

        public_key
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| CipherError::underlying("encrypt", &e.to_string()))
    }

    /// Decrypt `ciphertext` with the private key behind `handle`.
    ///
    /// # Errors
    ///
    /// * [`CipherError::InvalidCiphertext`] if the length is not one modulus or
    ///   the key store rejects the block as malformed
    /// * [`CipherError::UnderlyingFailure`] for any other key store failure
    pub fn decrypt(
        &self,
        facade: &dyn KeyStoreFacade,
        handle: &KeypairHandle,
        ciphertext: &[u8],
    ) -> CipherResult<SecureBytes> {
        if let Some(expected) = handle.modulus_len() {
            if ciphertext.len() != expected {
                return Err(CipherError::InvalidCiphertext(format!(
                    "expected {} bytes, got {}",
                    expected,
                    ciphertext.len()
                )));
            }
        }

        facade
            .decrypt(handle, ciphertext, PADDING)
            .map_err(|err| match err {
                KeyStoreError::DecryptionRejected(cause) => CipherError::InvalidCiphertext(cause),
                other => CipherError::underlying("decrypt", &other.to_string()),
            })
    }
}
