//! Secure Memory Handling
//!
//! Plaintext secrets leave the store only inside [`SecureBytes`], a byte
//! container that is zeroed when dropped and never prints its contents.
//! The same container carries the PKCS#11 user PIN.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A container for sensitive bytes (decrypted secrets, PINs).
///
/// # Security Properties
///
/// 1. Automatically zeroes memory when dropped
/// 2. `Debug` output is redacted so contents cannot end up in logs
/// 3. Clones zeroize independently
///
/// # Example
///
/// ```
/// use keyseal::secure_memory::SecureBytes;
///
/// let password = SecureBytes::new(b"hunter2");
/// assert_eq!(password.as_bytes(), b"hunter2");
/// assert_eq!(format!("{:?}", password), "SecureBytes([REDACTED; 7 bytes])");
/// ```
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecureBytes {
    bytes: Vec<u8>,
}

impl SecureBytes {
    /// Create a new SecureBytes holding a copy of `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec(),
        }
    }

    /// Get a reference to the underlying bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the container and return the contained bytes
    ///
    /// # Security Considerations
    ///
    /// After calling this method it becomes the caller's responsibility
    /// to zeroize the returned vector.
    pub fn into_vec(mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    /// Clear the buffer, zeroing all data
    pub fn clear(&mut self) {
        self.bytes.zeroize();
        self.bytes.clear();
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes([REDACTED; {} bytes])", self.bytes.len())
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for SecureBytes {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl AsRef<[u8]> for SecureBytes {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq<[u8]> for SecureBytes {
    fn eq(&self, other: &[u8]) -> bool {
        self.bytes.as_slice() == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secure_bytes() {
        let data = b"sensitive data";
        let mut secure = SecureBytes::new(data);

        assert_eq!(secure.as_bytes(), data);
        assert_eq!(secure.len(), data.len());

        secure.clear();
        assert!(secure.is_empty());
    }

    #[test]
    fn test_into_vec_moves_contents() {
        let secure = SecureBytes::from(b"pin-1234".to_vec());
        let vec = secure.into_vec();
        assert_eq!(vec, b"pin-1234");
    }

    #[test]
    fn test_debug_is_redacted() {
        let secure = SecureBytes::new(b"secret1");
        let printed = format!("{:?}", secure);
        assert!(!printed.contains("secret1"));
        assert!(printed.contains("REDACTED"));
    }

    #[test]
    fn test_compare_with_slice() {
        let secure = SecureBytes::new(b"abc");
        assert!(secure == *b"abc".as_slice());
    }
}
