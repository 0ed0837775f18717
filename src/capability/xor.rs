//! Repeating-key XOR cipher

use crate::capability::Decryptor;
use crate::error::{CapabilityError, CapabilityResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ciphers a job definition can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherKind {
    #[default]
    Xor,
}

impl CipherKind {
    pub fn build(&self) -> Arc<dyn Decryptor> {
        match self {
            CipherKind::Xor => Arc::new(XorCipher),
        }
    }
}

/// XORs the ciphertext with the key repeated to its length. The IV is unused.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorCipher;

impl XorCipher {
    /// Encrypt `plaintext`; XOR is its own inverse
    pub fn encrypt(plaintext: &[u8], key: &[u8]) -> CapabilityResult<Vec<u8>> {
        XorCipher.decrypt(plaintext, key, &[], 0)
    }
}

impl Decryptor for XorCipher {
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        _iv: &[u8],
        bytes_to_use: usize,
    ) -> CapabilityResult<Vec<u8>> {
        if key.is_empty() {
            return Err(CapabilityError::Decrypt("key is empty".into()));
        }
        let len = match bytes_to_use {
            0 => ciphertext.len(),
            n => n.min(ciphertext.len()),
        };
        Ok(ciphertext[..len]
            .iter()
            .zip(key.iter().cycle())
            .map(|(c, k)| c ^ k)
            .collect())
    }

    fn name(&self) -> &str {
        "xor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ct = XorCipher::encrypt(b"attack at dawn", &[0x5A, 0x01]).unwrap();
        assert_ne!(ct, b"attack at dawn");
        let pt = XorCipher.decrypt(&ct, &[0x5A, 0x01], b"ignored", 0).unwrap();
        assert_eq!(pt, b"attack at dawn");
    }

    #[test]
    fn test_bytes_to_use() {
        let pt = XorCipher.decrypt(&[1, 2, 3, 4], &[0], &[], 2).unwrap();
        assert_eq!(pt, vec![1, 2]);
        let pt = XorCipher.decrypt(&[1, 2, 3, 4], &[0], &[], 99).unwrap();
        assert_eq!(pt.len(), 4);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            XorCipher.decrypt(&[1], &[], &[], 0),
            Err(CapabilityError::Decrypt(_))
        ));
    }
}
