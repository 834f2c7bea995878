//! AES-128-CTR decryption.
//!
//! The 16-byte IV is used directly as the initial counter block and the whole
//! block is incremented as a 128-bit big-endian counter.
use aes::cipher::{KeyIvInit, StreamCipher};

use crate::error::{Error, Result};
use crate::key::DECRYPTION_KEY_SIZE;

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Required IV (initial counter block) size.
pub const IV_SIZE: usize = 16;

/// AES-128 in counter mode.
///
/// Counter mode is symmetric, so [`AesCtrCipher::encrypt`] is the same
/// keystream application as [`AesCtrCipher::decrypt`].
pub struct AesCtrCipher {
    inner: Aes128Ctr,
}

impl AesCtrCipher {
    /// Validate key and IV lengths and set up the keystream.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != DECRYPTION_KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: DECRYPTION_KEY_SIZE,
                actual: key.len(),
            });
        }
        if iv.len() != IV_SIZE {
            return Err(Error::InvalidIvLength {
                expected: IV_SIZE,
                actual: iv.len(),
            });
        }

        let inner = Aes128Ctr::new_from_slices(key, iv)
            .map_err(|e| Error::Other(format!("Failed to initialize AES-CTR: {}", e)))?;
        Ok(Self { inner })
    }

    /// Decrypt `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        self.inner.apply_keystream(data);
    }

    /// Decrypt a ciphertext into a new buffer.
    pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut cipher = Self::new(key, iv)?;
        let mut out = ciphertext.to_vec();
        cipher.apply(&mut out);
        Ok(out)
    }

    /// Encrypt a plaintext into a new buffer.
    pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        Self::decrypt(key, iv, plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::AesCtrCipher;

    // NIST SP 800-38A, F.5.1 CTR-AES128.Encrypt
    const KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const COUNTER: &str = "f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff";
    const PLAINTEXT: &str = concat!(
        "6bc1bee22e409f96e93d7e117393172a",
        "ae2d8a571e03ac9c9eb76fac45af8e51",
        "30c81c46a35ce411e5fbc1191a0a52ef",
        "f69f2445df4f9b17ad2b417be66c3710"
    );
    const CIPHERTEXT: &str = concat!(
        "874d6191b620e3261bef6864990db6ce",
        "9806f66b7970fdff8617187bb9fffdff",
        "5ae4df3edbd5d35e5b4f09020db03eab",
        "1e031dda2fbe03d1792170a0f3009cee"
    );

    fn bytes(s: &str) -> Vec<u8> {
        hex::decode(s).expect("valid hex")
    }

    #[test]
    fn nist_vector_decrypts() {
        let plain = AesCtrCipher::decrypt(&bytes(KEY), &bytes(COUNTER), &bytes(CIPHERTEXT))
            .expect("decrypt");
        assert_eq!(plain, bytes(PLAINTEXT));
    }

    #[test]
    fn partial_block_uses_keystream_prefix() {
        let ciphertext = bytes(CIPHERTEXT);
        let plain = AesCtrCipher::decrypt(&bytes(KEY), &bytes(COUNTER), &ciphertext[..20])
            .expect("decrypt");
        assert_eq!(plain, bytes(PLAINTEXT)[..20].to_vec());
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = [0x11u8; 16];
        let iv = [0x22u8; 16];
        let message = b"Original subsample data.";
        let encrypted = AesCtrCipher::encrypt(&key, &iv, message).expect("encrypt");
        assert_ne!(encrypted.as_slice(), message.as_slice());
        let decrypted = AesCtrCipher::decrypt(&key, &iv, &encrypted).expect("decrypt");
        assert_eq!(decrypted.as_slice(), message.as_slice());
    }

    #[test]
    fn wrong_lengths_fail() {
        let err = AesCtrCipher::new(&[0u8; 15], &[0u8; 16]).err().expect("short key");
        assert!(err.to_string().contains("key length"));
        let err = AesCtrCipher::new(&[0u8; 16], &[0u8; 8]).err().expect("short iv");
        assert!(err.to_string().contains("IV length"));
    }
}
