//! Media buffers passed through the decryptor.
use std::time::Duration;

/// Clear/cipher byte counts for one subsample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubsampleEntry {
    pub clear_bytes: u32,
    pub cipher_bytes: u32,
}

impl SubsampleEntry {
    pub fn new(clear_bytes: u32, cipher_bytes: u32) -> Self {
        Self {
            clear_bytes,
            cipher_bytes,
        }
    }
}

/// Per-buffer decryption parameters.
///
/// An empty `iv` marks a buffer that is not actually encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecryptConfig {
    pub key_id: Vec<u8>,
    pub iv: Vec<u8>,
    pub subsamples: Vec<SubsampleEntry>,
}

impl DecryptConfig {
    pub fn new(key_id: Vec<u8>, iv: Vec<u8>, subsamples: Vec<SubsampleEntry>) -> Self {
        Self {
            key_id,
            iv,
            subsamples,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !self.iv.is_empty()
    }
}

/// A (possibly) encrypted media sample.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptedBuffer {
    pub data: Vec<u8>,
    pub decrypt_config: Option<DecryptConfig>,
    pub timestamp: Duration,
    pub end_of_stream: bool,
}

impl EncryptedBuffer {
    pub fn new(data: Vec<u8>, decrypt_config: DecryptConfig) -> Self {
        Self {
            data,
            decrypt_config: Some(decrypt_config),
            ..Default::default()
        }
    }

    /// A sample with no decrypt config.
    pub fn clear(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn end_of_stream() -> Self {
        Self {
            end_of_stream: true,
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Decrypted output handed back to the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecoderBuffer {
    pub data: Vec<u8>,
    pub timestamp: Duration,
    pub end_of_stream: bool,
}
