//! Subsample partitioning of encrypted buffers.
//!
//! A subsample list splits a buffer into alternating clear and cipher runs.
//! The cipher runs form one continuous counter-mode stream, so they are
//! gathered into a contiguous buffer, decrypted in one pass, and scattered
//! back into place.
use crate::buffer::SubsampleEntry;
use crate::error::{Error, Result};

/// Check that the subsamples cover `buffer_len` exactly.
///
/// Returns the total number of cipher bytes. An empty list is valid and
/// means the whole buffer is one cipher run.
pub fn validate(subsamples: &[SubsampleEntry], buffer_len: usize) -> Result<usize> {
    if subsamples.is_empty() {
        return Ok(buffer_len);
    }

    let mut total: u64 = 0;
    let mut cipher_total: u64 = 0;
    for entry in subsamples {
        total += u64::from(entry.clear_bytes) + u64::from(entry.cipher_bytes);
        cipher_total += u64::from(entry.cipher_bytes);
    }

    if total != buffer_len as u64 {
        return Err(Error::SubsampleSizeMismatch {
            total,
            expected: buffer_len,
        });
    }
    Ok(cipher_total as usize)
}

/// Concatenate the cipher runs of `buffer`, skipping clear runs.
pub fn extract_cipher_regions(buffer: &[u8], subsamples: &[SubsampleEntry]) -> Result<Vec<u8>> {
    let cipher_total = validate(subsamples, buffer.len())?;
    if subsamples.is_empty() {
        return Ok(buffer.to_vec());
    }

    let mut out = Vec::with_capacity(cipher_total);
    let mut offset = 0usize;
    for entry in subsamples {
        offset += entry.clear_bytes as usize;
        let end = offset + entry.cipher_bytes as usize;
        out.extend_from_slice(&buffer[offset..end]);
        offset = end;
    }
    Ok(out)
}

/// Copy `buffer` and overwrite its cipher runs with `cipher_stream`.
///
/// `cipher_stream` must hold exactly as many bytes as the cipher runs.
pub fn scatter_cipher_regions(
    buffer: &[u8],
    subsamples: &[SubsampleEntry],
    cipher_stream: &[u8],
) -> Result<Vec<u8>> {
    let cipher_total = validate(subsamples, buffer.len())?;
    if cipher_stream.len() != cipher_total {
        return Err(Error::Other(format!(
            "Cipher stream length {} does not match cipher region size {}",
            cipher_stream.len(),
            cipher_total
        )));
    }
    if subsamples.is_empty() {
        return Ok(cipher_stream.to_vec());
    }

    let mut out = buffer.to_vec();
    let mut offset = 0usize;
    let mut consumed = 0usize;
    for entry in subsamples {
        offset += entry.clear_bytes as usize;
        let len = entry.cipher_bytes as usize;
        out[offset..offset + len].copy_from_slice(&cipher_stream[consumed..consumed + len]);
        offset += len;
        consumed += len;
    }
    Ok(out)
}
