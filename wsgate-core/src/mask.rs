//! Payload masking (RFC 6455 Section 5.3)
//!
//! `output[i] = data[i] ^ key[i % 4]`. The transform is its own inverse, so
//! the same functions mask outgoing and unmask incoming payloads.

use crate::protocol::frame::MASKING_KEY_LEN;
use bytes::{BufMut, Bytes, BytesMut};

/// Mask or unmask `data` with `key`, returning a new buffer.
pub fn apply_mask(key: [u8; MASKING_KEY_LEN], data: &[u8]) -> Bytes {
    let mut masked = BytesMut::with_capacity(data.len());
    masked.put_slice(data);
    apply_mask_in_place(key, &mut masked);
    masked.freeze()
}

/// Mask or unmask `data` in place.
pub fn apply_mask_in_place(key: [u8; MASKING_KEY_LEN], data: &mut [u8]) {
    // Whole words first; the tail zips against the leading key bytes only.
    let mut chunks = data.chunks_exact_mut(MASKING_KEY_LEN);
    for chunk in &mut chunks {
        for (byte, k) in chunk.iter_mut().zip(key.iter()) {
            *byte ^= k;
        }
    }
    for (byte, k) in chunks.into_remainder().iter_mut().zip(key.iter()) {
        *byte ^= k;
    }
}

/// Generate a random masking key.
pub fn generate_mask() -> [u8; MASKING_KEY_LEN] {
    rand::random::<[u8; MASKING_KEY_LEN]>()
}
