//! Fixed-output hashing for fingerprints: SHA-512 truncated to the requested length

use sha2::{Digest, Sha512};

use crate::error::{CryptoError, CryptoResult};

pub const MAX_HASH_LEN: usize = 64;

/// Hash `data` and keep the first `output_len` bytes (1..=64).
pub fn hash(data: &[u8], output_len: usize) -> CryptoResult<Vec<u8>> {
    if output_len == 0 || output_len > MAX_HASH_LEN {
        return Err(CryptoError::InvalidLength {
            what: "hash output",
            expected: MAX_HASH_LEN,
            actual: output_len,
        });
    }
    let digest = Sha512::digest(data);
    Ok(digest[..output_len].to_vec())
}
