use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Failures of the primitive layer.
///
/// Messages describe what went wrong, never the bytes involved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("entropy source unavailable")]
    Entropy,

    #[error("key derivation failed: {0}")]
    Derivation(String),

    #[error("authenticated decryption failed: wrong key or corrupted data")]
    AuthenticatedDecrypt,

    #[error("sealed box could not be opened")]
    SealOpen,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("{what} has wrong length: {actual} bytes (expected {expected})")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("encoding error: {0}")]
    Encoding(String),
}
