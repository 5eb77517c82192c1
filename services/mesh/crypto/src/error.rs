//! Crypto error types.

use thiserror::Error;

/// Errors raised by the security toolbox.
///
/// A MIC mismatch during decryption is not an error: it is reported as `None`
/// by [`crate::decrypt`], since trying the wrong key is routine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is not 128 bits long
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// MIC size other than 4 or 8 bytes
    #[error("invalid MIC size: {0}")]
    InvalidMicSize(usize),

    /// Plaintext too long for the AES-CCM length field
    #[error("AES-CCM encryption failed")]
    Encrypt,
}
