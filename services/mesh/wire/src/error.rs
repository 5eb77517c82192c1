//! Wire protocol error types.

use mesh_crypto::CryptoError;
use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// MTU too small to carry the prefix byte and at least one payload byte
    #[error("invalid mtu: {0}")]
    InvalidMtu(usize),

    /// Unknown Proxy PDU type
    #[error("unknown pdu type {0:#04x}")]
    UnknownPduType(u8),

    /// Unknown beacon type
    #[error("unknown beacon type {0:#04x}")]
    UnknownBeaconType(u8),

    /// TTL outside 0..=127
    #[error("invalid ttl: {0}")]
    InvalidTtl(u8),

    /// Sequence number wider than 24 bits
    #[error("invalid sequence number: {0:#x}")]
    InvalidSequence(u32),

    /// PDU does not fit the bearer
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Malformed PDU structure
    #[error("malformed pdu: expected {expected} bytes, got {actual}")]
    Malformed {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Underlying crypto failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
