//! Foundation model error types.

use mesh_model::NetworkError;
use thiserror::Error;

/// Errors raised while encoding, parsing or handling configuration messages
#[derive(Error, Debug)]
pub enum FoundationError {
    /// Access payload too short to hold an opcode
    #[error("empty access payload")]
    Empty,

    /// Opcode not handled by the configuration client
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u32),

    /// Parameters of the wrong length
    #[error("malformed {opcode:#06x}: expected {expected} parameter bytes, got {actual}")]
    Malformed {
        /// Message opcode
        opcode: u32,
        /// Expected parameter length
        expected: usize,
        /// Actual parameter length
        actual: usize,
    },

    /// A request reached the client, or a field holds a prohibited value
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The source address does not belong to any node
    #[error("no node at {0:#06x}")]
    UnknownNode(u16),

    /// Network model rejected the change
    #[error(transparent)]
    Network(#[from] NetworkError),
}
