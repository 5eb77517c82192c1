//! Bearer error types.

use mesh_wire::WireError;
use thiserror::Error;

/// Bearer errors
#[derive(Error, Debug)]
pub enum BearerError {
    /// Operation needs an open bearer
    #[error("bearer is closed")]
    Closed,

    /// The remote end went away
    #[error("bearer disconnected")]
    Disconnected,

    /// PDU longer than the bearer MTU
    #[error("pdu of {len} bytes exceeds mtu {mtu}")]
    PduTooLarge {
        /// PDU length
        len: usize,
        /// Bearer MTU
        mtu: usize,
    },

    /// Segmentation failed
    #[error(transparent)]
    Wire(#[from] WireError),
}
