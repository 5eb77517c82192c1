//! Bearer-facing wire formats for Bluetooth Mesh.
//!
//! This crate turns mesh messages into bytes a bearer can carry and back:
//! network PDUs secured with a network key, beacons, and the Proxy Protocol
//! that splits both over a connection with a limited MTU.
//!
//! ## Features
//!
//! - **Proxy Protocol**: SAR segmentation and per-connection reassembly
//! - **Network PDUs**: encryption, obfuscation and NID based key lookup
//! - **Beacons**: Secure Network, Private and Unprovisioned Device beacons
//! - **Zero-Copy Output**: PDUs are returned as `Bytes`
//!
//! ## Proxy PDU
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 prefix            | SAR (2 bits) | type (6)    |
//! +----------------------+----------------------------+
//! | data                 | network PDU, beacon,       |
//! |                      | proxy config, provisioning |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod beacon;
pub mod error;
pub mod network;
pub mod proxy;

// Re-export main types
pub use beacon::{
    BeaconFlags, MeshBeacon, PrivateBeacon, SecureNetworkBeacon, UnprovisionedDeviceBeacon,
};
pub use error::WireError;
pub use network::{NetworkPdu, MAX_NETWORK_PDU_SIZE, MAX_TTL};
pub use proxy::{prefix, PduType, ProxyPdu, ProxyProtocolHandler, Sar};
