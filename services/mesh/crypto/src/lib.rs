//! Security toolbox for the Bluetooth Mesh network and transport layers.
//!
//! This crate provides the key derivation functions, the AES-CCM engine and the
//! header obfuscation used for every mesh PDU. All functions are pure: no state,
//! no I/O, safe to call from any number of tasks at once.
//!
//! ## Functions
//!
//! - **Salt generation**: `s1` (AES-CMAC, zero key) and `s2` (HMAC-SHA-256, zero key)
//! - **Key derivation**: `k1`..`k5` as defined by the Mesh Profile
//! - **Network key derivatives**: NID, encryption/privacy keys, Network ID,
//!   identity, beacon and private beacon keys
//! - **AEAD**: AES-CCM with 13-byte nonces and 32 or 64-bit MICs
//! - **Obfuscation**: AES-ECB based CTL/TTL/SEQ/SRC masking
//! - **Beacons**: Secure Network beacon CMAC and Private beacon CCM
//!
//! ## Network PDU protection
//!
//! ```text
//! +-----------+-------------------------+-----------------------------+
//! | IVI | NID | CTL TTL SEQ SRC         | DST TransportPDU  NetMIC    |
//! +-----------+-------------------------+-----------------------------+
//! | clear     | obfuscated (PECB[0..6]) | AES-CCM(EncryptionKey)      |
//! +-----------+-------------------------+-----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod beacon;
pub mod derivatives;
pub mod error;
pub mod nonce;
pub mod obfuscation;
pub mod primitives;

/// 128-bit AES key as used throughout the mesh security layer
pub type Key = [u8; KEY_SIZE];

/// Size of every mesh key in bytes
pub const KEY_SIZE: usize = 16;

/// Converts a byte slice into a [`Key`], rejecting anything but 16 bytes
pub fn key_from_slice(bytes: &[u8]) -> Result<Key, CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))
}

pub use aead::{decrypt, decrypt_with_aad, encrypt, encrypt_with_aad, MicSize};
pub use beacon::{
    authenticate, decode_and_authenticate, encode_private_beacon, secure_beacon_auth,
    PRIVATE_BEACON_SIZE, SECURE_BEACON_SIZE,
};
pub use derivatives::{calculate_key_derivatives, Credentials, KeyDerivatives};
pub use error::CryptoError;
pub use nonce::{application_nonce, device_nonce, network_nonce, proxy_nonce, Nonce, NONCE_SIZE};
pub use obfuscation::{deobfuscate, obfuscate, privacy_random, PRIVACY_RANDOM_SIZE};
pub use primitives::{
    aes_cmac, calculate_ecb, create_virtual_address, k1, k2, k3, k4, k5, s1, s2,
};
