//! Beacon authentication.
//!
//! ```text
//! Secure Network beacon (22 bytes)
//! +------+-------+------------+----------+-----------+
//! | 0x01 | flags | NetworkID  | IV Index | AuthValue |
//! | 1    | 1     | 8          | 4        | 8         |
//! +------+-------+------------+----------+-----------+
//!
//! Private beacon (27 bytes)
//! +------+--------+------------------------+---------+
//! | 0x02 | Random | Obfuscated flags + IV  | AuthTag |
//! | 1    | 13     | 5                      | 8       |
//! +------+--------+------------------------+---------+
//! ```
//!
//! The Private beacon obfuscation and tag are exactly AES-CCM with the random
//! value as nonce, a 64-bit MIC and no additional data.

use crate::aead::{decrypt, encrypt, MicSize};
use crate::error::CryptoError;
use crate::primitives::aes_cmac;
use crate::Key;
use tracing::trace;

/// Size of a Secure Network beacon including the beacon type
pub const SECURE_BEACON_SIZE: usize = 22;

/// Size of a Private beacon including the beacon type
pub const PRIVATE_BEACON_SIZE: usize = 27;

const SECURE_BEACON_TYPE: u8 = 0x01;
const PRIVATE_BEACON_TYPE: u8 = 0x02;

/// Computes the 64-bit authentication value of a Secure Network beacon
pub fn secure_beacon_auth(flags: u8, network_id: &[u8; 8], iv_index: u32, beacon_key: &Key) -> [u8; 8] {
    let cmac = aes_cmac(beacon_key, &[&[flags], network_id, &iv_index.to_be_bytes()]);
    let mut auth = [0u8; 8];
    auth.copy_from_slice(&cmac[..8]);
    auth
}

/// Verifies a Secure Network beacon against a beacon key.
///
/// Returns `false` for beacons of the wrong type or size.
pub fn authenticate(beacon: &[u8], beacon_key: &Key) -> bool {
    if beacon.len() != SECURE_BEACON_SIZE || beacon[0] != SECURE_BEACON_TYPE {
        return false;
    }
    let flags = beacon[1];
    let mut network_id = [0u8; 8];
    network_id.copy_from_slice(&beacon[2..10]);
    let iv_index = u32::from_be_bytes([beacon[10], beacon[11], beacon[12], beacon[13]]);

    let expected = secure_beacon_auth(flags, &network_id, iv_index, beacon_key);
    let matches = expected[..] == beacon[14..22];
    if !matches {
        trace!("Secure Network beacon authentication failed");
    }
    matches
}

/// Opens a Private beacon with a private beacon key.
///
/// Returns `(flags, iv_index)`, or `None` when the beacon is malformed or the
/// tag does not match.
pub fn decode_and_authenticate(beacon: &[u8], private_beacon_key: &Key) -> Option<(u8, u32)> {
    if beacon.len() != PRIVATE_BEACON_SIZE || beacon[0] != PRIVATE_BEACON_TYPE {
        return None;
    }
    let nonce: [u8; 13] = beacon[1..14].try_into().ok()?;
    let data = decrypt(&beacon[14..], private_beacon_key, &nonce, MicSize::Large)?;
    if data.len() != 5 {
        return None;
    }
    let iv_index = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Some((data[0], iv_index))
}

/// Builds a Private beacon for the given flags and IV index
pub fn encode_private_beacon(
    flags: u8,
    iv_index: u32,
    random: &[u8; 13],
    private_beacon_key: &Key,
) -> Result<[u8; PRIVATE_BEACON_SIZE], CryptoError> {
    let mut data = [0u8; 5];
    data[0] = flags;
    data[1..].copy_from_slice(&iv_index.to_be_bytes());

    let sealed = encrypt(&data, private_beacon_key, random, MicSize::Large)?;

    let mut beacon = [0u8; PRIVATE_BEACON_SIZE];
    beacon[0] = PRIVATE_BEACON_TYPE;
    beacon[1..14].copy_from_slice(random);
    beacon[14..].copy_from_slice(&sealed);
    Ok(beacon)
}
