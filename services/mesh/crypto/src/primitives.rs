//! Salt generation and key derivation functions.
//!
//! `s1`, `k1`..`k4` are built on AES-CMAC, `s2` and `k5` on HMAC-SHA-256.
//! The fixed salts (`smk2`, `smk3`, ...) are computed once on first use.

use crate::Key;
use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use hmac::Hmac;
use once_cell::sync::Lazy;
use sha2::Sha256;

pub(crate) static SMK2: Lazy<Key> = Lazy::new(|| s1(b"smk2"));
pub(crate) static SMK3: Lazy<Key> = Lazy::new(|| s1(b"smk3"));
pub(crate) static SMK4: Lazy<Key> = Lazy::new(|| s1(b"smk4"));
pub(crate) static VTAD: Lazy<Key> = Lazy::new(|| s1(b"vtad"));

/// AES-CMAC over the concatenation of `parts`
pub fn aes_cmac(key: &Key, parts: &[&[u8]]) -> Key {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = match <Hmac<Sha256> as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Single-block AES-128 encryption (ECB)
pub fn calculate_ecb(plaintext: &[u8; 16], key: &Key) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut block = GenericArray::clone_from_slice(plaintext);
    cipher.encrypt_block(&mut block);
    block.into()
}

/// Salt generation function s1: AES-CMAC with a zero key
pub fn s1(message: &[u8]) -> Key {
    aes_cmac(&[0u8; 16], &[message])
}

/// Salt generation function s2: HMAC-SHA-256 with a 256-bit zero key
pub fn s2(message: &[u8]) -> [u8; 32] {
    hmac_sha256(&[0u8; 32], &[message])
}

/// Key derivation function k1
pub fn k1(n: &[u8], salt: &Key, p: &[u8]) -> Key {
    let t = aes_cmac(salt, &[n]);
    aes_cmac(&t, &[p])
}

/// Network key material derivation function k2.
///
/// Returns `(nid, encryption_key, privacy_key)`.
pub fn k2(n: &Key, p: &[u8]) -> (u8, Key, Key) {
    let t = aes_cmac(&SMK2, &[n]);
    let t1 = aes_cmac(&t, &[p, &[0x01]]);
    let t2 = aes_cmac(&t, &[&t1, p, &[0x02]]);
    let t3 = aes_cmac(&t, &[&t2, p, &[0x03]]);
    (t1[15] & 0x7F, t2, t3)
}

/// Derivation function k3, used for the 64-bit Network ID
pub fn k3(n: &Key) -> [u8; 8] {
    let t = aes_cmac(&SMK3, &[n]);
    let result = aes_cmac(&t, &[b"id64", &[0x01]]);
    let mut id = [0u8; 8];
    id.copy_from_slice(&result[8..]);
    id
}

/// Derivation function k4, used for the 6-bit application key identifier (AID)
pub fn k4(n: &Key) -> u8 {
    let t = aes_cmac(&SMK4, &[n]);
    let result = aes_cmac(&t, &[b"id6", &[0x01]]);
    result[15] & 0x3F
}

/// Derivation function k5 (HMAC-SHA-256), used by the BTM_ECDH_P256_HMAC_SHA256_AES_CCM
/// provisioning algorithm
pub fn k5(n: &[u8], salt: &[u8; 32], p: &[u8]) -> [u8; 32] {
    let t = hmac_sha256(salt, &[n]);
    hmac_sha256(&t, &[p])
}

/// Computes the 16-bit virtual address of a Label UUID.
///
/// The low 14 bits are the CMAC hash, the top two bits are fixed to `10`.
pub fn create_virtual_address(label_uuid: &[u8; 16]) -> u16 {
    let hash = aes_cmac(&VTAD, &[label_uuid]);
    0x8000 | (u16::from_be_bytes([hash[14], hash[15]]) & 0x3FFF)
}
