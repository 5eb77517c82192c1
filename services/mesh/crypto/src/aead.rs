//! AES-CCM encryption with 13-byte nonces.
//!
//! The network layer uses a 32-bit NetMIC for access messages and a 64-bit
//! NetMIC for control messages; the upper transport layer uses a 32-bit TransMIC
//! unless a segmented access message asks for the 64-bit one (SZMIC).

use crate::error::CryptoError;
use crate::nonce::Nonce;
use crate::Key;
use aes::Aes128;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{Aead, KeyInit, Payload};
use ccm::consts::{U13, U4, U8};
use ccm::Ccm;
use serde::{Deserialize, Serialize};
use tracing::trace;

type AesCcm32 = Ccm<Aes128, U4, U13>;
type AesCcm64 = Ccm<Aes128, U8, U13>;

/// Size of the Message Integrity Check appended by AES-CCM
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MicSize {
    /// 32-bit MIC
    Small = 4,
    /// 64-bit MIC
    Large = 8,
}

impl MicSize {
    /// MIC length in bytes
    pub fn bytes(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for MicSize {
    type Error = CryptoError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(MicSize::Small),
            8 => Ok(MicSize::Large),
            _ => Err(CryptoError::InvalidMicSize(value)),
        }
    }
}

/// Encrypts `data` with AES-CCM and returns `ciphertext || MIC`
pub fn encrypt(
    data: &[u8],
    key: &Key,
    nonce: &Nonce,
    mic_size: MicSize,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_with_aad(data, key, nonce, mic_size, &[])
}

/// Encrypts `data` with AES-CCM, authenticating `aad` as additional data.
///
/// Virtual destinations pass their Label UUID as `aad`.
pub fn encrypt_with_aad(
    data: &[u8],
    key: &Key,
    nonce: &Nonce,
    mic_size: MicSize,
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let key = GenericArray::from_slice(key);
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload { msg: data, aad };

    let sealed = match mic_size {
        MicSize::Small => AesCcm32::new(key).encrypt(nonce, payload),
        MicSize::Large => AesCcm64::new(key).encrypt(nonce, payload),
    };

    sealed.map_err(|_| CryptoError::Encrypt)
}

/// Decrypts `ciphertext || MIC`.
///
/// Returns `None` when the MIC does not match, e.g. when the wrong key was tried.
pub fn decrypt(data: &[u8], key: &Key, nonce: &Nonce, mic_size: MicSize) -> Option<Vec<u8>> {
    decrypt_with_aad(data, key, nonce, mic_size, &[])
}

/// Decrypts `ciphertext || MIC` authenticating `aad` as additional data
pub fn decrypt_with_aad(
    data: &[u8],
    key: &Key,
    nonce: &Nonce,
    mic_size: MicSize,
    aad: &[u8],
) -> Option<Vec<u8>> {
    if data.len() < mic_size.bytes() {
        return None;
    }

    let key = GenericArray::from_slice(key);
    let nonce = GenericArray::from_slice(nonce);
    let payload = Payload { msg: data, aad };

    let opened = match mic_size {
        MicSize::Small => AesCcm32::new(key).decrypt(nonce, payload),
        MicSize::Large => AesCcm64::new(key).decrypt(nonce, payload),
    };

    match opened {
        Ok(plaintext) => Some(plaintext),
        Err(_) => {
            trace!("AES-CCM MIC mismatch ({} bytes)", data.len());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Key, Nonce, Vec<u8>) {
        let key: Key = hex::decode("0953fa93e7caac9638f58820220a398e")
            .unwrap()
            .try_into()
            .unwrap();
        let nonce: Nonce = hex::decode("00800000011201000012345678")
            .unwrap()
            .try_into()
            .unwrap();
        let plaintext = hex::decode("fffd034b50057e400000010000").unwrap();
        (key, nonce, plaintext)
    }

    #[test]
    fn test_encrypt_network_sample() {
        let (key, nonce, plaintext) = sample();
        let ciphertext = encrypt(&plaintext, &key, &nonce, MicSize::Large).unwrap();
        assert_eq!(
            hex::encode(&ciphertext),
            "b5e5bfdacbaf6cb7fb6bff871f035444ce83a670df"
        );
    }

    #[test]
    fn test_decrypt_round_trip() {
        let (key, nonce, plaintext) = sample();
        let ciphertext = encrypt(&plaintext, &key, &nonce, MicSize::Large).unwrap();
        assert_eq!(
            decrypt(&ciphertext, &key, &nonce, MicSize::Large),
            Some(plaintext)
        );
    }

    #[test]
    fn test_decrypt_wrong_key_is_none() {
        let (key, nonce, plaintext) = sample();
        let ciphertext = encrypt(&plaintext, &key, &nonce, MicSize::Small).unwrap();
        let mut wrong = key;
        wrong[0] ^= 0xFF;
        assert_eq!(decrypt(&ciphertext, &wrong, &nonce, MicSize::Small), None);
    }

    #[test]
    fn test_decrypt_truncated_is_none() {
        let (key, nonce, _) = sample();
        assert_eq!(decrypt(&[0x01, 0x02], &key, &nonce, MicSize::Large), None);
        assert_eq!(decrypt(&[], &key, &nonce, MicSize::Small), None);
    }

    #[test]
    fn test_aad_is_authenticated() {
        let (key, nonce, plaintext) = sample();
        let label = [0xAB; 16];
        let ciphertext =
            encrypt_with_aad(&plaintext, &key, &nonce, MicSize::Small, &label).unwrap();
        assert_eq!(
            decrypt_with_aad(&ciphertext, &key, &nonce, MicSize::Small, &label),
            Some(plaintext)
        );
        assert_eq!(decrypt(&ciphertext, &key, &nonce, MicSize::Small), None);
    }

    #[test]
    fn test_mic_size_conversion() {
        assert_eq!(MicSize::try_from(4).unwrap(), MicSize::Small);
        assert_eq!(MicSize::try_from(8).unwrap(), MicSize::Large);
        assert!(MicSize::try_from(16).is_err());
        assert_eq!(MicSize::Large.bytes(), 8);
    }
}
