//! Network header obfuscation.
//!
//! `PECB = e(PrivacyKey, 0x0000000000 || IV Index || Privacy Random)` and the
//! CTL/TTL, SEQ and SRC fields are XORed with `PECB[0..6]`. The operation is
//! its own inverse.

use crate::primitives::calculate_ecb;
use crate::Key;

/// Length of the Privacy Random taken from the encrypted part of a network PDU
pub const PRIVACY_RANDOM_SIZE: usize = 7;

/// Length of the obfuscated CTL/TTL, SEQ and SRC fields
pub const OBFUSCATED_SIZE: usize = 6;

/// Extracts the Privacy Random: the first 7 bytes of `EncDST || EncTransportPDU || NetMIC`.
///
/// Returns `None` when fewer than 7 bytes are available.
pub fn privacy_random(encrypted: &[u8]) -> Option<[u8; PRIVACY_RANDOM_SIZE]> {
    encrypted.get(..PRIVACY_RANDOM_SIZE)?.try_into().ok()
}

fn pecb(privacy_random: &[u8; PRIVACY_RANDOM_SIZE], iv_index: u32, privacy_key: &Key) -> [u8; 16] {
    let mut privacy_plaintext = [0u8; 16];
    privacy_plaintext[5..9].copy_from_slice(&iv_index.to_be_bytes());
    privacy_plaintext[9..].copy_from_slice(privacy_random);
    calculate_ecb(&privacy_plaintext, privacy_key)
}

/// Obfuscates `CTL/TTL || SEQ || SRC`
pub fn obfuscate(
    data: &[u8; OBFUSCATED_SIZE],
    privacy_random: &[u8; PRIVACY_RANDOM_SIZE],
    iv_index: u32,
    privacy_key: &Key,
) -> [u8; OBFUSCATED_SIZE] {
    let pecb = pecb(privacy_random, iv_index, privacy_key);
    let mut out = [0u8; OBFUSCATED_SIZE];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = data[i] ^ pecb[i];
    }
    out
}

/// Recovers `CTL/TTL || SEQ || SRC` from obfuscated data
pub fn deobfuscate(
    data: &[u8; OBFUSCATED_SIZE],
    privacy_random: &[u8; PRIVACY_RANDOM_SIZE],
    iv_index: u32,
    privacy_key: &Key,
) -> [u8; OBFUSCATED_SIZE] {
    obfuscate(data, privacy_random, iv_index, privacy_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn privacy_key() -> Key {
        hex::decode("8b84eedec100067d670971dd2aa700cf")
            .unwrap()
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_obfuscate_sample_message_1() {
        let encrypted = hex::decode("b5e5bfdacbaf6cb7fb6bff871f035444ce83a670df").unwrap();
        let random = privacy_random(&encrypted).unwrap();
        assert_eq!(hex::encode(random), "b5e5bfdacbaf6c");

        // CTL=1 TTL=0, SEQ=000001, SRC=1201
        let header = [0x80, 0x00, 0x00, 0x01, 0x12, 0x01];
        let obfuscated = obfuscate(&header, &random, 0x12345678, &privacy_key());
        assert_eq!(hex::encode(obfuscated), "eca487516765");
        assert_eq!(
            deobfuscate(&obfuscated, &random, 0x12345678, &privacy_key()),
            header
        );
    }

    #[test]
    fn test_privacy_random_too_short() {
        assert!(privacy_random(&[0u8; 6]).is_none());
        assert!(privacy_random(&[0u8; 7]).is_some());
    }

    proptest::proptest! {
        #[test]
        fn prop_deobfuscate_inverts_obfuscate(
            header in proptest::array::uniform6(proptest::num::u8::ANY),
            random in proptest::array::uniform7(proptest::num::u8::ANY),
            iv_index in proptest::num::u32::ANY,
        ) {
            let key = privacy_key();
            let masked = obfuscate(&header, &random, iv_index, &key);
            proptest::prop_assert_eq!(deobfuscate(&masked, &random, iv_index, &key), header);
        }
    }
}
