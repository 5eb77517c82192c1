//! Network PDU encoding and decoding.
//!
//! ```text
//! +-----+-----+-----+-----+-------+-------+-------+------------------+--------+
//! | IVI | NID | CTL | TTL | SEQ   | SRC   | DST   | TransportPDU     | NetMIC |
//! | 1b  | 7b  | 1b  | 7b  | 24b   | 16b   | 16b   | 1..16 bytes      | 32/64b |
//! +-----+-----+-----+-----+-------+-------+-------+------------------+--------+
//!             |<-------- obfuscated ------->|<------------ encrypted --------->|
//! ```

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use mesh_crypto::{
    decrypt, deobfuscate, encrypt, network_nonce, obfuscate, privacy_random, KeyDerivatives,
    MicSize,
};
use tracing::{debug, trace};

/// Largest network PDU carried by the advertising bearer
pub const MAX_NETWORK_PDU_SIZE: usize = 29;

/// Largest valid TTL
pub const MAX_TTL: u8 = 0x7F;

const HEADER_SIZE: usize = 9;

/// A decrypted network PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPdu {
    /// IV index used to secure the PDU
    pub iv_index: u32,
    /// Network identifier of the key that secured the PDU
    pub nid: u8,
    /// Whether the PDU carries a transport control message
    pub ctl: bool,
    /// Time To Live
    pub ttl: u8,
    /// 24-bit sequence number
    pub seq: u32,
    /// Unicast source address
    pub src: u16,
    /// Destination address
    pub dst: u16,
    /// Lower transport PDU
    pub transport_pdu: Bytes,
}

impl NetworkPdu {
    /// IVI bit for this PDU's IV index
    pub fn ivi(&self) -> u8 {
        (self.iv_index & 1) as u8
    }

    /// NetMIC size: 64 bits for control messages, 32 bits otherwise
    pub fn mic_size(&self) -> MicSize {
        if self.ctl {
            MicSize::Large
        } else {
            MicSize::Small
        }
    }

    /// Encrypts and obfuscates this PDU with the given network key material.
    ///
    /// The NID byte is taken from `keys`; [`NetworkPdu::nid`] is ignored.
    pub fn encode(&self, keys: &KeyDerivatives) -> Result<Bytes, WireError> {
        if self.ttl > MAX_TTL {
            return Err(WireError::InvalidTtl(self.ttl));
        }
        if self.seq > 0x00FF_FFFF {
            return Err(WireError::InvalidSequence(self.seq));
        }
        let size = HEADER_SIZE + self.transport_pdu.len() + self.mic_size().bytes();
        if size > MAX_NETWORK_PDU_SIZE || self.transport_pdu.is_empty() {
            return Err(WireError::Size(size));
        }

        let nonce = network_nonce(self.ctl, self.ttl, self.seq, self.src, self.iv_index);
        let mut plaintext = BytesMut::with_capacity(2 + self.transport_pdu.len());
        plaintext.put_u16(self.dst);
        plaintext.put_slice(&self.transport_pdu);
        let encrypted = encrypt(&plaintext, &keys.encryption_key, &nonce, self.mic_size())?;

        let random = privacy_random(&encrypted).ok_or(WireError::Size(encrypted.len()))?;
        let mut header = [0u8; 6];
        header[0] = ((self.ctl as u8) << 7) | self.ttl;
        header[1..4].copy_from_slice(&self.seq.to_be_bytes()[1..]);
        header[4..6].copy_from_slice(&self.src.to_be_bytes());
        let obfuscated = obfuscate(&header, &random, self.iv_index, &keys.privacy_key);

        let mut pdu = BytesMut::with_capacity(size);
        pdu.put_u8((self.ivi() << 7) | (keys.nid & 0x7F));
        pdu.put_slice(&obfuscated);
        pdu.put_slice(&encrypted);
        Ok(pdu.freeze())
    }

    /// Decodes a received network PDU.
    ///
    /// `iv_index` is the receiver's current IV index; a PDU whose IVI bit does
    /// not match it is assumed to use `iv_index - 1`. Every key whose NID
    /// matches is tried in turn. Returns `None` when no key authenticates the
    /// PDU or the PDU is malformed.
    pub fn decode<'a, I>(pdu: &[u8], keys: I, iv_index: u32) -> Option<NetworkPdu>
    where
        I: IntoIterator<Item = &'a KeyDerivatives>,
    {
        if pdu.len() < HEADER_SIZE + 1 + MicSize::Small.bytes() || pdu.len() > MAX_NETWORK_PDU_SIZE {
            trace!("Network PDU of invalid size {}", pdu.len());
            return None;
        }

        let ivi = u32::from(pdu[0] >> 7);
        let nid = pdu[0] & 0x7F;
        let iv_index = if iv_index & 1 == ivi {
            iv_index
        } else {
            iv_index.checked_sub(1)?
        };

        let encrypted = &pdu[7..];
        let random = privacy_random(encrypted)?;
        let obfuscated: [u8; 6] = pdu[1..7].try_into().ok()?;

        for keys in keys.into_iter().filter(|k| k.nid == nid) {
            let header = deobfuscate(&obfuscated, &random, iv_index, &keys.privacy_key);
            let ctl = header[0] & 0x80 != 0;
            let ttl = header[0] & 0x7F;
            let seq = u32::from_be_bytes([0, header[1], header[2], header[3]]);
            let src = u16::from_be_bytes([header[4], header[5]]);
            if src == 0 || src > 0x7FFF {
                continue;
            }

            let mic_size = if ctl { MicSize::Large } else { MicSize::Small };
            let nonce = network_nonce(ctl, ttl, seq, src, iv_index);
            let Some(plaintext) = decrypt(encrypted, &keys.encryption_key, &nonce, mic_size) else {
                continue;
            };
            if plaintext.len() < 3 {
                continue;
            }

            debug!(
                "Decoded network PDU src={:#06x} dst={:#06x} seq={} ctl={}",
                src,
                u16::from_be_bytes([plaintext[0], plaintext[1]]),
                seq,
                ctl
            );
            return Some(NetworkPdu {
                iv_index,
                nid,
                ctl,
                ttl,
                seq,
                src,
                dst: u16::from_be_bytes([plaintext[0], plaintext[1]]),
                transport_pdu: Bytes::copy_from_slice(&plaintext[2..]),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_crypto::{calculate_key_derivatives, Credentials};

    const MESSAGE_1: &str = "68eca487516765b5e5bfdacbaf6cb7fb6bff871f035444ce83a670df";

    fn keys() -> KeyDerivatives {
        let net_key: [u8; 16] = hex::decode("7dd7364cd842ad18c17c2b820c84c3d6")
            .unwrap()
            .try_into()
            .unwrap();
        calculate_key_derivatives(&net_key, Credentials::ManagedFlooding)
    }

    fn message_1() -> NetworkPdu {
        NetworkPdu {
            iv_index: 0x12345678,
            nid: 0x68,
            ctl: true,
            ttl: 0,
            seq: 1,
            src: 0x1201,
            dst: 0xfffd,
            transport_pdu: Bytes::from(hex::decode("034b50057e400000010000").unwrap()),
        }
    }

    #[test]
    fn test_encode_sample_message_1() {
        let encoded = message_1().encode(&keys()).unwrap();
        assert_eq!(hex::encode(&encoded), MESSAGE_1);
    }

    #[test]
    fn test_decode_sample_message_1() {
        let raw = hex::decode(MESSAGE_1).unwrap();
        let decoded = NetworkPdu::decode(&raw, [&keys()], 0x12345678).unwrap();
        assert_eq!(decoded, message_1());
    }

    #[test]
    fn test_decode_with_previous_iv_index() {
        let raw = hex::decode(MESSAGE_1).unwrap();
        // IVI bit 0 while the receiver is already at 0x12345679
        let decoded = NetworkPdu::decode(&raw, [&keys()], 0x12345679).unwrap();
        assert_eq!(decoded.iv_index, 0x12345678);
    }

    #[test]
    fn test_decode_without_matching_key() {
        let raw = hex::decode(MESSAGE_1).unwrap();
        let other = calculate_key_derivatives(&[0x55; 16], Credentials::ManagedFlooding);
        assert_eq!(NetworkPdu::decode(&raw, [&other], 0x12345678), None);
        assert_eq!(
            NetworkPdu::decode(&raw, Vec::<&KeyDerivatives>::new(), 0x12345678),
            None
        );
    }

    #[test]
    fn test_decode_rejects_tampered_pdu() {
        let mut raw = hex::decode(MESSAGE_1).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert_eq!(NetworkPdu::decode(&raw, [&keys()], 0x12345678), None);
        assert_eq!(NetworkPdu::decode(&raw[..10], [&keys()], 0x12345678), None);
    }

    #[test]
    fn test_access_pdu_round_trip() {
        let pdu = NetworkPdu {
            iv_index: 0x00000001,
            nid: 0x68,
            ctl: false,
            ttl: 5,
            seq: 0x3129ab,
            src: 0x0003,
            dst: 0xc105,
            transport_pdu: Bytes::from_static(&[0x66, 0x01, 0x02, 0x03]),
        };
        let encoded = pdu.encode(&keys()).unwrap();
        assert_eq!(encoded[0], 0x80 | 0x68);
        assert_eq!(NetworkPdu::decode(&encoded, [&keys()], 1), Some(pdu));
    }

    #[test]
    fn test_encode_validates_fields() {
        let mut pdu = message_1();
        pdu.ttl = 0x80;
        assert_eq!(pdu.encode(&keys()), Err(WireError::InvalidTtl(0x80)));

        let mut pdu = message_1();
        pdu.transport_pdu = Bytes::from(vec![0u8; 13]);
        assert!(matches!(pdu.encode(&keys()), Err(WireError::Size(_))));
    }
}
