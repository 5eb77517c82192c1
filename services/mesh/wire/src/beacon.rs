//! Mesh beacons.
//!
//! Beacons travel either on the advertising bearer or inside a Proxy PDU of
//! type [`crate::PduType::MeshBeacon`]. Parsing only checks the structure;
//! authentication needs the network's beacon keys.

use crate::error::WireError;
use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use mesh_crypto::{
    authenticate, decode_and_authenticate, encode_private_beacon, secure_beacon_auth, Key,
    PRIVATE_BEACON_SIZE, SECURE_BEACON_SIZE,
};
use serde::{Deserialize, Serialize};

const UNPROVISIONED_DEVICE: u8 = 0x00;
const SECURE_NETWORK: u8 = 0x01;
const MESH_PRIVATE: u8 = 0x02;

bitflags! {
    /// Flags carried by Secure Network and Private beacons
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BeaconFlags: u8 {
        /// Key Refresh phase 2 in progress
        const KEY_REFRESH = 1 << 0;
        /// IV Update in progress
        const IV_UPDATE = 1 << 1;
    }
}

/// Secure Network beacon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureNetworkBeacon {
    /// Key Refresh and IV Update flags
    pub flags: BeaconFlags,
    /// Network ID of the key that authenticated the beacon
    pub network_id: [u8; 8],
    /// Current IV index of the network
    pub iv_index: u32,
    /// 64-bit authentication value
    pub auth: [u8; 8],
}

impl SecureNetworkBeacon {
    /// Builds and authenticates a Secure Network beacon
    pub fn new(flags: BeaconFlags, network_id: [u8; 8], iv_index: u32, beacon_key: &Key) -> Self {
        let auth = secure_beacon_auth(flags.bits(), &network_id, iv_index, beacon_key);
        Self {
            flags,
            network_id,
            iv_index,
            auth,
        }
    }

    /// Serializes the beacon including the beacon type byte
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SECURE_BEACON_SIZE);
        buf.put_u8(SECURE_NETWORK);
        buf.put_u8(self.flags.bits());
        buf.put_slice(&self.network_id);
        buf.put_u32(self.iv_index);
        buf.put_slice(&self.auth);
        buf.freeze()
    }

    /// Checks the authentication value against a beacon key
    pub fn verify(&self, beacon_key: &Key) -> bool {
        authenticate(&self.to_bytes(), beacon_key)
    }
}

/// Mesh Private beacon, still obfuscated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateBeacon {
    raw: [u8; PRIVATE_BEACON_SIZE],
}

impl PrivateBeacon {
    /// Builds a Private beacon from a 13-byte random value
    pub fn new(
        flags: BeaconFlags,
        iv_index: u32,
        random: &[u8; 13],
        private_beacon_key: &Key,
    ) -> Result<Self, WireError> {
        let raw = encode_private_beacon(flags.bits(), iv_index, random, private_beacon_key)?;
        Ok(Self { raw })
    }

    /// Random value used as the CCM nonce
    pub fn random(&self) -> &[u8] {
        &self.raw[1..14]
    }

    /// Serializes the beacon including the beacon type byte
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.raw)
    }

    /// Recovers flags and IV index, or `None` when the key does not match
    pub fn open(&self, private_beacon_key: &Key) -> Option<(BeaconFlags, u32)> {
        let (flags, iv_index) = decode_and_authenticate(&self.raw, private_beacon_key)?;
        Some((BeaconFlags::from_bits_truncate(flags), iv_index))
    }
}

/// Unprovisioned Device beacon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnprovisionedDeviceBeacon {
    /// Device UUID
    pub device_uuid: [u8; 16],
    /// OOB information bit field
    pub oob_information: u16,
    /// Hash of the URI advertised by the device, when present
    pub uri_hash: Option<[u8; 4]>,
}

/// Any beacon a proxy or advertiser can deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshBeacon {
    /// Device waiting to be provisioned
    UnprovisionedDevice(UnprovisionedDeviceBeacon),
    /// Secure Network beacon
    SecureNetwork(SecureNetworkBeacon),
    /// Mesh Private beacon
    Private(PrivateBeacon),
}

impl MeshBeacon {
    /// Parses a beacon starting with its type byte
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        let (&beacon_type, body) = data.split_first().ok_or(WireError::Malformed {
            expected: 1,
            actual: 0,
        })?;

        match beacon_type {
            UNPROVISIONED_DEVICE => {
                if body.len() != 18 && body.len() != 22 {
                    return Err(WireError::Malformed {
                        expected: 19,
                        actual: data.len(),
                    });
                }
                let mut device_uuid = [0u8; 16];
                device_uuid.copy_from_slice(&body[..16]);
                let oob_information = u16::from_be_bytes([body[16], body[17]]);
                let uri_hash = body.get(18..22).and_then(|h| h.try_into().ok());
                Ok(MeshBeacon::UnprovisionedDevice(UnprovisionedDeviceBeacon {
                    device_uuid,
                    oob_information,
                    uri_hash,
                }))
            }
            SECURE_NETWORK => {
                if data.len() != SECURE_BEACON_SIZE {
                    return Err(WireError::Malformed {
                        expected: SECURE_BEACON_SIZE,
                        actual: data.len(),
                    });
                }
                let mut network_id = [0u8; 8];
                network_id.copy_from_slice(&body[1..9]);
                let mut auth = [0u8; 8];
                auth.copy_from_slice(&body[13..21]);
                Ok(MeshBeacon::SecureNetwork(SecureNetworkBeacon {
                    flags: BeaconFlags::from_bits_truncate(body[0]),
                    network_id,
                    iv_index: u32::from_be_bytes([body[9], body[10], body[11], body[12]]),
                    auth,
                }))
            }
            MESH_PRIVATE => {
                let raw: [u8; PRIVATE_BEACON_SIZE] =
                    data.try_into().map_err(|_| WireError::Malformed {
                        expected: PRIVATE_BEACON_SIZE,
                        actual: data.len(),
                    })?;
                Ok(MeshBeacon::Private(PrivateBeacon { raw }))
            }
            other => Err(WireError::UnknownBeaconType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "01003ecaff672f673370123456788ea261582f364f6f";

    fn beacon_key() -> Key {
        hex::decode("5423d967da639a99cb02231a83f7d254")
            .unwrap()
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_parse_and_verify_secure_beacon() {
        let raw = hex::decode(SAMPLE).unwrap();
        let MeshBeacon::SecureNetwork(beacon) = MeshBeacon::parse(&raw).unwrap() else {
            panic!("expected a secure network beacon");
        };
        assert_eq!(beacon.flags, BeaconFlags::empty());
        assert_eq!(hex::encode(beacon.network_id), "3ecaff672f673370");
        assert_eq!(beacon.iv_index, 0x12345678);
        assert!(beacon.verify(&beacon_key()));
        assert!(!beacon.verify(&[0u8; 16]));
    }

    #[test]
    fn test_build_secure_beacon() {
        let network_id: [u8; 8] = hex::decode("3ecaff672f673370").unwrap().try_into().unwrap();
        let beacon =
            SecureNetworkBeacon::new(BeaconFlags::empty(), network_id, 0x12345678, &beacon_key());
        assert_eq!(hex::encode(beacon.to_bytes()), SAMPLE);
    }

    #[test]
    fn test_private_beacon_through_parse() {
        let key = [0x7A; 16];
        let beacon = PrivateBeacon::new(BeaconFlags::IV_UPDATE, 0x0102, &[0x11; 13], &key).unwrap();
        let MeshBeacon::Private(parsed) = MeshBeacon::parse(&beacon.to_bytes()).unwrap() else {
            panic!("expected a private beacon");
        };
        assert_eq!(parsed.random(), &[0x11; 13]);
        assert_eq!(parsed.open(&key), Some((BeaconFlags::IV_UPDATE, 0x0102)));
        assert_eq!(parsed.open(&[0x7B; 16]), None);
    }

    #[test]
    fn test_parse_unprovisioned_device_beacon() {
        let mut raw = vec![0x00];
        raw.extend_from_slice(&[0xAB; 16]);
        raw.extend_from_slice(&[0x40, 0x20]);
        let MeshBeacon::UnprovisionedDevice(beacon) = MeshBeacon::parse(&raw).unwrap() else {
            panic!("expected an unprovisioned device beacon");
        };
        assert_eq!(beacon.oob_information, 0x4020);
        assert_eq!(beacon.uri_hash, None);

        raw.extend_from_slice(&[1, 2, 3, 4]);
        let MeshBeacon::UnprovisionedDevice(beacon) = MeshBeacon::parse(&raw).unwrap() else {
            panic!("expected an unprovisioned device beacon");
        };
        assert_eq!(beacon.uri_hash, Some([1, 2, 3, 4]));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(MeshBeacon::parse(&[]).is_err());
        assert!(matches!(
            MeshBeacon::parse(&[0x07, 0x00]),
            Err(WireError::UnknownBeaconType(0x07))
        ));
        assert!(matches!(
            MeshBeacon::parse(&[0x01, 0x00, 0x01]),
            Err(WireError::Malformed { .. })
        ));
    }
}
