//! Network key derivatives.
//!
//! Every network key yields the material used by the network layer (NID,
//! encryption and privacy keys), by Secure Network and Private beacons, and by
//! Node Identity advertising. Managed flooding and directed flooding use
//! different `k2` parameters and therefore different NID/encryption/privacy
//! triples; the remaining keys are shared.

use crate::primitives::{k1, k2, k3, s1};
use crate::Key;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static NKIK: Lazy<Key> = Lazy::new(|| s1(b"nkik"));
static NKBK: Lazy<Key> = Lazy::new(|| s1(b"nkbk"));
static NKPK: Lazy<Key> = Lazy::new(|| s1(b"nkpk"));

const ID128: &[u8] = b"id128\x01";

/// Security credentials the derivatives are computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Credentials {
    /// Managed flooding security credentials (`P = 0x00`)
    #[default]
    ManagedFlooding,
    /// Directed flooding security credentials (`P = 0x02`)
    DirectedFlooding,
}

impl Credentials {
    fn k2_parameter(self) -> &'static [u8] {
        match self {
            Credentials::ManagedFlooding => &[0x00],
            Credentials::DirectedFlooding => &[0x02],
        }
    }
}

/// Keys and identifiers derived from one network key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivatives {
    /// 7-bit Network Identifier
    pub nid: u8,
    /// Network layer encryption key
    pub encryption_key: Key,
    /// Header obfuscation key
    pub privacy_key: Key,
    /// 64-bit public Network ID
    pub network_id: [u8; 8],
    /// Node Identity key
    pub identity_key: Key,
    /// Secure Network beacon key
    pub beacon_key: Key,
    /// Private beacon key
    pub private_beacon_key: Key,
}

/// Computes all derivatives of `key` for the given credentials
pub fn calculate_key_derivatives(key: &Key, credentials: Credentials) -> KeyDerivatives {
    let (nid, encryption_key, privacy_key) = k2(key, credentials.k2_parameter());
    KeyDerivatives {
        nid,
        encryption_key,
        privacy_key,
        network_id: k3(key),
        identity_key: k1(key, &NKIK, ID128),
        beacon_key: k1(key, &NKBK, ID128),
        private_beacon_key: k1(key, &NKPK, ID128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net_key() -> Key {
        hex::decode("7dd7364cd842ad18c17c2b820c84c3d6")
            .unwrap()
            .try_into()
            .unwrap()
    }

    #[test]
    fn test_managed_flooding_derivatives() {
        let derivatives = calculate_key_derivatives(&net_key(), Credentials::ManagedFlooding);
        assert_eq!(derivatives.nid, 0x68);
        assert_eq!(
            hex::encode(derivatives.encryption_key),
            "0953fa93e7caac9638f58820220a398e"
        );
        assert_eq!(
            hex::encode(derivatives.privacy_key),
            "8b84eedec100067d670971dd2aa700cf"
        );
        assert_eq!(hex::encode(derivatives.network_id), "3ecaff672f673370");
        assert_eq!(
            hex::encode(derivatives.identity_key),
            "84396c435ac48560b5965385253e210c"
        );
        assert_eq!(
            hex::encode(derivatives.beacon_key),
            "5423d967da639a99cb02231a83f7d254"
        );
    }

    #[test]
    fn test_directed_flooding_changes_network_triple_only() {
        let managed = calculate_key_derivatives(&net_key(), Credentials::ManagedFlooding);
        let directed = calculate_key_derivatives(&net_key(), Credentials::DirectedFlooding);

        assert_ne!(managed.encryption_key, directed.encryption_key);
        assert_ne!(managed.privacy_key, directed.privacy_key);
        assert_eq!(managed.network_id, directed.network_id);
        assert_eq!(managed.identity_key, directed.identity_key);
        assert_eq!(managed.beacon_key, directed.beacon_key);
        assert_eq!(managed.private_beacon_key, directed.private_beacon_key);
    }

    #[test]
    fn test_directed_flooding_matches_k2() {
        let directed = calculate_key_derivatives(&net_key(), Credentials::DirectedFlooding);
        let (nid, encryption_key, privacy_key) = k2(&net_key(), &[0x02]);
        assert_eq!(directed.nid, nid);
        assert_eq!(directed.encryption_key, encryption_key);
        assert_eq!(directed.privacy_key, privacy_key);
    }
}
