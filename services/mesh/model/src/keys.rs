//! Network and application keys.

use crate::error::NetworkError;
use chrono::{DateTime, Utc};
use mesh_crypto::{calculate_key_derivatives, k4, key_from_slice, Credentials, Key, KeyDerivatives};
use serde::{Deserialize, Serialize};

/// 12-bit global key index
pub type KeyIndex = u16;

/// Highest valid key index
pub const MAX_KEY_INDEX: KeyIndex = 4095;

/// Key Refresh procedure phase of a network key
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyRefreshPhase {
    /// Phase 0: only the current key exists
    #[default]
    NormalOperation = 0,
    /// Phase 1: new key distributed, old key still used for sending
    KeyDistribution = 1,
    /// Phase 2: new key used for sending, old key still accepted
    UsingNewKeys = 2,
}

impl TryFrom<u8> for KeyRefreshPhase {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyRefreshPhase::NormalOperation),
            1 => Ok(KeyRefreshPhase::KeyDistribution),
            2 => Ok(KeyRefreshPhase::UsingNewKeys),
            other => Err(other),
        }
    }
}

/// Minimum security a key was distributed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    /// Provisioned with OOB authentication
    #[default]
    Secure,
    /// Provisioned without OOB authentication
    Insecure,
}

pub(crate) fn validate_index(index: KeyIndex) -> Result<(), NetworkError> {
    if index > MAX_KEY_INDEX {
        return Err(NetworkError::KeyIndexOutOfRange(index));
    }
    Ok(())
}

pub(crate) fn parse_key(key: &[u8]) -> Result<Key, NetworkError> {
    key_from_slice(key).map_err(|_| NetworkError::InvalidKeyLength(key.len()))
}

/// Generates a random 128-bit key
pub fn generate_key() -> Key {
    rand::random()
}

/// A network key with its cached derivatives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkKey {
    /// Global key index
    pub index: KeyIndex,
    /// Human readable name
    pub name: String,
    key: Key,
    old_key: Option<Key>,
    phase: KeyRefreshPhase,
    /// Minimum security of the nodes the key was given to
    pub min_security: Security,
    /// Last time the key or its phase changed
    pub timestamp: DateTime<Utc>,
    derivatives: KeyDerivatives,
    directed_derivatives: KeyDerivatives,
    old_derivatives: Option<KeyDerivatives>,
}

impl NetworkKey {
    /// Creates a network key in phase 0
    pub fn new(index: KeyIndex, name: impl Into<String>, key: Key) -> Result<Self, NetworkError> {
        validate_index(index)?;
        Ok(Self {
            index,
            name: name.into(),
            key,
            old_key: None,
            phase: KeyRefreshPhase::NormalOperation,
            min_security: Security::Secure,
            timestamp: Utc::now(),
            derivatives: calculate_key_derivatives(&key, Credentials::ManagedFlooding),
            directed_derivatives: calculate_key_derivatives(&key, Credentials::DirectedFlooding),
            old_derivatives: None,
        })
    }

    /// Restores a key in any phase, e.g. from an imported document
    pub(crate) fn restore(
        index: KeyIndex,
        name: String,
        key: Key,
        old_key: Option<Key>,
        phase: KeyRefreshPhase,
        min_security: Security,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, NetworkError> {
        let mut restored = Self::new(index, name, key)?;
        restored.old_derivatives =
            old_key.map(|old| calculate_key_derivatives(&old, Credentials::ManagedFlooding));
        restored.old_key = old_key;
        restored.phase = phase;
        restored.min_security = min_security;
        restored.timestamp = timestamp;
        Ok(restored)
    }

    /// Current (during Key Refresh: new) key
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Key being replaced during Key Refresh
    pub fn old_key(&self) -> Option<&Key> {
        self.old_key.as_ref()
    }

    /// Key Refresh phase
    pub fn phase(&self) -> KeyRefreshPhase {
        self.phase
    }

    /// Derivatives of the current key for the given credentials
    pub fn derivatives(&self, credentials: Credentials) -> &KeyDerivatives {
        match credentials {
            Credentials::ManagedFlooding => &self.derivatives,
            Credentials::DirectedFlooding => &self.directed_derivatives,
        }
    }

    /// Derivatives of the key being replaced
    pub fn old_derivatives(&self) -> Option<&KeyDerivatives> {
        self.old_derivatives.as_ref()
    }

    /// Managed flooding derivatives to secure outgoing messages with.
    ///
    /// During phase 1 messages are still sent with the old key.
    pub fn transmit_derivatives(&self) -> &KeyDerivatives {
        match (self.phase, &self.old_derivatives) {
            (KeyRefreshPhase::KeyDistribution, Some(old)) => old,
            _ => &self.derivatives,
        }
    }

    /// Managed flooding derivatives accepted for incoming messages
    pub fn receive_derivatives(&self) -> impl Iterator<Item = &KeyDerivatives> {
        std::iter::once(&self.derivatives).chain(self.old_derivatives.iter())
    }

    /// Network ID of the key used for sending
    pub fn network_id(&self) -> [u8; 8] {
        self.transmit_derivatives().network_id
    }

    pub(crate) fn replace(&mut self, key: Key) {
        self.key = key;
        self.derivatives = calculate_key_derivatives(&key, Credentials::ManagedFlooding);
        self.directed_derivatives = calculate_key_derivatives(&key, Credentials::DirectedFlooding);
        self.timestamp = Utc::now();
    }

    pub(crate) fn start_refresh(&mut self, key: Key) {
        self.old_key = Some(self.key);
        self.old_derivatives = Some(self.derivatives);
        self.replace(key);
        self.phase = KeyRefreshPhase::KeyDistribution;
    }

    pub(crate) fn set_phase(&mut self, phase: KeyRefreshPhase) {
        self.phase = phase;
        if phase == KeyRefreshPhase::NormalOperation {
            self.old_key = None;
            self.old_derivatives = None;
        }
        self.timestamp = Utc::now();
    }
}

/// An application key bound to one network key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationKey {
    /// Global key index
    pub index: KeyIndex,
    /// Human readable name
    pub name: String,
    key: Key,
    old_key: Option<Key>,
    bound_network_key: KeyIndex,
    aid: u8,
    old_aid: Option<u8>,
}

impl ApplicationKey {
    /// Creates an application key bound to `bound_network_key`
    pub fn new(
        index: KeyIndex,
        name: impl Into<String>,
        key: Key,
        bound_network_key: KeyIndex,
    ) -> Result<Self, NetworkError> {
        validate_index(index)?;
        validate_index(bound_network_key)?;
        Ok(Self {
            index,
            name: name.into(),
            key,
            old_key: None,
            bound_network_key,
            aid: k4(&key),
            old_aid: None,
        })
    }

    pub(crate) fn restore(
        index: KeyIndex,
        name: String,
        key: Key,
        old_key: Option<Key>,
        bound_network_key: KeyIndex,
    ) -> Result<Self, NetworkError> {
        let mut restored = Self::new(index, name, key, bound_network_key)?;
        restored.old_aid = old_key.as_ref().map(k4);
        restored.old_key = old_key;
        Ok(restored)
    }

    /// Current key
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Key being replaced during Key Refresh
    pub fn old_key(&self) -> Option<&Key> {
        self.old_key.as_ref()
    }

    /// Index of the network key this key is bound to
    pub fn bound_network_key(&self) -> KeyIndex {
        self.bound_network_key
    }

    /// 6-bit application key identifier
    pub fn aid(&self) -> u8 {
        self.aid
    }

    /// AID of the key being replaced
    pub fn old_aid(&self) -> Option<u8> {
        self.old_aid
    }

    pub(crate) fn replace(&mut self, key: Key) {
        self.key = key;
        self.aid = k4(&key);
    }

    pub(crate) fn start_refresh(&mut self, key: Key) {
        self.old_key = Some(self.key);
        self.old_aid = Some(self.aid);
        self.replace(key);
    }

    pub(crate) fn revoke_old_key(&mut self) {
        self.old_key = None;
        self.old_aid = None;
    }

    pub(crate) fn bind(&mut self, network_key: KeyIndex) {
        self.bound_network_key = network_key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hex_str: &str) -> Key {
        hex::decode(hex_str).unwrap().try_into().unwrap()
    }

    #[test]
    fn test_network_key_derivatives() {
        let net_key = NetworkKey::new(0, "Primary", key("7dd7364cd842ad18c17c2b820c84c3d6")).unwrap();
        assert_eq!(net_key.derivatives(Credentials::ManagedFlooding).nid, 0x68);
        assert_eq!(hex::encode(net_key.network_id()), "3ecaff672f673370");
        assert_eq!(net_key.phase(), KeyRefreshPhase::NormalOperation);
        assert_eq!(net_key.receive_derivatives().count(), 1);
    }

    #[test]
    fn test_network_key_index_range() {
        assert!(NetworkKey::new(MAX_KEY_INDEX, "Last", [0; 16]).is_ok());
        assert!(matches!(
            NetworkKey::new(4096, "Too far", [0; 16]),
            Err(NetworkError::KeyIndexOutOfRange(4096))
        ));
    }

    #[test]
    fn test_key_refresh_switches_transmit_key() {
        let old = key("7dd7364cd842ad18c17c2b820c84c3d6");
        let mut net_key = NetworkKey::new(0, "Primary", old).unwrap();
        let old_nid = net_key.transmit_derivatives().nid;

        net_key.start_refresh([0x42; 16]);
        assert_eq!(net_key.old_key(), Some(&old));
        assert_eq!(net_key.transmit_derivatives().nid, old_nid);
        assert_eq!(net_key.receive_derivatives().count(), 2);

        net_key.set_phase(KeyRefreshPhase::UsingNewKeys);
        assert_eq!(net_key.transmit_derivatives(), net_key.derivatives(Credentials::ManagedFlooding));

        net_key.set_phase(KeyRefreshPhase::NormalOperation);
        assert_eq!(net_key.old_key(), None);
        assert_eq!(net_key.key(), &[0x42; 16]);
    }

    #[test]
    fn test_application_key_aid() {
        let app_key = ApplicationKey::new(0, "App", key("63964771734fbd76e3b40519d1d94a48"), 0).unwrap();
        assert_eq!(app_key.aid(), 0x26);

        let mut app_key = app_key;
        app_key.start_refresh([0x01; 16]);
        assert_eq!(app_key.old_aid(), Some(0x26));
        app_key.revoke_old_key();
        assert_eq!(app_key.old_aid(), None);
        assert!(app_key.old_key().is_none());
    }

    #[test]
    fn test_phase_from_u8() {
        assert_eq!(KeyRefreshPhase::try_from(2), Ok(KeyRefreshPhase::UsingNewKeys));
        assert_eq!(KeyRefreshPhase::try_from(3), Err(3));
    }
}
