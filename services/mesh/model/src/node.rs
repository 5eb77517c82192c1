//! Provisioned nodes, their elements and models.

use crate::address::{is_unicast, Range};
use crate::keys::{KeyIndex, Security};
use bitflags::bitflags;
use mesh_crypto::Key;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

bitflags! {
    /// Features a node supports, as reported in Composition Data
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FeatureFlags: u16 {
        /// Relay feature
        const RELAY = 1 << 0;
        /// Proxy feature
        const PROXY = 1 << 1;
        /// Friend feature
        const FRIEND = 1 << 2;
        /// Low Power feature
        const LOW_POWER = 1 << 3;
    }
}

/// State of one node feature
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureState {
    /// Supported and disabled
    Disabled = 0,
    /// Supported and enabled
    Enabled = 1,
    /// Not supported
    NotSupported = 2,
}

impl TryFrom<u8> for FeatureState {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FeatureState::Disabled),
            1 => Ok(FeatureState::Enabled),
            2 => Ok(FeatureState::NotSupported),
            other => Err(other),
        }
    }
}

/// Known state of the node features; `None` until reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeFeatures {
    /// Relay feature
    pub relay: Option<FeatureState>,
    /// Proxy feature
    pub proxy: Option<FeatureState>,
    /// Friend feature
    pub friend: Option<FeatureState>,
    /// Low Power feature
    pub low_power: Option<FeatureState>,
}

impl NodeFeatures {
    /// Features built from the Composition Data feature bits.
    ///
    /// Supported features start as disabled, except Low Power which cannot be
    /// switched at runtime and is reported enabled.
    pub fn from_flags(flags: FeatureFlags) -> Self {
        let state = |flag: FeatureFlags, supported: FeatureState| {
            Some(if flags.contains(flag) {
                supported
            } else {
                FeatureState::NotSupported
            })
        };
        Self {
            relay: state(FeatureFlags::RELAY, FeatureState::Disabled),
            proxy: state(FeatureFlags::PROXY, FeatureState::Disabled),
            friend: state(FeatureFlags::FRIEND, FeatureState::Disabled),
            low_power: state(FeatureFlags::LOW_POWER, FeatureState::Enabled),
        }
    }
}

/// Identifier of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    /// Model defined by the Bluetooth SIG
    Sig(u16),
    /// Vendor model
    Vendor {
        /// Company identifier
        company_id: u16,
        /// Vendor assigned model identifier
        model_id: u16,
    },
}

impl ModelId {
    /// 32-bit representation: company identifier in the high half for vendor models
    pub fn as_u32(&self) -> u32 {
        match *self {
            ModelId::Sig(id) => u32::from(id),
            ModelId::Vendor {
                company_id,
                model_id,
            } => (u32::from(company_id) << 16) | u32::from(model_id),
        }
    }
}

/// Configuration Server model identifier
pub const CONFIGURATION_SERVER_MODEL: ModelId = ModelId::Sig(0x0000);

/// A model on an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    /// Model identifier
    pub model_id: ModelId,
    /// Bound application key indexes
    pub bind: Vec<KeyIndex>,
    /// Subscription addresses
    pub subscribe: Vec<u16>,
    /// Publication address, if any
    pub publish: Option<u16>,
}

impl Model {
    /// A model with no bindings or subscriptions
    pub fn new(model_id: ModelId) -> Self {
        Self {
            model_id,
            bind: Vec::new(),
            subscribe: Vec::new(),
            publish: None,
        }
    }
}

/// An element of a node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Optional name
    pub name: Option<String>,
    /// Location descriptor
    pub location: u16,
    /// Models on this element
    pub models: Vec<Model>,
}

/// Composition Data page 0 as applied to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeComposition {
    /// Company identifier
    pub company_identifier: u16,
    /// Product identifier
    pub product_identifier: u16,
    /// Version identifier
    pub version_identifier: u16,
    /// Minimum number of replay protection list entries
    pub minimum_replay_protection_list: u16,
    /// Supported features
    pub features: FeatureFlags,
    /// Elements with their models
    pub elements: Vec<Element>,
}

/// A key known by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    /// Key index
    pub index: KeyIndex,
    /// Whether the node already received the new key of a Key Refresh
    pub updated: bool,
}

/// A provisioned node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Device UUID
    pub uuid: Uuid,
    /// Human readable name
    pub name: String,
    /// Address of the primary element
    pub primary_unicast_address: u16,
    /// Device key; absent for nodes exported without it
    pub device_key: Option<Key>,
    /// Security level of provisioning
    pub security: Security,
    /// Network keys known to the node
    pub net_keys: Vec<NodeKey>,
    /// Application keys known to the node
    pub app_keys: Vec<NodeKey>,
    /// Elements; the first one is the primary element
    pub elements: Vec<Element>,
    /// Feature states
    pub features: NodeFeatures,
    /// Company identifier
    pub company_identifier: Option<u16>,
    /// Product identifier
    pub product_identifier: Option<u16>,
    /// Version identifier
    pub version_identifier: Option<u16>,
    /// Minimum number of replay protection list entries
    pub minimum_replay_protection_list: Option<u16>,
    /// Whether configuration of the node finished
    pub config_complete: bool,
    /// Whether the node is excluded from the network
    pub excluded: bool,
}

impl Node {
    /// A freshly provisioned node knowing one network key.
    ///
    /// Elements are placeholders until Composition Data is received.
    pub fn new(
        uuid: Uuid,
        name: impl Into<String>,
        device_key: Key,
        primary_unicast_address: u16,
        element_count: u8,
        net_key: KeyIndex,
    ) -> Self {
        Self {
            uuid,
            name: name.into(),
            primary_unicast_address,
            device_key: Some(device_key),
            security: Security::Secure,
            net_keys: vec![NodeKey {
                index: net_key,
                updated: false,
            }],
            app_keys: Vec::new(),
            elements: vec![Element::default(); usize::from(element_count.max(1))],
            features: NodeFeatures::default(),
            company_identifier: None,
            product_identifier: None,
            version_identifier: None,
            minimum_replay_protection_list: None,
            config_complete: false,
            excluded: false,
        }
    }

    /// Number of elements, and so of consecutive unicast addresses
    pub fn element_count(&self) -> u16 {
        u16::try_from(self.elements.len().max(1)).unwrap_or(u16::MAX)
    }

    /// Address of the last element
    pub fn last_unicast_address(&self) -> u16 {
        self.primary_unicast_address
            .saturating_add(self.element_count() - 1)
    }

    /// Unicast addresses of all elements
    pub fn address_range(&self) -> Range {
        Range {
            low: self.primary_unicast_address,
            high: self.last_unicast_address(),
        }
    }

    /// Whether every element address is a valid unicast address
    pub fn has_valid_addresses(&self) -> bool {
        is_unicast(self.primary_unicast_address)
            && u32::from(self.primary_unicast_address) + u32::from(self.element_count()) - 1
                <= u32::from(crate::address::MAX_UNICAST_ADDRESS)
    }

    /// Whether `address` belongs to one of the node's elements
    pub fn contains_address(&self, address: u16) -> bool {
        self.address_range().contains(address)
    }

    /// Whether the node knows the network key
    pub fn knows_net_key(&self, index: KeyIndex) -> bool {
        self.net_keys.iter().any(|k| k.index == index)
    }

    /// Whether the node knows the application key
    pub fn knows_app_key(&self, index: KeyIndex) -> bool {
        self.app_keys.iter().any(|k| k.index == index)
    }

    /// Records a network key as known; returns `false` if it already was
    pub fn add_net_key(&mut self, index: KeyIndex) -> bool {
        if self.knows_net_key(index) {
            return false;
        }
        self.net_keys.push(NodeKey {
            index,
            updated: false,
        });
        true
    }

    /// Marks a known network key as updated
    pub fn update_net_key(&mut self, index: KeyIndex) -> bool {
        match self.net_keys.iter_mut().find(|k| k.index == index) {
            Some(key) => {
                key.updated = true;
                true
            }
            None => false,
        }
    }

    /// Forgets a network key and every application key bound to it.
    ///
    /// `bound_app_keys` lists the application keys bound to `index`.
    pub fn remove_net_key(&mut self, index: KeyIndex, bound_app_keys: &[KeyIndex]) -> bool {
        let before = self.net_keys.len();
        self.net_keys.retain(|k| k.index != index);
        self.app_keys.retain(|k| !bound_app_keys.contains(&k.index));
        self.net_keys.len() != before
    }

    /// Records an application key as known
    pub fn add_app_key(&mut self, index: KeyIndex) -> bool {
        if self.knows_app_key(index) {
            return false;
        }
        self.app_keys.push(NodeKey {
            index,
            updated: false,
        });
        true
    }

    /// Marks a known application key as updated
    pub fn update_app_key(&mut self, index: KeyIndex) -> bool {
        match self.app_keys.iter_mut().find(|k| k.index == index) {
            Some(key) => {
                key.updated = true;
                true
            }
            None => false,
        }
    }

    /// Forgets an application key and unbinds it from every model
    pub fn remove_app_key(&mut self, index: KeyIndex) -> bool {
        let before = self.app_keys.len();
        self.app_keys.retain(|k| k.index != index);
        for model in self.elements.iter_mut().flat_map(|e| e.models.iter_mut()) {
            model.bind.retain(|&bound| bound != index);
        }
        self.app_keys.len() != before
    }

    /// Whether any model subscribes or publishes to `address`
    pub fn uses_address(&self, address: u16) -> bool {
        self.elements
            .iter()
            .flat_map(|e| e.models.iter())
            .any(|m| m.subscribe.contains(&address) || m.publish == Some(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(Uuid::new_v4(), "Lamp", [0x11; 16], 0x0010, 3, 0)
    }

    #[test]
    fn test_node_addresses() {
        let node = node();
        assert_eq!(node.element_count(), 3);
        assert_eq!(node.last_unicast_address(), 0x0012);
        assert!(node.contains_address(0x0011));
        assert!(!node.contains_address(0x0013));
        assert!(node.has_valid_addresses());

        let edge = Node::new(Uuid::new_v4(), "Edge", [0; 16], 0x7FFF, 2, 0);
        assert!(!edge.has_valid_addresses());
    }

    #[test]
    fn test_node_keys() {
        let mut node = node();
        assert!(node.knows_net_key(0));
        assert!(!node.add_net_key(0));
        assert!(node.add_net_key(1));
        assert!(node.add_app_key(5));
        assert!(node.add_app_key(6));
        node.elements[0].models.push(Model {
            bind: vec![5, 6],
            ..Model::new(ModelId::Sig(0x1000))
        });

        assert!(node.update_net_key(1));
        assert!(node.net_keys.iter().any(|k| k.index == 1 && k.updated));

        assert!(node.remove_app_key(6));
        assert_eq!(node.elements[0].models[0].bind, vec![5]);

        assert!(node.remove_net_key(1, &[5]));
        assert!(!node.knows_app_key(5));
        assert!(!node.remove_net_key(1, &[]));
    }

    #[test]
    fn test_features_from_flags() {
        let features = NodeFeatures::from_flags(FeatureFlags::RELAY | FeatureFlags::PROXY);
        assert_eq!(features.relay, Some(FeatureState::Disabled));
        assert_eq!(features.proxy, Some(FeatureState::Disabled));
        assert_eq!(features.friend, Some(FeatureState::NotSupported));
        assert_eq!(features.low_power, Some(FeatureState::NotSupported));
    }

    #[test]
    fn test_vendor_model_id() {
        let id = ModelId::Vendor {
            company_id: 0x0059,
            model_id: 0x000A,
        };
        assert_eq!(id.as_u32(), 0x0059_000A);
        assert_eq!(CONFIGURATION_SERVER_MODEL.as_u32(), 0);
    }
}
