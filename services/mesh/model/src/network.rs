//! The mesh network aggregate.

use crate::address::{is_group, is_unicast, MeshAddress, Range, RangeKind, MAX_GROUP_ADDRESS};
use crate::error::NetworkError;
use crate::exclusion::ExclusionList;
use crate::group::{Group, Scene};
use crate::iv_index::IvIndex;
use crate::keys::{
    generate_key, parse_key, validate_index, ApplicationKey, KeyIndex, KeyRefreshPhase,
    NetworkKey, MAX_KEY_INDEX,
};
use crate::node::{FeatureFlags, FeatureState, Node, NodeComposition, NodeFeatures};
use crate::provisioner::Provisioner;
use chrono::{DateTime, Utc};
use mesh_crypto::Key;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Largest 24-bit sequence number
pub const MAX_SEQUENCE_NUMBER: u32 = 0x00FF_FFFF;

/// Default unicast range of a new network's first provisioner
pub const DEFAULT_UNICAST_RANGE: Range = Range {
    low: 0x0001,
    high: 0x199A,
};
/// Default group range of a new network's first provisioner
pub const DEFAULT_GROUP_RANGE: Range = Range {
    low: 0xC000,
    high: 0xCC9A,
};
/// Default scene range of a new network's first provisioner
pub const DEFAULT_SCENE_RANGE: Range = Range {
    low: 0x0001,
    high: 0x3333,
};

/// A mesh network: keys, provisioners, nodes, groups, scenes and IV index.
///
/// The first provisioner is the local one; the node with the same UUID
/// represents this device in the network.
#[derive(Debug, Clone)]
pub struct MeshNetwork {
    /// Network UUID
    pub uuid: Uuid,
    /// Human readable name
    pub name: String,
    /// Last modification time
    pub timestamp: DateTime<Utc>,
    pub(crate) partial: bool,
    pub(crate) network_keys: Vec<NetworkKey>,
    pub(crate) application_keys: Vec<ApplicationKey>,
    pub(crate) provisioners: Vec<Provisioner>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) groups: Vec<Group>,
    pub(crate) scenes: Vec<Scene>,
    pub(crate) iv_index: IvIndex,
    pub(crate) exclusions: ExclusionList,
    sequence_numbers: HashMap<u16, u32>,
}

impl MeshNetwork {
    /// An empty network
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_uuid(Uuid::new_v4(), name)
    }

    /// An empty network with a known UUID
    pub fn with_uuid(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            timestamp: Utc::now(),
            partial: false,
            network_keys: Vec::new(),
            application_keys: Vec::new(),
            provisioners: Vec::new(),
            nodes: Vec::new(),
            groups: Vec::new(),
            scenes: Vec::new(),
            iv_index: IvIndex::default(),
            exclusions: ExclusionList::default(),
            sequence_numbers: HashMap::new(),
        }
    }

    /// A ready to use network: a random primary network key, a provisioner
    /// with the default ranges and its node at address 0x0001.
    pub fn create(
        name: impl Into<String>,
        provisioner_name: impl Into<String>,
    ) -> Result<Self, NetworkError> {
        let mut network = Self::new(name);
        network.add_network_key(0, &generate_key(), "Primary Network Key")?;

        let provisioner_name = provisioner_name.into();
        let mut provisioner = Provisioner::new(Uuid::new_v4(), provisioner_name.clone());
        provisioner.unicast_ranges.push(DEFAULT_UNICAST_RANGE);
        provisioner.group_ranges.push(DEFAULT_GROUP_RANGE);
        provisioner.scene_ranges.push(DEFAULT_SCENE_RANGE);
        let uuid = provisioner.uuid;
        network.add_provisioner(provisioner)?;

        let mut node = Node::new(uuid, provisioner_name, generate_key(), 0x0001, 1, 0);
        node.config_complete = true;
        network.add_node(node)?;

        info!("Created network {} ({})", network.name, network.uuid);
        Ok(network)
    }

    fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    /// Whether the network was imported from a partial export
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    // ----- Network keys -----

    /// All network keys
    pub fn network_keys(&self) -> &[NetworkKey] {
        &self.network_keys
    }

    /// Network key with the given index
    pub fn network_key(&self, index: KeyIndex) -> Option<&NetworkKey> {
        self.network_keys.iter().find(|k| k.index == index)
    }

    /// Lowest unused network key index
    pub fn next_available_network_key_index(&self) -> Option<KeyIndex> {
        (0..=MAX_KEY_INDEX).find(|&i| self.network_key(i).is_none())
    }

    /// Whether any node knows the network key
    pub fn is_network_key_in_use(&self, index: KeyIndex) -> bool {
        self.nodes.iter().any(|n| n.knows_net_key(index))
    }

    /// Adds a network key
    pub fn add_network_key(
        &mut self,
        index: KeyIndex,
        key: &[u8],
        name: impl Into<String>,
    ) -> Result<&NetworkKey, NetworkError> {
        validate_index(index)?;
        if self.network_key(index).is_some() {
            return Err(NetworkError::DuplicateKeyIndex(index));
        }
        let key = parse_key(key)?;

        let position = self.network_keys.len();
        self.network_keys.push(NetworkKey::new(index, name, key)?);
        self.touch();
        info!("Network key {} added", index);
        Ok(&self.network_keys[position])
    }

    /// Removes a network key that no other node and no application key uses.
    ///
    /// The local node forgets the key too, unless it is its last one.
    pub fn remove_network_key(&mut self, index: KeyIndex) -> Result<NetworkKey, NetworkError> {
        let position = self
            .network_keys
            .iter()
            .position(|k| k.index == index)
            .ok_or(NetworkError::NetworkKeyNotFound(index))?;

        if self
            .application_keys
            .iter()
            .any(|k| k.bound_network_key() == index)
        {
            return Err(NetworkError::KeyInUse(index));
        }
        let local = self.local_provisioner().map(|p| p.uuid);
        if self
            .nodes
            .iter()
            .any(|n| Some(n.uuid) != local && n.knows_net_key(index))
        {
            return Err(NetworkError::KeyInUse(index));
        }
        if self.network_keys.len() == 1 {
            return Err(NetworkError::CannotRemove(index));
        }
        if let Some(local_node) = local.and_then(|uuid| self.nodes.iter_mut().find(|n| n.uuid == uuid)) {
            if local_node.knows_net_key(index) {
                if local_node.net_keys.len() == 1 {
                    return Err(NetworkError::CannotRemove(index));
                }
                local_node.remove_net_key(index, &[]);
            }
        }

        let removed = self.network_keys.remove(position);
        self.touch();
        info!("Network key {} removed", index);
        Ok(removed)
    }

    /// Replaces the key material of a network key.
    ///
    /// A key no node knows is replaced in place. A key in use starts the Key
    /// Refresh procedure: the current key becomes the old key and the phase
    /// moves to KeyDistribution. In KeyDistribution the new key may be
    /// replaced again; in UsingNewKeys it may not.
    pub fn update_network_key(&mut self, index: KeyIndex, key: &[u8]) -> Result<(), NetworkError> {
        let key = parse_key(key)?;
        let in_use = self.is_network_key_in_use(index);
        let net_key = self
            .network_keys
            .iter_mut()
            .find(|k| k.index == index)
            .ok_or(NetworkError::NetworkKeyNotFound(index))?;

        match net_key.phase() {
            KeyRefreshPhase::NormalOperation if in_use => {
                net_key.start_refresh(key);
                for node_key in self.nodes.iter_mut().flat_map(|n| n.net_keys.iter_mut()) {
                    if node_key.index == index {
                        node_key.updated = false;
                    }
                }
                info!("Key Refresh of network key {} started", index);
            }
            KeyRefreshPhase::NormalOperation | KeyRefreshPhase::KeyDistribution => {
                net_key.replace(key);
                debug!("Network key {} replaced", index);
            }
            phase @ KeyRefreshPhase::UsingNewKeys => {
                return Err(NetworkError::InvalidKeyRefreshPhase { index, phase });
            }
        }
        self.touch();
        Ok(())
    }

    /// Moves a network key to the next Key Refresh phase.
    ///
    /// KeyDistribution may go to UsingNewKeys or straight back to normal
    /// operation; UsingNewKeys may only go back to normal operation. Going
    /// back to normal revokes the old network key and the old keys of the
    /// bound application keys.
    pub fn transition_key_refresh(
        &mut self,
        index: KeyIndex,
        target: KeyRefreshPhase,
    ) -> Result<(), NetworkError> {
        let net_key = self
            .network_keys
            .iter_mut()
            .find(|k| k.index == index)
            .ok_or(NetworkError::NetworkKeyNotFound(index))?;
        let current = net_key.phase();

        match (current, target) {
            (KeyRefreshPhase::KeyDistribution, KeyRefreshPhase::UsingNewKeys) => {
                net_key.set_phase(target);
            }
            (
                KeyRefreshPhase::KeyDistribution | KeyRefreshPhase::UsingNewKeys,
                KeyRefreshPhase::NormalOperation,
            ) => {
                net_key.set_phase(target);
                let bound: Vec<KeyIndex> = self
                    .application_keys
                    .iter_mut()
                    .filter(|k| k.bound_network_key() == index)
                    .map(|k| {
                        k.revoke_old_key();
                        k.index
                    })
                    .collect();
                for node in self.nodes.iter_mut() {
                    node.net_keys
                        .iter_mut()
                        .filter(|k| k.index == index)
                        .for_each(|k| k.updated = false);
                    node.app_keys
                        .iter_mut()
                        .filter(|k| bound.contains(&k.index))
                        .for_each(|k| k.updated = false);
                }
            }
            _ => {
                return Err(NetworkError::InvalidKeyRefreshPhase {
                    index,
                    phase: current,
                })
            }
        }

        self.touch();
        info!(
            "Network key {} moved from {:?} to {:?}",
            index, current, target
        );
        Ok(())
    }

    // ----- Application keys -----

    /// All application keys
    pub fn application_keys(&self) -> &[ApplicationKey] {
        &self.application_keys
    }

    /// Application key with the given index
    pub fn application_key(&self, index: KeyIndex) -> Option<&ApplicationKey> {
        self.application_keys.iter().find(|k| k.index == index)
    }

    /// Lowest unused application key index
    pub fn next_available_application_key_index(&self) -> Option<KeyIndex> {
        (0..=MAX_KEY_INDEX).find(|&i| self.application_key(i).is_none())
    }

    /// Whether any node knows the application key
    pub fn is_application_key_in_use(&self, index: KeyIndex) -> bool {
        self.nodes.iter().any(|n| n.knows_app_key(index))
    }

    /// Adds an application key bound to an existing network key
    pub fn add_application_key(
        &mut self,
        index: KeyIndex,
        key: &[u8],
        bound_network_key: KeyIndex,
        name: impl Into<String>,
    ) -> Result<&ApplicationKey, NetworkError> {
        validate_index(index)?;
        if self.application_key(index).is_some() {
            return Err(NetworkError::DuplicateKeyIndex(index));
        }
        let key = parse_key(key)?;
        if self.network_key(bound_network_key).is_none() {
            return Err(NetworkError::NetworkKeyNotFound(bound_network_key));
        }

        let position = self.application_keys.len();
        self.application_keys
            .push(ApplicationKey::new(index, name, key, bound_network_key)?);
        self.touch();
        info!(
            "Application key {} added, bound to network key {}",
            index, bound_network_key
        );
        Ok(&self.application_keys[position])
    }

    /// Replaces the key material of an application key.
    ///
    /// A key in use may only be updated while its bound network key is in
    /// KeyDistribution; the previous key is kept as the old key.
    pub fn update_application_key(&mut self, index: KeyIndex, key: &[u8]) -> Result<(), NetworkError> {
        let key = parse_key(key)?;
        let in_use = self.is_application_key_in_use(index);
        let bound = self
            .application_key(index)
            .ok_or(NetworkError::ApplicationKeyNotFound(index))?
            .bound_network_key();
        let phase = self
            .network_key(bound)
            .map(|k| k.phase())
            .ok_or(NetworkError::NetworkKeyNotFound(bound))?;

        let app_key = self
            .application_keys
            .iter_mut()
            .find(|k| k.index == index)
            .ok_or(NetworkError::ApplicationKeyNotFound(index))?;

        if !in_use {
            app_key.replace(key);
        } else if phase == KeyRefreshPhase::KeyDistribution {
            if app_key.old_key().is_none() {
                app_key.start_refresh(key);
            } else {
                app_key.replace(key);
            }
        } else {
            return Err(NetworkError::KeyInUse(index));
        }

        self.touch();
        debug!("Application key {} updated", index);
        Ok(())
    }

    /// Binds an unused application key to another network key
    pub fn bind_application_key(
        &mut self,
        index: KeyIndex,
        network_key: KeyIndex,
    ) -> Result<(), NetworkError> {
        if self.network_key(network_key).is_none() {
            return Err(NetworkError::NetworkKeyNotFound(network_key));
        }
        if self.is_application_key_in_use(index) {
            return Err(NetworkError::KeyInUse(index));
        }
        let app_key = self
            .application_keys
            .iter_mut()
            .find(|k| k.index == index)
            .ok_or(NetworkError::ApplicationKeyNotFound(index))?;
        app_key.bind(network_key);
        self.touch();
        Ok(())
    }

    /// Removes an application key no node knows
    pub fn remove_application_key(&mut self, index: KeyIndex) -> Result<ApplicationKey, NetworkError> {
        let position = self
            .application_keys
            .iter()
            .position(|k| k.index == index)
            .ok_or(NetworkError::ApplicationKeyNotFound(index))?;
        if self.is_application_key_in_use(index) {
            return Err(NetworkError::KeyInUse(index));
        }
        let removed = self.application_keys.remove(position);
        self.touch();
        info!("Application key {} removed", index);
        Ok(removed)
    }

    // ----- Provisioners -----

    /// All provisioners; the first one is local
    pub fn provisioners(&self) -> &[Provisioner] {
        &self.provisioners
    }

    /// The provisioner this device acts as
    pub fn local_provisioner(&self) -> Option<&Provisioner> {
        self.provisioners.first()
    }

    /// Provisioner with the given UUID
    pub fn provisioner(&self, uuid: Uuid) -> Option<&Provisioner> {
        self.provisioners.iter().find(|p| p.uuid == uuid)
    }

    fn check_range(&self, owner: Uuid, kind: RangeKind, range: &Range) -> Result<(), NetworkError> {
        Range::new(range.low, range.high, kind)?;
        if self
            .provisioners
            .iter()
            .filter(|p| p.uuid != owner)
            .any(|p| p.overlaps(kind, range))
        {
            return Err(NetworkError::OverlappingProvisionerRanges);
        }
        Ok(())
    }

    /// Adds a provisioner whose ranges are valid and disjoint from all others
    pub fn add_provisioner(&mut self, provisioner: Provisioner) -> Result<(), NetworkError> {
        if self.provisioner(provisioner.uuid).is_some() {
            return Err(NetworkError::ProvisionerAlreadyExists(provisioner.uuid));
        }
        for kind in [RangeKind::Unicast, RangeKind::Group, RangeKind::Scene] {
            let ranges = provisioner.ranges(kind);
            for (i, range) in ranges.iter().enumerate() {
                self.check_range(provisioner.uuid, kind, range)?;
                if ranges[..i].iter().any(|other| other.overlaps(range)) {
                    return Err(NetworkError::RangeAlreadyAllocated);
                }
            }
        }

        info!("Provisioner {} ({}) added", provisioner.name, provisioner.uuid);
        self.provisioners.push(provisioner);
        self.touch();
        Ok(())
    }

    /// Removes a provisioner; its node, if any, stays in the network
    pub fn remove_provisioner(&mut self, uuid: Uuid) -> Result<Provisioner, NetworkError> {
        let position = self
            .provisioners
            .iter()
            .position(|p| p.uuid == uuid)
            .ok_or(NetworkError::ProvisionerNotFound(uuid))?;
        self.touch();
        Ok(self.provisioners.remove(position))
    }

    /// Adds a range to a provisioner
    pub fn allocate_provisioner_range(
        &mut self,
        uuid: Uuid,
        kind: RangeKind,
        range: Range,
    ) -> Result<(), NetworkError> {
        let provisioner = self
            .provisioner(uuid)
            .ok_or(NetworkError::ProvisionerNotFound(uuid))?;
        if provisioner.overlaps(kind, &range) {
            return Err(NetworkError::RangeAlreadyAllocated);
        }
        self.check_range(uuid, kind, &range)?;

        if let Some(provisioner) = self.provisioners.iter_mut().find(|p| p.uuid == uuid) {
            provisioner.ranges_mut(kind).push(range);
            provisioner.ranges_mut(kind).sort_by_key(|r| r.low);
        }
        self.touch();
        debug!("Allocated {:?} range {} to {}", kind, range, uuid);
        Ok(())
    }

    // ----- Nodes -----

    /// All nodes
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node with the given UUID
    pub fn node(&self, uuid: Uuid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.uuid == uuid)
    }

    /// Node owning the unicast address
    pub fn node_for_address(&self, address: u16) -> Option<&Node> {
        self.nodes.iter().find(|n| n.contains_address(address))
    }

    fn node_for_address_mut(&mut self, address: u16) -> Result<&mut Node, NetworkError> {
        self.nodes
            .iter_mut()
            .find(|n| n.contains_address(address))
            .ok_or(NetworkError::InvalidAddress(address))
    }

    /// The node representing the local provisioner
    pub fn local_node(&self) -> Option<&Node> {
        let uuid = self.local_provisioner()?.uuid;
        self.node(uuid)
    }

    /// Highest taken address inside `range`, ignoring the node `except`
    fn blocking_address(&self, range: &Range, except: Option<Uuid>) -> Option<u16> {
        let by_nodes = self
            .nodes
            .iter()
            .filter(|n| Some(n.uuid) != except)
            .filter(|n| n.address_range().overlaps(range))
            .map(|n| n.last_unicast_address().min(range.high));
        let by_exclusions = (range.low..=range.high).filter(|&a| self.exclusions.is_excluded(a));
        by_nodes.chain(by_exclusions).max()
    }

    /// Whether all addresses of `range` are free
    pub fn is_address_range_available(&self, range: &Range) -> bool {
        self.blocking_address(range, None).is_none()
    }

    /// Lowest free block of `element_count` addresses in a provisioner's unicast ranges
    pub fn next_available_unicast_address(
        &self,
        element_count: u8,
        provisioner: &Provisioner,
    ) -> Option<u16> {
        let count = u32::from(element_count.max(1));
        for range in &provisioner.unicast_ranges {
            let mut low = u32::from(range.low);
            while low + count - 1 <= u32::from(range.high) {
                let candidate = Range {
                    low: low as u16,
                    high: (low + count - 1) as u16,
                };
                match self.blocking_address(&candidate, None) {
                    None => return Some(candidate.low),
                    Some(taken) => low = u32::from(taken) + 1,
                }
            }
        }
        None
    }

    /// Adds a node whose addresses are valid and free
    pub fn add_node(&mut self, node: Node) -> Result<(), NetworkError> {
        if self.node(node.uuid).is_some() {
            return Err(NetworkError::NodeAlreadyExists(node.uuid));
        }
        if !node.has_valid_addresses() {
            return Err(NetworkError::InvalidAddress(node.primary_unicast_address));
        }
        if let Some(taken) = self.blocking_address(&node.address_range(), None) {
            return Err(NetworkError::AddressAlreadyInUse(taken));
        }
        if let Some(key) = node.net_keys.iter().find(|k| self.network_key(k.index).is_none()) {
            return Err(NetworkError::NetworkKeyNotFound(key.index));
        }

        info!(
            "Node {} ({}) added at {:#06x}",
            node.name, node.uuid, node.primary_unicast_address
        );
        self.nodes.push(node);
        self.touch();
        Ok(())
    }

    /// Creates the node of a just provisioned device.
    ///
    /// Without an explicit `address` the lowest free block in the local
    /// provisioner's unicast ranges is used. An explicit address must lie in
    /// those ranges.
    pub fn provision_node(
        &mut self,
        uuid: Uuid,
        name: impl Into<String>,
        device_key: Key,
        element_count: u8,
        net_key: KeyIndex,
        address: Option<u16>,
    ) -> Result<&Node, NetworkError> {
        let provisioner = self
            .local_provisioner()
            .ok_or(NetworkError::NoLocalProvisioner)?;
        if self.node(uuid).is_some() {
            return Err(NetworkError::NodeAlreadyExists(uuid));
        }
        if self.network_key(net_key).is_none() {
            return Err(NetworkError::NetworkKeyNotFound(net_key));
        }

        let address = match address {
            Some(address) => {
                let last = u32::from(address) + u32::from(element_count.max(1)) - 1;
                let range = Range {
                    low: address,
                    high: u16::try_from(last).map_err(|_| NetworkError::InvalidAddress(address))?,
                };
                if !is_unicast(address)
                    || !provisioner.unicast_ranges.iter().any(|r| r.contains_range(&range))
                {
                    return Err(NetworkError::AddressNotInAllocatedRanges(address));
                }
                if let Some(taken) = self.blocking_address(&range, None) {
                    return Err(NetworkError::AddressAlreadyInUse(taken));
                }
                address
            }
            None => self
                .next_available_unicast_address(element_count, provisioner)
                .ok_or(NetworkError::NoAddressesAvailable)?,
        };

        let position = self.nodes.len();
        self.add_node(Node::new(
            uuid,
            name,
            device_key,
            address,
            element_count,
            net_key,
        ))?;
        Ok(&self.nodes[position])
    }

    /// Removes a node and excludes its addresses until the IV index moves on
    pub fn remove_node(&mut self, uuid: Uuid) -> Result<Node, NetworkError> {
        let position = self
            .nodes
            .iter()
            .position(|n| n.uuid == uuid)
            .ok_or(NetworkError::NodeNotFound(uuid))?;
        let node = self.nodes.remove(position);

        let range = node.address_range();
        self.exclusions
            .exclude(range.low..=range.high, self.iv_index.index);
        for address in range.low..=range.high {
            self.sequence_numbers.remove(&address);
        }
        for scene in self.scenes.iter_mut() {
            scene.addresses.retain(|a| !range.contains(*a));
        }
        self.touch();
        info!("Node {} ({}) removed, {} excluded", node.name, uuid, range);
        Ok(node)
    }

    /// Whether `address` is excluded from reallocation
    pub fn is_excluded(&self, address: u16) -> bool {
        self.exclusions.is_excluded(address)
    }

    /// Exclusion list
    pub fn exclusions(&self) -> &ExclusionList {
        &self.exclusions
    }

    /// Records that the node at `address` knows a network key
    pub fn add_node_network_key(&mut self, address: u16, index: KeyIndex) -> Result<(), NetworkError> {
        if self.network_key(index).is_none() {
            return Err(NetworkError::NetworkKeyNotFound(index));
        }
        self.node_for_address_mut(address)?.add_net_key(index);
        self.touch();
        Ok(())
    }

    /// Records that the node at `address` received the new key of a network key
    pub fn update_node_network_key(&mut self, address: u16, index: KeyIndex) -> Result<(), NetworkError> {
        if self.network_key(index).is_none() {
            return Err(NetworkError::NetworkKeyNotFound(index));
        }
        self.node_for_address_mut(address)?.update_net_key(index);
        self.touch();
        Ok(())
    }

    /// Records that the node at `address` forgot a network key and its bound application keys
    pub fn remove_node_network_key(&mut self, address: u16, index: KeyIndex) -> Result<(), NetworkError> {
        let bound: Vec<KeyIndex> = self
            .application_keys
            .iter()
            .filter(|k| k.bound_network_key() == index)
            .map(|k| k.index)
            .collect();
        self.node_for_address_mut(address)?
            .remove_net_key(index, &bound);
        self.touch();
        Ok(())
    }

    /// Records that the node at `address` knows an application key
    pub fn add_node_application_key(&mut self, address: u16, index: KeyIndex) -> Result<(), NetworkError> {
        if self.application_key(index).is_none() {
            return Err(NetworkError::ApplicationKeyNotFound(index));
        }
        self.node_for_address_mut(address)?.add_app_key(index);
        self.touch();
        Ok(())
    }

    /// Records that the node at `address` received the new key of an application key
    pub fn update_node_application_key(
        &mut self,
        address: u16,
        index: KeyIndex,
    ) -> Result<(), NetworkError> {
        if self.application_key(index).is_none() {
            return Err(NetworkError::ApplicationKeyNotFound(index));
        }
        self.node_for_address_mut(address)?.update_app_key(index);
        self.touch();
        Ok(())
    }

    /// Records that the node at `address` forgot an application key
    pub fn remove_node_application_key(
        &mut self,
        address: u16,
        index: KeyIndex,
    ) -> Result<(), NetworkError> {
        self.node_for_address_mut(address)?.remove_app_key(index);
        self.touch();
        Ok(())
    }

    /// Records the GATT Proxy state reported by the node at `address`
    pub fn set_node_proxy_state(&mut self, address: u16, state: FeatureState) -> Result<(), NetworkError> {
        self.node_for_address_mut(address)?.features.proxy = Some(state);
        self.touch();
        Ok(())
    }

    /// Applies Composition Data page 0 reported by the node at `address`.
    ///
    /// A different element count moves the node's last address; the new
    /// addresses must be free.
    pub fn apply_node_composition(
        &mut self,
        address: u16,
        composition: NodeComposition,
    ) -> Result<(), NetworkError> {
        let node = self
            .node_for_address(address)
            .ok_or(NetworkError::InvalidAddress(address))?;
        let uuid = node.uuid;
        let primary = node.primary_unicast_address;

        let count = composition.elements.len().max(1) as u32;
        let last = u32::from(primary) + count - 1;
        let range = Range {
            low: primary,
            high: u16::try_from(last).map_err(|_| NetworkError::InvalidAddress(primary))?,
        };
        if !is_unicast(range.high) {
            return Err(NetworkError::InvalidAddress(range.high));
        }
        if let Some(taken) = self.blocking_address(&range, Some(uuid)) {
            return Err(NetworkError::AddressAlreadyInUse(taken));
        }

        let node = self.node_for_address_mut(address)?;
        node.company_identifier = Some(composition.company_identifier);
        node.product_identifier = Some(composition.product_identifier);
        node.version_identifier = Some(composition.version_identifier);
        node.minimum_replay_protection_list = Some(composition.minimum_replay_protection_list);
        let proxy = node.features.proxy;
        node.features = NodeFeatures::from_flags(composition.features);
        if composition.features.contains(FeatureFlags::PROXY)
            && matches!(proxy, Some(FeatureState::Enabled | FeatureState::Disabled))
        {
            node.features.proxy = proxy;
        }
        node.elements = composition.elements;
        self.touch();
        Ok(())
    }

    /// Marks a node as excluded from the network, e.g. before a Key Refresh
    pub fn set_node_excluded(&mut self, uuid: Uuid, excluded: bool) -> Result<(), NetworkError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.uuid == uuid)
            .ok_or(NetworkError::NodeNotFound(uuid))?;
        node.excluded = excluded;
        self.touch();
        Ok(())
    }

    // ----- IV index and sequence numbers -----

    /// Current IV index state
    pub fn iv_index(&self) -> IvIndex {
        self.iv_index
    }

    /// Sets the IV index.
    ///
    /// Entering IV Update requires a higher index (N normal, N+1 in
    /// progress, N+1 normal), and the transmit IV index never moves back.
    /// Returns `true` when the transmit IV index advanced and every sequence
    /// number restarted from 0.
    pub fn set_iv_index(&mut self, index: u32, update_active: bool) -> Result<bool, NetworkError> {
        if index < self.iv_index.index {
            return Err(NetworkError::IvIndexTooSmall {
                current: self.iv_index.index,
                requested: index,
            });
        }

        let requested = IvIndex {
            index,
            is_iv_update_active: update_active,
            transition_date: Some(Utc::now()),
        };
        let previous_transmit = self.iv_index.transmit_index();
        if (update_active && index == 0) || requested.transmit_index() < previous_transmit {
            return Err(NetworkError::InvalidIvUpdateTransition {
                index,
                update_active,
            });
        }
        self.iv_index = requested;

        let reset = self.iv_index.transmit_index() > previous_transmit;
        if reset {
            self.sequence_numbers.values_mut().for_each(|seq| *seq = 0);
        }
        self.exclusions.cleanup(index);
        self.touch();
        info!(
            "IV index set to {} (update active: {}, sequence reset: {})",
            index, update_active, reset
        );
        Ok(reset)
    }

    /// Returns the next sequence number of `source` and advances it
    pub fn next_sequence_number(&mut self, source: u16) -> Result<u32, NetworkError> {
        if !is_unicast(source) {
            return Err(NetworkError::InvalidAddress(source));
        }
        let next = self.sequence_numbers.entry(source).or_insert(0);
        if *next > MAX_SEQUENCE_NUMBER {
            return Err(NetworkError::SequenceNumberExhausted(source));
        }
        let seq = *next;
        *next += 1;
        Ok(seq)
    }

    /// Sequence number `source` will use next
    pub fn sequence_number(&self, source: u16) -> u32 {
        self.sequence_numbers.get(&source).copied().unwrap_or(0)
    }

    /// Restores the next sequence number of `source`
    pub fn set_sequence_number(&mut self, source: u16, next: u32) {
        self.sequence_numbers.insert(source, next);
    }

    // ----- Groups and scenes -----

    /// All groups
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Group with the given address
    pub fn group(&self, address: u16) -> Option<&Group> {
        self.groups.iter().find(|g| g.address.address() == address)
    }

    /// Adds a group with a group or virtual address
    pub fn add_group(&mut self, group: Group) -> Result<(), NetworkError> {
        let address = group.address.address();
        match group.address {
            MeshAddress::Group(a) if is_group(a) && a <= MAX_GROUP_ADDRESS => {}
            MeshAddress::Virtual { .. } => {}
            _ => return Err(NetworkError::InvalidAddress(address)),
        }
        if self.group(address).is_some() {
            return Err(NetworkError::GroupAlreadyExists(address));
        }
        if group.parent != MeshAddress::Unassigned && self.group(group.parent.address()).is_none() {
            return Err(NetworkError::GroupNotFound(group.parent.address()));
        }

        debug!("Group {} ({}) added", group.name, group.address);
        self.groups.push(group);
        self.touch();
        Ok(())
    }

    /// Removes a group no model uses and no group has as parent
    pub fn remove_group(&mut self, address: u16) -> Result<Group, NetworkError> {
        let position = self
            .groups
            .iter()
            .position(|g| g.address.address() == address)
            .ok_or(NetworkError::GroupNotFound(address))?;
        if self.nodes.iter().any(|n| n.uses_address(address))
            || self.groups.iter().any(|g| g.parent.address() == address)
        {
            return Err(NetworkError::GroupInUse(address));
        }
        self.touch();
        Ok(self.groups.remove(position))
    }

    /// All scenes
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Scene with the given number
    pub fn scene(&self, number: u16) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.number == number)
    }

    /// Adds a scene
    pub fn add_scene(&mut self, scene: Scene) -> Result<(), NetworkError> {
        if scene.number == 0 {
            return Err(NetworkError::InvalidSceneNumber(scene.number));
        }
        if self.scene(scene.number).is_some() {
            return Err(NetworkError::SceneAlreadyExists(scene.number));
        }
        self.scenes.push(scene);
        self.touch();
        Ok(())
    }

    /// Removes a scene no element stores
    pub fn remove_scene(&mut self, number: u16) -> Result<Scene, NetworkError> {
        let position = self
            .scenes
            .iter()
            .position(|s| s.number == number)
            .ok_or(NetworkError::SceneNotFound(number))?;
        if !self.scenes[position].addresses.is_empty() {
            return Err(NetworkError::SceneInUse(number));
        }
        self.touch();
        Ok(self.scenes.remove(position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Element, Model, ModelId};
    use proptest::prelude::*;

    fn network() -> MeshNetwork {
        MeshNetwork::create("Home", "Phone").unwrap()
    }

    fn other_provisioner(low: u16, high: u16) -> Provisioner {
        let mut provisioner = Provisioner::new(Uuid::new_v4(), "Tablet");
        provisioner.unicast_ranges.push(Range { low, high });
        provisioner
    }

    #[test]
    fn test_create_network() {
        let network = network();
        assert_eq!(network.network_keys().len(), 1);
        assert_eq!(network.local_node().unwrap().primary_unicast_address, 0x0001);
        assert_eq!(network.local_provisioner().unwrap().name, "Phone");
    }

    #[test]
    fn test_add_network_key_errors() {
        let mut network = network();
        assert!(matches!(
            network.add_network_key(0, &[0; 16], "dup"),
            Err(NetworkError::DuplicateKeyIndex(0))
        ));
        assert!(matches!(
            network.add_network_key(1, &[0; 15], "short"),
            Err(NetworkError::InvalidKeyLength(15))
        ));
        assert!(matches!(
            network.add_network_key(4096, &[0; 16], "far"),
            Err(NetworkError::KeyIndexOutOfRange(4096))
        ));
        assert_eq!(network.network_keys().len(), 1);
        assert_eq!(network.next_available_network_key_index(), Some(1));
    }

    #[test]
    fn test_remove_network_key_rules() {
        let mut network = network();
        assert!(matches!(
            network.remove_network_key(0),
            Err(NetworkError::CannotRemove(0))
        ));

        network.add_network_key(1, &[1; 16], "Second").unwrap();
        network.add_application_key(0, &[2; 16], 1, "App").unwrap();
        assert!(matches!(
            network.remove_network_key(1),
            Err(NetworkError::KeyInUse(1))
        ));
        network.remove_application_key(0).unwrap();

        network
            .provision_node(Uuid::new_v4(), "Lamp", [3; 16], 1, 1, None)
            .unwrap();
        assert!(matches!(
            network.remove_network_key(1),
            Err(NetworkError::KeyInUse(1))
        ));
    }

    #[test]
    fn test_remove_key_known_by_local_node() {
        let mut network = network();
        network.add_network_key(1, &[1; 16], "Second").unwrap();
        network.add_node_network_key(0x0001, 1).unwrap();

        network.remove_network_key(1).unwrap();
        assert!(!network.local_node().unwrap().knows_net_key(1));
        assert!(network.network_key(1).is_none());
    }

    #[test]
    fn test_key_refresh_procedure() {
        let mut network = network();
        let old = *network.network_key(0).unwrap().key();

        network.update_network_key(0, &[9; 16]).unwrap();
        let key = network.network_key(0).unwrap();
        assert_eq!(key.phase(), KeyRefreshPhase::KeyDistribution);
        assert_eq!(key.old_key(), Some(&old));

        network.update_node_network_key(0x0001, 0).unwrap();
        assert!(network.local_node().unwrap().net_keys[0].updated);

        network
            .transition_key_refresh(0, KeyRefreshPhase::UsingNewKeys)
            .unwrap();
        assert!(matches!(
            network.update_network_key(0, &[8; 16]),
            Err(NetworkError::InvalidKeyRefreshPhase { .. })
        ));
        network
            .transition_key_refresh(0, KeyRefreshPhase::NormalOperation)
            .unwrap();

        let key = network.network_key(0).unwrap();
        assert_eq!(key.old_key(), None);
        assert_eq!(key.key(), &[9; 16]);
        assert!(!network.local_node().unwrap().net_keys[0].updated);
    }

    #[test]
    fn test_invalid_key_refresh_transition() {
        let mut network = network();
        assert!(matches!(
            network.transition_key_refresh(0, KeyRefreshPhase::UsingNewKeys),
            Err(NetworkError::InvalidKeyRefreshPhase {
                index: 0,
                phase: KeyRefreshPhase::NormalOperation
            })
        ));
    }

    #[test]
    fn test_unused_network_key_is_replaced() {
        let mut network = network();
        network.add_network_key(1, &[1; 16], "Spare").unwrap();
        network.update_network_key(1, &[2; 16]).unwrap();
        let key = network.network_key(1).unwrap();
        assert_eq!(key.phase(), KeyRefreshPhase::NormalOperation);
        assert_eq!(key.key(), &[2; 16]);
        assert!(key.old_key().is_none());
    }

    #[test]
    fn test_application_key_update_requires_key_distribution() {
        let mut network = network();
        network.add_application_key(0, &[4; 16], 0, "App").unwrap();
        network.add_node_application_key(0x0001, 0).unwrap();

        assert!(matches!(
            network.update_application_key(0, &[5; 16]),
            Err(NetworkError::KeyInUse(0))
        ));

        network.update_network_key(0, &[6; 16]).unwrap();
        network.update_application_key(0, &[5; 16]).unwrap();
        let app_key = network.application_key(0).unwrap();
        assert_eq!(app_key.old_key(), Some(&[4; 16]));

        network
            .transition_key_refresh(0, KeyRefreshPhase::NormalOperation)
            .unwrap();
        assert!(network.application_key(0).unwrap().old_key().is_none());
    }

    #[test]
    fn test_application_key_requires_network_key() {
        let mut network = network();
        assert!(matches!(
            network.add_application_key(0, &[1; 16], 7, "App"),
            Err(NetworkError::NetworkKeyNotFound(7))
        ));
        network.add_application_key(0, &[1; 16], 0, "App").unwrap();
        assert!(matches!(
            network.add_application_key(0, &[1; 16], 0, "App"),
            Err(NetworkError::DuplicateKeyIndex(0))
        ));
    }

    #[test]
    fn test_provisioner_ranges_are_disjoint() {
        let mut network = network();
        assert!(matches!(
            network.add_provisioner(other_provisioner(0x1000, 0x2000)),
            Err(NetworkError::OverlappingProvisionerRanges)
        ));

        let tablet = other_provisioner(0x2000, 0x2FFF);
        let uuid = tablet.uuid;
        network.add_provisioner(tablet.clone()).unwrap();
        assert!(matches!(
            network.add_provisioner(tablet),
            Err(NetworkError::ProvisionerAlreadyExists(_))
        ));

        assert!(matches!(
            network.allocate_provisioner_range(uuid, RangeKind::Unicast, Range { low: 0x2F00, high: 0x3000 }),
            Err(NetworkError::RangeAlreadyAllocated)
        ));
        assert!(matches!(
            network.allocate_provisioner_range(uuid, RangeKind::Group, Range { low: 0xC000, high: 0xC010 }),
            Err(NetworkError::OverlappingProvisionerRanges)
        ));
        assert!(matches!(
            network.allocate_provisioner_range(uuid, RangeKind::Group, Range { low: 0x0001, high: 0x0002 }),
            Err(NetworkError::InvalidRange { .. })
        ));
        network
            .allocate_provisioner_range(uuid, RangeKind::Group, Range { low: 0xD000, high: 0xD0FF })
            .unwrap();
    }

    #[test]
    fn test_provision_node_allocates_addresses() {
        let mut network = network();
        let first = network
            .provision_node(Uuid::new_v4(), "Lamp", [1; 16], 3, 0, None)
            .unwrap()
            .primary_unicast_address;
        assert_eq!(first, 0x0002);

        let second = network
            .provision_node(Uuid::new_v4(), "Switch", [2; 16], 1, 0, None)
            .unwrap()
            .primary_unicast_address;
        assert_eq!(second, 0x0005);
    }

    #[test]
    fn test_provision_node_address_errors() {
        let mut network = network();
        assert!(matches!(
            network.provision_node(Uuid::new_v4(), "Far", [1; 16], 1, 0, Some(0x5000)),
            Err(NetworkError::AddressNotInAllocatedRanges(0x5000))
        ));
        assert!(matches!(
            network.provision_node(Uuid::new_v4(), "Clash", [1; 16], 1, 0, Some(0x0001)),
            Err(NetworkError::AddressAlreadyInUse(0x0001))
        ));

        let mut small = MeshNetwork::new("Small");
        small.add_network_key(0, &[0; 16], "Primary").unwrap();
        small.add_provisioner(other_provisioner(0x0001, 0x0002)).unwrap();
        small
            .provision_node(Uuid::new_v4(), "A", [1; 16], 2, 0, None)
            .unwrap();
        assert!(matches!(
            small.provision_node(Uuid::new_v4(), "B", [1; 16], 1, 0, None),
            Err(NetworkError::NoAddressesAvailable)
        ));
    }

    #[test]
    fn test_add_node_conflicts() {
        let mut network = network();
        let node = Node::new(Uuid::new_v4(), "Lamp", [1; 16], 0x0010, 2, 0);
        network.add_node(node.clone()).unwrap();
        assert!(matches!(
            network.add_node(node),
            Err(NetworkError::NodeAlreadyExists(_))
        ));
        assert!(matches!(
            network.add_node(Node::new(Uuid::new_v4(), "Overlap", [1; 16], 0x000F, 2, 0)),
            Err(NetworkError::AddressAlreadyInUse(0x0010))
        ));
        assert!(matches!(
            network.add_node(Node::new(Uuid::new_v4(), "Group", [1; 16], 0xC000, 1, 0)),
            Err(NetworkError::InvalidAddress(0xC000))
        ));
    }

    #[test]
    fn test_removed_node_addresses_are_excluded() {
        let mut network = network();
        let uuid = Uuid::new_v4();
        network
            .provision_node(uuid, "Lamp", [1; 16], 2, 0, None)
            .unwrap();
        network.remove_node(uuid).unwrap();
        assert!(network.is_excluded(0x0002));

        let next = network
            .provision_node(Uuid::new_v4(), "Switch", [2; 16], 1, 0, None)
            .unwrap()
            .primary_unicast_address;
        assert_eq!(next, 0x0004);

        network.set_iv_index(1, false).unwrap();
        assert!(network.is_excluded(0x0002));
        network.set_iv_index(2, false).unwrap();
        assert!(!network.is_excluded(0x0002));
    }

    #[test]
    fn test_iv_index_rules() {
        let mut network = network();
        network.set_iv_index(5, false).unwrap();
        network.next_sequence_number(0x0001).unwrap();
        network.next_sequence_number(0x0001).unwrap();

        assert!(matches!(
            network.set_iv_index(4, false),
            Err(NetworkError::IvIndexTooSmall { current: 5, requested: 4 })
        ));
        assert_eq!(network.iv_index().index, 5);

        // Entering IV Update keeps transmitting with index 5
        assert!(!network.set_iv_index(6, true).unwrap());
        assert_eq!(network.sequence_number(0x0001), 2);

        // Back to normal: transmit index advances
        assert!(network.set_iv_index(6, false).unwrap());
        assert_eq!(network.sequence_number(0x0001), 0);
        assert!(network.iv_index().transition_date.is_some());
    }

    #[test]
    fn test_iv_update_cannot_reenter_same_index() {
        let mut network = network();
        network.set_iv_index(6, true).unwrap();
        for _ in 0..3 {
            network.next_sequence_number(0x0001).unwrap();
        }
        network.set_iv_index(6, false).unwrap();
        assert_eq!(network.next_sequence_number(0x0001).unwrap(), 0);

        // Going back to "6 in progress" would transmit with IV index 5 again
        assert!(matches!(
            network.set_iv_index(6, true),
            Err(NetworkError::InvalidIvUpdateTransition {
                index: 6,
                update_active: true
            })
        ));
        assert_eq!(network.iv_index().transmit_index(), 6);
        assert_eq!(network.sequence_number(0x0001), 1);

        // Repeating the current state changes nothing
        assert!(!network.set_iv_index(6, false).unwrap());
        assert!(!network.set_iv_index(7, true).unwrap());
        assert!(!network.set_iv_index(7, true).unwrap());
        assert!(network.set_iv_index(7, false).unwrap());
    }

    #[test]
    fn test_iv_update_needs_an_index() {
        let mut network = network();
        assert!(matches!(
            network.set_iv_index(0, true),
            Err(NetworkError::InvalidIvUpdateTransition { .. })
        ));
        assert_eq!(network.iv_index(), IvIndex::default());
    }

    #[test]
    fn test_sequence_number_exhaustion() {
        let mut network = network();
        network.set_sequence_number(0x0001, MAX_SEQUENCE_NUMBER);
        assert_eq!(network.next_sequence_number(0x0001).unwrap(), MAX_SEQUENCE_NUMBER);
        assert!(matches!(
            network.next_sequence_number(0x0001),
            Err(NetworkError::SequenceNumberExhausted(0x0001))
        ));
        assert!(matches!(
            network.next_sequence_number(0xC000),
            Err(NetworkError::InvalidAddress(0xC000))
        ));
    }

    #[test]
    fn test_groups() {
        let mut network = network();
        network.add_group(Group::new("Kitchen", MeshAddress::Group(0xC001))).unwrap();
        assert!(matches!(
            network.add_group(Group::new("Again", MeshAddress::Group(0xC001))),
            Err(NetworkError::GroupAlreadyExists(0xC001))
        ));
        assert!(matches!(
            network.add_group(Group::new("Fixed", MeshAddress::Group(0xFFFF))),
            Err(NetworkError::InvalidAddress(0xFFFF))
        ));
        assert!(matches!(
            network.add_group(Group::new("Unicast", MeshAddress::Unicast(0x0001))),
            Err(NetworkError::InvalidAddress(0x0001))
        ));

        let mut child = Group::new("Counter", MeshAddress::Group(0xC002));
        child.parent = MeshAddress::Group(0xC001);
        network.add_group(child).unwrap();
        assert!(matches!(
            network.remove_group(0xC001),
            Err(NetworkError::GroupInUse(0xC001))
        ));
        network.remove_group(0xC002).unwrap();
        network.remove_group(0xC001).unwrap();
    }

    #[test]
    fn test_group_in_use_by_model() {
        let mut network = network();
        network.add_group(Group::new("Hall", MeshAddress::Group(0xC010))).unwrap();
        let mut model = Model::new(ModelId::Sig(0x1000));
        model.subscribe.push(0xC010);
        let composition = NodeComposition {
            company_identifier: 0x0059,
            product_identifier: 1,
            version_identifier: 1,
            minimum_replay_protection_list: 8,
            features: FeatureFlags::empty(),
            elements: vec![Element {
                name: None,
                location: 0,
                models: vec![model],
            }],
        };
        network.apply_node_composition(0x0001, composition).unwrap();
        assert!(matches!(
            network.remove_group(0xC010),
            Err(NetworkError::GroupInUse(0xC010))
        ));
    }

    #[test]
    fn test_scenes() {
        let mut network = network();
        assert!(matches!(
            network.add_scene(Scene::new("Zero", 0)),
            Err(NetworkError::InvalidSceneNumber(0))
        ));
        network.add_scene(Scene::new("Evening", 1)).unwrap();
        assert!(matches!(
            network.add_scene(Scene::new("Evening", 1)),
            Err(NetworkError::SceneAlreadyExists(1))
        ));

        let mut stored = Scene::new("Stored", 2);
        stored.addresses.push(0x0001);
        network.add_scene(stored).unwrap();
        assert!(matches!(
            network.remove_scene(2),
            Err(NetworkError::SceneInUse(2))
        ));
        network.remove_scene(1).unwrap();
        assert!(matches!(
            network.remove_scene(1),
            Err(NetworkError::SceneNotFound(1))
        ));
    }

    #[test]
    fn test_composition_growth_checks_addresses() {
        let mut network = network();
        network
            .add_node(Node::new(Uuid::new_v4(), "Neighbour", [1; 16], 0x0002, 1, 0))
            .unwrap();
        let composition = NodeComposition {
            company_identifier: 0,
            product_identifier: 0,
            version_identifier: 0,
            minimum_replay_protection_list: 0,
            features: FeatureFlags::PROXY,
            elements: vec![Element::default(), Element::default()],
        };
        assert!(matches!(
            network.apply_node_composition(0x0001, composition),
            Err(NetworkError::AddressAlreadyInUse(0x0002))
        ));
    }

    proptest! {
        #[test]
        fn prop_accepted_iv_indexes_never_decrease(steps in proptest::collection::vec((0u32..64, any::<bool>()), 1..40)) {
            let mut network = MeshNetwork::new("Prop");
            let mut current = 0;
            let mut transmit = 0;
            for (index, active) in steps {
                let requested_transmit = if active { index.saturating_sub(1) } else { index };
                match network.set_iv_index(index, active) {
                    Ok(_) => {
                        prop_assert!(index >= current);
                        prop_assert!(network.iv_index().transmit_index() >= transmit);
                        current = index;
                        transmit = network.iv_index().transmit_index();
                    }
                    Err(NetworkError::IvIndexTooSmall { .. }) => prop_assert!(index < current),
                    Err(NetworkError::InvalidIvUpdateTransition { .. }) => {
                        prop_assert!(requested_transmit < transmit || (active && index == 0));
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
                prop_assert_eq!(network.iv_index().index, current);
                prop_assert_eq!(network.iv_index().transmit_index(), transmit);
            }
        }

        #[test]
        fn prop_key_indexes_stay_unique(indexes in proptest::collection::vec(0u16..16, 1..40)) {
            let mut network = MeshNetwork::new("Prop");
            for index in indexes {
                let before = network.network_keys().len();
                match network.add_network_key(index, &[index as u8; 16], "k") {
                    Ok(_) => prop_assert_eq!(network.network_keys().len(), before + 1),
                    Err(_) => prop_assert_eq!(network.network_keys().len(), before),
                }
            }
            let mut seen: Vec<u16> = network.network_keys().iter().map(|k| k.index).collect();
            let total = seen.len();
            seen.sort_unstable();
            seen.dedup();
            prop_assert_eq!(seen.len(), total);
        }

        #[test]
        fn prop_provisioner_ranges_stay_disjoint(ranges in proptest::collection::vec((1u16..0x7000, 0u16..0x0800), 1..20)) {
            let mut network = MeshNetwork::new("Prop");
            for (low, len) in ranges {
                let high = low.saturating_add(len).min(0x7FFF);
                let _ = network.add_provisioner(other_provisioner(low, high));
            }
            let provisioners = network.provisioners();
            for (i, a) in provisioners.iter().enumerate() {
                for b in &provisioners[i + 1..] {
                    for ra in &a.unicast_ranges {
                        prop_assert!(!b.unicast_ranges.iter().any(|rb| rb.overlaps(ra)));
                    }
                }
            }
        }
    }
}
