//! Mesh Configuration Database (CDB) JSON import and export.
//!
//! Keys, addresses, scene numbers and UUIDs are written as upper-case hex
//! strings. A partial export keeps only the selected entities and is marked
//! with `"partial": true`.

use crate::address::{MeshAddress, Range, RangeKind};
use crate::error::NetworkError;
use crate::exclusion::{ExclusionEntry, ExclusionList};
use crate::group::{Group, Scene};
use crate::iv_index::IvIndex;
use crate::keys::{parse_key, ApplicationKey, KeyIndex, KeyRefreshPhase, NetworkKey, Security};
use crate::network::MeshNetwork;
use crate::node::{Element, FeatureState, Model, ModelId, Node, NodeFeatures, NodeKey};
use crate::provisioner::Provisioner;
use chrono::{DateTime, Utc};
use mesh_crypto::Key;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = "http://json-schema.org/draft-04/schema#";
const SCHEMA_ID: &str =
    "http://www.bluetooth.com/specifications/assigned-numbers/mesh-profile/cdb-schema.json#";
const VERSION: &str = "1.0.1";

/// Which entities of one kind an export includes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    /// Every entity
    All,
    /// Only the listed entities
    Only(Vec<T>),
}

impl<T: PartialEq> Selection<T> {
    /// Whether `item` is selected
    pub fn contains(&self, item: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(items) => items.contains(item),
        }
    }
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Selection::All
    }
}

/// What an export contains
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExportConfiguration {
    /// The whole network
    #[default]
    Full,
    /// A subset of the network, e.g. for a guest device
    Partial {
        /// Network keys by index
        network_keys: Selection<KeyIndex>,
        /// Application keys by index; keys bound to an unselected network key are dropped
        application_keys: Selection<KeyIndex>,
        /// Provisioners by UUID
        provisioners: Selection<Uuid>,
        /// Nodes by UUID
        nodes: Selection<Uuid>,
        /// Groups by address
        groups: Selection<u16>,
        /// Scenes by number
        scenes: Selection<u16>,
        /// Whether device keys of exported nodes are included
        export_device_keys: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbDocument {
    #[serde(rename = "$schema", default)]
    schema: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    version: String,
    #[serde(rename = "meshUUID")]
    mesh_uuid: String,
    mesh_name: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    partial: bool,
    net_keys: Vec<CdbNetKey>,
    #[serde(default)]
    app_keys: Vec<CdbAppKey>,
    #[serde(default)]
    provisioners: Vec<CdbProvisioner>,
    #[serde(default)]
    nodes: Vec<CdbNode>,
    #[serde(default)]
    groups: Vec<CdbGroup>,
    #[serde(default)]
    scenes: Vec<CdbScene>,
    #[serde(default)]
    network_exclusions: Vec<CdbExclusion>,
    #[serde(default)]
    iv_index: u32,
    #[serde(default)]
    iv_update_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbNetKey {
    name: String,
    index: KeyIndex,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_key: Option<String>,
    #[serde(default)]
    phase: u8,
    #[serde(default)]
    min_security: Security,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbAppKey {
    name: String,
    index: KeyIndex,
    bound_net_key: KeyIndex,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbAddressRange {
    low_address: String,
    high_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbSceneRange {
    first_scene: String,
    last_scene: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbProvisioner {
    provisioner_name: String,
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(default)]
    allocated_unicast_range: Vec<CdbAddressRange>,
    #[serde(default)]
    allocated_group_range: Vec<CdbAddressRange>,
    #[serde(default)]
    allocated_scene_range: Vec<CdbSceneRange>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbNode {
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(default)]
    name: String,
    unicast_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_key: Option<String>,
    #[serde(default)]
    security: Security,
    #[serde(default)]
    net_keys: Vec<NodeKey>,
    #[serde(default)]
    app_keys: Vec<NodeKey>,
    #[serde(default)]
    elements: Vec<CdbElement>,
    #[serde(default)]
    features: CdbFeatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crpl: Option<String>,
    #[serde(default)]
    config_complete: bool,
    #[serde(default)]
    excluded: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relay: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proxy: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    friend: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    low_power: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    index: u8,
    location: String,
    #[serde(default)]
    models: Vec<CdbModel>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbModel {
    model_id: String,
    #[serde(default)]
    subscribe: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish: Option<CdbPublish>,
    #[serde(default)]
    bind: Vec<KeyIndex>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CdbPublish {
    address: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbGroup {
    name: String,
    address: String,
    parent_address: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CdbScene {
    name: String,
    number: String,
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdbExclusion {
    iv_index: u32,
    addresses: Vec<String>,
}

fn hex16(value: u16) -> String {
    format!("{:04X}", value)
}

fn key_hex(key: &Key) -> String {
    hex::encode_upper(key)
}

fn uuid_hex(uuid: &Uuid) -> String {
    uuid.simple().to_string().to_uppercase()
}

fn address_hex(address: &MeshAddress) -> String {
    address.to_string().to_uppercase()
}

fn parse_hex16(value: &str, what: &str) -> Result<u16, NetworkError> {
    u16::from_str_radix(value, 16)
        .map_err(|e| NetworkError::import(format!("invalid {what} '{value}'"), e))
}

fn parse_hex_key(value: &str, what: &str) -> Result<Key, NetworkError> {
    let bytes =
        hex::decode(value).map_err(|e| NetworkError::import(format!("invalid {what}"), e))?;
    parse_key(&bytes).map_err(|e| NetworkError::import(format!("invalid {what}"), e))
}

fn parse_uuid(value: &str, what: &str) -> Result<Uuid, NetworkError> {
    Uuid::parse_str(value).map_err(|e| NetworkError::import(format!("invalid {what} '{value}'"), e))
}

/// Parses a 4-digit group/unicast address or a 32-digit Label UUID
fn parse_address(value: &str) -> Result<MeshAddress, NetworkError> {
    if value.len() == 32 {
        return Ok(MeshAddress::from_label(parse_uuid(value, "label")?));
    }
    let address = parse_hex16(value, "address")?;
    MeshAddress::try_from(address)
        .map_err(|e| NetworkError::import(format!("invalid address '{value}'"), e))
}

fn feature_state(value: Option<u8>) -> Result<Option<FeatureState>, NetworkError> {
    value
        .map(|v| {
            FeatureState::try_from(v).map_err(|v| NetworkError::ImportError {
                error: format!("invalid feature state {v}"),
                cause: format!("expected 0, 1 or 2, got {v}").into(),
            })
        })
        .transpose()
}

fn model_id_hex(id: &ModelId) -> String {
    match id {
        ModelId::Sig(id) => hex16(*id),
        ModelId::Vendor { .. } => format!("{:08X}", id.as_u32()),
    }
}

fn parse_model_id(value: &str) -> Result<ModelId, NetworkError> {
    match value.len() {
        4 => Ok(ModelId::Sig(parse_hex16(value, "model id")?)),
        8 => {
            let raw = u32::from_str_radix(value, 16)
                .map_err(|e| NetworkError::import(format!("invalid model id '{value}'"), e))?;
            Ok(ModelId::Vendor {
                company_id: (raw >> 16) as u16,
                model_id: raw as u16,
            })
        }
        _ => Err(NetworkError::ImportError {
            error: format!("invalid model id '{value}'"),
            cause: "model id must have 4 or 8 hex digits".into(),
        }),
    }
}

/// Serializes the network, or the selected part of it, as a Mesh CDB document
pub fn export(network: &MeshNetwork, config: &ExportConfiguration) -> Result<Vec<u8>, NetworkError> {
    let all: Selection<u16> = Selection::All;
    let all_uuids: Selection<Uuid> = Selection::All;
    let (net_sel, app_sel, prov_sel, node_sel, group_sel, scene_sel, device_keys, partial) =
        match config {
            ExportConfiguration::Full => {
                (&all, &all, &all_uuids, &all_uuids, &all, &all, true, false)
            }
            ExportConfiguration::Partial {
                network_keys,
                application_keys,
                provisioners,
                nodes,
                groups,
                scenes,
                export_device_keys,
            } => (
                network_keys,
                application_keys,
                provisioners,
                nodes,
                groups,
                scenes,
                *export_device_keys,
                true,
            ),
        };

    let net_keys: Vec<&NetworkKey> = network
        .network_keys()
        .iter()
        .filter(|k| net_sel.contains(&k.index))
        .collect();
    if net_keys.is_empty() {
        return Err(NetworkError::AtLeastOneNetworkKeyMustBeSelected);
    }
    let net_indexes: Vec<KeyIndex> = net_keys.iter().map(|k| k.index).collect();

    let app_keys: Vec<&ApplicationKey> = network
        .application_keys()
        .iter()
        .filter(|k| app_sel.contains(&k.index) && net_indexes.contains(&k.bound_network_key()))
        .collect();
    let app_indexes: Vec<KeyIndex> = app_keys.iter().map(|k| k.index).collect();

    let nodes: Vec<&Node> = network
        .nodes()
        .iter()
        .filter(|n| node_sel.contains(&n.uuid))
        .collect();

    let subscription_hex = |address: u16| {
        network
            .group(address)
            .map(|g| address_hex(&g.address))
            .unwrap_or_else(|| hex16(address))
    };

    let document = CdbDocument {
        schema: SCHEMA.to_string(),
        id: SCHEMA_ID.to_string(),
        version: VERSION.to_string(),
        mesh_uuid: uuid_hex(&network.uuid),
        mesh_name: network.name.clone(),
        timestamp: network.timestamp,
        partial,
        net_keys: net_keys
            .iter()
            .map(|k| CdbNetKey {
                name: k.name.clone(),
                index: k.index,
                key: key_hex(k.key()),
                old_key: k.old_key().map(key_hex),
                phase: k.phase() as u8,
                min_security: k.min_security,
                timestamp: k.timestamp,
            })
            .collect(),
        app_keys: app_keys
            .iter()
            .map(|k| CdbAppKey {
                name: k.name.clone(),
                index: k.index,
                bound_net_key: k.bound_network_key(),
                key: key_hex(k.key()),
                old_key: k.old_key().map(key_hex),
            })
            .collect(),
        provisioners: network
            .provisioners()
            .iter()
            .filter(|p| prov_sel.contains(&p.uuid))
            .map(|p| CdbProvisioner {
                provisioner_name: p.name.clone(),
                uuid: uuid_hex(&p.uuid),
                allocated_unicast_range: address_ranges(&p.unicast_ranges),
                allocated_group_range: address_ranges(&p.group_ranges),
                allocated_scene_range: p
                    .scene_ranges
                    .iter()
                    .map(|r| CdbSceneRange {
                        first_scene: hex16(r.low),
                        last_scene: hex16(r.high),
                    })
                    .collect(),
            })
            .collect(),
        nodes: nodes
            .iter()
            .map(|n| CdbNode {
                uuid: uuid_hex(&n.uuid),
                name: n.name.clone(),
                unicast_address: hex16(n.primary_unicast_address),
                device_key: n.device_key.as_ref().filter(|_| device_keys).map(key_hex),
                security: n.security,
                net_keys: n
                    .net_keys
                    .iter()
                    .filter(|k| net_indexes.contains(&k.index))
                    .copied()
                    .collect(),
                app_keys: n
                    .app_keys
                    .iter()
                    .filter(|k| app_indexes.contains(&k.index))
                    .copied()
                    .collect(),
                elements: n
                    .elements
                    .iter()
                    .enumerate()
                    .map(|(index, e)| CdbElement {
                        name: e.name.clone(),
                        index: index as u8,
                        location: hex16(e.location),
                        models: e
                            .models
                            .iter()
                            .map(|m| CdbModel {
                                model_id: model_id_hex(&m.model_id),
                                subscribe: m.subscribe.iter().map(|&a| subscription_hex(a)).collect(),
                                publish: m.publish.map(|a| CdbPublish {
                                    address: subscription_hex(a),
                                }),
                                bind: m
                                    .bind
                                    .iter()
                                    .filter(|k| app_indexes.contains(k))
                                    .copied()
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
                features: CdbFeatures {
                    relay: n.features.relay.map(|s| s as u8),
                    proxy: n.features.proxy.map(|s| s as u8),
                    friend: n.features.friend.map(|s| s as u8),
                    low_power: n.features.low_power.map(|s| s as u8),
                },
                cid: n.company_identifier.map(hex16),
                pid: n.product_identifier.map(hex16),
                vid: n.version_identifier.map(hex16),
                crpl: n.minimum_replay_protection_list.map(hex16),
                config_complete: n.config_complete,
                excluded: n.excluded,
            })
            .collect(),
        groups: network
            .groups()
            .iter()
            .filter(|g| group_sel.contains(&g.address.address()))
            .map(|g| CdbGroup {
                name: g.name.clone(),
                address: address_hex(&g.address),
                parent_address: address_hex(&g.parent),
            })
            .collect(),
        scenes: network
            .scenes()
            .iter()
            .filter(|s| scene_sel.contains(&s.number))
            .map(|s| CdbScene {
                name: s.name.clone(),
                number: hex16(s.number),
                addresses: s
                    .addresses
                    .iter()
                    .filter(|&&a| nodes.iter().any(|n| n.contains_address(a)))
                    .map(|&a| hex16(a))
                    .collect(),
            })
            .collect(),
        network_exclusions: network
            .exclusions()
            .entries()
            .iter()
            .map(|e| CdbExclusion {
                iv_index: e.iv_index,
                addresses: e.addresses.iter().map(|&a| hex16(a)).collect(),
            })
            .collect(),
        iv_index: network.iv_index().index,
        iv_update_active: network.iv_index().is_iv_update_active,
    };

    let bytes = serde_json::to_vec_pretty(&document)?;
    info!(
        "Exported network {} ({} bytes, partial: {})",
        network.uuid,
        bytes.len(),
        partial
    );
    Ok(bytes)
}

fn address_ranges(ranges: &[Range]) -> Vec<CdbAddressRange> {
    ranges
        .iter()
        .map(|r| CdbAddressRange {
            low_address: hex16(r.low),
            high_address: hex16(r.high),
        })
        .collect()
}

fn parse_ranges<'a>(
    ranges: impl Iterator<Item = (&'a str, &'a str)>,
    kind: RangeKind,
) -> Result<Vec<Range>, NetworkError> {
    ranges
        .map(|(low, high)| {
            let low = parse_hex16(low, "range bound")?;
            let high = parse_hex16(high, "range bound")?;
            Range::new(low, high, kind).map_err(|e| NetworkError::import("invalid range", e))
        })
        .collect()
}

/// Builds a network from a Mesh CDB document
pub fn import(bytes: &[u8]) -> Result<MeshNetwork, NetworkError> {
    let document: CdbDocument = serde_json::from_slice(bytes)
        .map_err(|e| NetworkError::import("invalid Mesh CDB document", e))?;

    let mut network = MeshNetwork::with_uuid(
        parse_uuid(&document.mesh_uuid, "mesh UUID")?,
        document.mesh_name,
    );

    for k in document.net_keys {
        let index = k.index;
        if network.network_key(index).is_some() {
            return Err(NetworkError::import(
                format!("duplicate network key {index}"),
                NetworkError::DuplicateKeyIndex(index),
            ));
        }
        let phase = KeyRefreshPhase::try_from(k.phase).map_err(|p| NetworkError::ImportError {
            error: format!("invalid phase of network key {index}"),
            cause: format!("unknown Key Refresh phase {p}").into(),
        })?;
        let old_key = k
            .old_key
            .as_deref()
            .map(|old| parse_hex_key(old, "old network key"))
            .transpose()?;
        let key = NetworkKey::restore(
            index,
            k.name,
            parse_hex_key(&k.key, "network key")?,
            old_key,
            phase,
            k.min_security,
            k.timestamp,
        )
        .map_err(|e| NetworkError::import(format!("invalid network key {index}"), e))?;
        network.network_keys.push(key);
    }

    for k in document.app_keys {
        let index = k.index;
        if network.application_key(index).is_some() {
            return Err(NetworkError::import(
                format!("duplicate application key {index}"),
                NetworkError::DuplicateKeyIndex(index),
            ));
        }
        if network.network_key(k.bound_net_key).is_none() {
            return Err(NetworkError::import(
                format!("application key {index} bound to unknown network key"),
                NetworkError::NetworkKeyNotFound(k.bound_net_key),
            ));
        }
        let old_key = k
            .old_key
            .as_deref()
            .map(|old| parse_hex_key(old, "old application key"))
            .transpose()?;
        let key = ApplicationKey::restore(
            index,
            k.name,
            parse_hex_key(&k.key, "application key")?,
            old_key,
            k.bound_net_key,
        )
        .map_err(|e| NetworkError::import(format!("invalid application key {index}"), e))?;
        network.application_keys.push(key);
    }

    for p in document.provisioners {
        let mut provisioner = Provisioner::new(parse_uuid(&p.uuid, "provisioner UUID")?, p.provisioner_name);
        provisioner.unicast_ranges = parse_ranges(
            p.allocated_unicast_range
                .iter()
                .map(|r| (r.low_address.as_str(), r.high_address.as_str())),
            RangeKind::Unicast,
        )?;
        provisioner.group_ranges = parse_ranges(
            p.allocated_group_range
                .iter()
                .map(|r| (r.low_address.as_str(), r.high_address.as_str())),
            RangeKind::Group,
        )?;
        provisioner.scene_ranges = parse_ranges(
            p.allocated_scene_range
                .iter()
                .map(|r| (r.first_scene.as_str(), r.last_scene.as_str())),
            RangeKind::Scene,
        )?;
        network
            .add_provisioner(provisioner)
            .map_err(|e| NetworkError::import("invalid provisioner", e))?;
    }

    for n in document.nodes {
        let node = import_node(n)?;
        network
            .add_node(node)
            .map_err(|e| NetworkError::import("invalid node", e))?;
    }

    let mut parents = Vec::new();
    for g in document.groups {
        let address = parse_address(&g.address)?;
        let parent = parse_address(&g.parent_address)?;
        network
            .add_group(Group::new(g.name, address))
            .map_err(|e| NetworkError::import("invalid group", e))?;
        parents.push((address.address(), parent));
    }
    for (address, parent) in parents {
        if parent != MeshAddress::Unassigned && network.group(parent.address()).is_none() {
            return Err(NetworkError::import(
                format!("group {address:04X} has an unknown parent"),
                NetworkError::GroupNotFound(parent.address()),
            ));
        }
        if let Some(group) = network.groups.iter_mut().find(|g| g.address.address() == address) {
            group.parent = parent;
        }
    }

    for s in document.scenes {
        let mut scene = Scene::new(s.name, parse_hex16(&s.number, "scene number")?);
        scene.addresses = s
            .addresses
            .iter()
            .map(|a| parse_hex16(a, "scene address"))
            .collect::<Result<_, _>>()?;
        network
            .add_scene(scene)
            .map_err(|e| NetworkError::import("invalid scene", e))?;
    }

    let exclusions = document
        .network_exclusions
        .into_iter()
        .map(|e| {
            Ok(ExclusionEntry {
                iv_index: e.iv_index,
                addresses: e
                    .addresses
                    .iter()
                    .map(|a| parse_hex16(a, "excluded address"))
                    .collect::<Result<_, NetworkError>>()?,
            })
        })
        .collect::<Result<Vec<_>, NetworkError>>()?;
    network.exclusions = ExclusionList::from_entries(exclusions);

    network.iv_index = IvIndex {
        index: document.iv_index,
        is_iv_update_active: document.iv_update_active,
        transition_date: None,
    };
    network.partial = document.partial;
    network.timestamp = document.timestamp;

    debug!(
        "Imported {} network keys, {} nodes",
        network.network_keys().len(),
        network.nodes().len()
    );
    info!("Imported network {} ({})", network.name, network.uuid);
    Ok(network)
}

fn import_node(n: CdbNode) -> Result<Node, NetworkError> {
    let uuid = parse_uuid(&n.uuid, "node UUID")?;
    let address = parse_hex16(&n.unicast_address, "unicast address")?;
    let device_key = n
        .device_key
        .as_deref()
        .map(|k| parse_hex_key(k, "device key"))
        .transpose()?;
    let optional_hex = |value: &Option<String>, what: &str| {
        value.as_deref().map(|v| parse_hex16(v, what)).transpose()
    };

    let mut elements = Vec::with_capacity(n.elements.len());
    for e in n.elements {
        let mut models = Vec::with_capacity(e.models.len());
        for m in e.models {
            let mut model = Model::new(parse_model_id(&m.model_id)?);
            model.bind = m.bind;
            model.subscribe = m
                .subscribe
                .iter()
                .map(|a| parse_address(a).map(|a| a.address()))
                .collect::<Result<_, _>>()?;
            model.publish = m
                .publish
                .map(|p| parse_address(&p.address).map(|a| a.address()))
                .transpose()?;
            models.push(model);
        }
        elements.push(Element {
            name: e.name,
            location: parse_hex16(&e.location, "location")?,
            models,
        });
    }
    if elements.is_empty() {
        elements.push(Element::default());
    }

    Ok(Node {
        uuid,
        name: n.name,
        primary_unicast_address: address,
        device_key,
        security: n.security,
        net_keys: n.net_keys,
        app_keys: n.app_keys,
        elements,
        features: NodeFeatures {
            relay: feature_state(n.features.relay)?,
            proxy: feature_state(n.features.proxy)?,
            friend: feature_state(n.features.friend)?,
            low_power: feature_state(n.features.low_power)?,
        },
        company_identifier: optional_hex(&n.cid, "company identifier")?,
        product_identifier: optional_hex(&n.pid, "product identifier")?,
        version_identifier: optional_hex(&n.vid, "version identifier")?,
        minimum_replay_protection_list: optional_hex(&n.crpl, "replay protection list size")?,
        config_complete: n.config_complete,
        excluded: n.excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn sample() -> MeshNetwork {
        let mut network = MeshNetwork::create("Home", "Phone").unwrap();
        network.add_network_key(1, &[0x11; 16], "Guest").unwrap();
        network.add_application_key(0, &[0x22; 16], 0, "Lights").unwrap();
        network.add_application_key(1, &[0x33; 16], 1, "Guest App").unwrap();
        network.add_node_application_key(0x0001, 0).unwrap();

        let label = Uuid::parse_str("f4a002c7-fb1e-4ca0-a469-a021de0db875").unwrap();
        network.add_group(Group::new("Kitchen", MeshAddress::Group(0xC001))).unwrap();
        network.add_group(Group::new("Virtual", MeshAddress::from_label(label))).unwrap();

        let uuid = Uuid::new_v4();
        network
            .provision_node(uuid, "Lamp", [0x44; 16], 2, 0, None)
            .unwrap();
        let mut scene = Scene::new("Evening", 3);
        scene.addresses.push(0x0002);
        network.add_scene(scene).unwrap();
        network.set_iv_index(7, true).unwrap();
        network
    }

    #[test]
    fn test_full_export_import() {
        let network = sample();
        let bytes = export(&network, &ExportConfiguration::Full).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"meshUUID\""));
        assert!(text.contains(&"22".repeat(16)));
        assert!(text.contains("\"C001\""));

        let imported = import(&bytes).unwrap();
        assert_eq!(imported.uuid, network.uuid);
        assert_eq!(imported.name, "Home");
        assert!(!imported.is_partial());
        assert_eq!(imported.network_keys().len(), 2);
        assert_eq!(imported.network_key(1).unwrap().key(), &[0x11; 16]);
        assert_eq!(imported.application_key(0).unwrap().aid(), network.application_key(0).unwrap().aid());
        assert_eq!(imported.nodes().len(), 2);
        assert_eq!(imported.node_for_address(0x0003).unwrap().name, "Lamp");
        assert_eq!(imported.group(0x9736).unwrap().name, "Virtual");
        assert_eq!(imported.scene(3).unwrap().addresses, vec![0x0002]);
        assert_eq!(imported.iv_index().index, 7);
        assert!(imported.iv_index().is_iv_update_active);
        assert_eq!(imported.local_provisioner().unwrap().unicast_ranges.len(), 1);
    }

    #[test]
    fn test_partial_export() {
        let network = sample();
        let lamp = network.node_for_address(0x0002).unwrap().uuid;
        let config = ExportConfiguration::Partial {
            network_keys: Selection::Only(vec![0]),
            application_keys: Selection::All,
            provisioners: Selection::Only(vec![]),
            nodes: Selection::Only(vec![lamp]),
            groups: Selection::Only(vec![0xC001]),
            scenes: Selection::All,
            export_device_keys: false,
        };
        let imported = import(&export(&network, &config).unwrap()).unwrap();

        assert!(imported.is_partial());
        assert_eq!(imported.network_keys().len(), 1);
        assert_eq!(imported.application_keys().len(), 1);
        assert!(imported.provisioners().is_empty());
        assert_eq!(imported.nodes().len(), 1);
        assert!(imported.nodes()[0].device_key.is_none());
        assert_eq!(imported.groups().len(), 1);
    }

    #[test]
    fn test_partial_export_requires_network_key() {
        let network = sample();
        let config = ExportConfiguration::Partial {
            network_keys: Selection::Only(vec![]),
            application_keys: Selection::All,
            provisioners: Selection::All,
            nodes: Selection::All,
            groups: Selection::All,
            scenes: Selection::All,
            export_device_keys: true,
        };
        assert!(matches!(
            export(&network, &config),
            Err(NetworkError::AtLeastOneNetworkKeyMustBeSelected)
        ));
    }

    #[test]
    fn test_import_rejects_garbage() {
        let err = import(b"{not json").unwrap_err();
        assert!(matches!(err, NetworkError::ImportError { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_import_rejects_bad_key() {
        let document = serde_json::json!({
            "meshUUID": "9D6DD0E96E8A4BC4B0DC3FA0AE6E5EA4",
            "meshName": "Broken",
            "timestamp": "2024-01-01T00:00:00Z",
            "netKeys": [{
                "name": "Primary",
                "index": 0,
                "key": "0011",
                "phase": 0,
                "minSecurity": "secure",
                "timestamp": "2024-01-01T00:00:00Z"
            }]
        });
        let err = import(document.to_string().as_bytes()).unwrap_err();
        match err {
            NetworkError::ImportError { error, .. } => assert_eq!(error, "invalid network key"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_import_rejects_dangling_app_key() {
        let document = serde_json::json!({
            "meshUUID": "9D6DD0E96E8A4BC4B0DC3FA0AE6E5EA4",
            "meshName": "Dangling",
            "timestamp": "2024-01-01T00:00:00Z",
            "netKeys": [{
                "name": "Primary",
                "index": 0,
                "key": "7DD7364CD842AD18C17C2B820C84C3D6",
                "phase": 0,
                "minSecurity": "secure",
                "timestamp": "2024-01-01T00:00:00Z"
            }],
            "appKeys": [{
                "name": "App",
                "index": 0,
                "boundNetKey": 3,
                "key": "63964771734FBD76E3B40519D1D94A48"
            }]
        });
        let err = import(document.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, NetworkError::ImportError { .. }));
    }

    #[test]
    fn test_vendor_model_id_hex() {
        let id = ModelId::Vendor {
            company_id: 0x0059,
            model_id: 0x000A,
        };
        assert_eq!(model_id_hex(&id), "0059000A");
        assert_eq!(parse_model_id("0059000A").unwrap(), id);
        assert_eq!(parse_model_id("1000").unwrap(), ModelId::Sig(0x1000));
        assert!(parse_model_id("100").is_err());
    }
}
