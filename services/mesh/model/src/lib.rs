//! Bluetooth Mesh network model.
//!
//! [`MeshNetwork`] holds the keys, provisioners, nodes, groups and scenes of
//! a mesh network and enforces its invariants: unique key indexes, disjoint
//! provisioner ranges, non-overlapping node addresses and a monotonic IV
//! index. [`NetworkHandle`] runs a network inside a task that persists every
//! change through [`mesh_storage`] and broadcasts [`NetworkEvent`]s.
//! Networks are exchanged as Mesh Configuration Database documents via
//! [`cdb::export`] and [`cdb::import`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod cdb;
pub mod error;
pub mod exclusion;
pub mod group;
pub mod handle;
pub mod iv_index;
pub mod keys;
pub mod network;
pub mod node;
pub mod provisioner;
pub mod replay;

pub use address::{MeshAddress, Range, RangeKind};
pub use cdb::{ExportConfiguration, Selection};
pub use error::NetworkError;
pub use exclusion::{ExclusionEntry, ExclusionList};
pub use group::{Group, Scene};
pub use handle::{NetworkEvent, NetworkHandle};
pub use iv_index::IvIndex;
pub use keys::{generate_key, ApplicationKey, KeyIndex, KeyRefreshPhase, NetworkKey, Security};
pub use network::{MeshNetwork, MAX_SEQUENCE_NUMBER};
pub use node::{
    Element, FeatureFlags, FeatureState, Model, ModelId, Node, NodeComposition, NodeFeatures,
    NodeKey,
};
pub use provisioner::Provisioner;
pub use replay::{seq_auth, ReplayGuard};
