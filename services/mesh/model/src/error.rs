//! Network model error types.

use crate::keys::{KeyIndex, KeyRefreshPhase};
use mesh_storage::StorageError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by operations on a [`crate::MeshNetwork`].
///
/// Every variant names one violated condition; a failed operation leaves the
/// network unchanged.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Key index above 4095
    #[error("key index {0} out of range")]
    KeyIndexOutOfRange(KeyIndex),

    /// A key of the same kind already uses the index
    #[error("key index {0} already in use")]
    DuplicateKeyIndex(KeyIndex),

    /// Key material is not 128 bits
    #[error("invalid key length: {0}")]
    InvalidKeyLength(usize),

    /// Key is known by a node or referenced by another key
    #[error("key {0} is in use")]
    KeyInUse(KeyIndex),

    /// Removing the key would leave the local node without a network key
    #[error("key {0} cannot be removed")]
    CannotRemove(KeyIndex),

    /// Operation not allowed in the key's current Key Refresh phase
    #[error("key {index} is in phase {phase:?}")]
    InvalidKeyRefreshPhase {
        /// Network key index
        index: KeyIndex,
        /// Current phase
        phase: KeyRefreshPhase,
    },

    /// A node with the same UUID already exists
    #[error("node {0} already exists")]
    NodeAlreadyExists(Uuid),

    /// A provisioner with the same UUID already exists
    #[error("provisioner {0} already exists")]
    ProvisionerAlreadyExists(Uuid),

    /// Range overlaps a range of another provisioner
    #[error("range overlaps another provisioner's range")]
    OverlappingProvisionerRanges,

    /// Range overlaps a range the provisioner already owns
    #[error("range already allocated")]
    RangeAlreadyAllocated,

    /// Range bounds are inverted or outside the address kind
    #[error("invalid range {low:#06x}..={high:#06x}")]
    InvalidRange {
        /// Lower bound
        low: u16,
        /// Upper bound
        high: u16,
    },

    /// Unicast address already assigned or excluded
    #[error("address {0:#06x} already in use")]
    AddressAlreadyInUse(u16),

    /// No free block of unicast addresses in the provisioner's ranges
    #[error("no addresses available")]
    NoAddressesAvailable,

    /// Unicast address outside the provisioner's ranges
    #[error("address {0:#06x} not in allocated ranges")]
    AddressNotInAllocatedRanges(u16),

    /// Address of the wrong kind for the operation
    #[error("invalid address {0:#06x}")]
    InvalidAddress(u16),

    /// New IV index below the current one
    #[error("IV index {requested} is smaller than current {current}")]
    IvIndexTooSmall {
        /// Current IV index
        current: u32,
        /// Rejected IV index
        requested: u32,
    },

    /// IV Update transition that would move the transmit IV index back
    #[error("IV index {index} (update active: {update_active}) not reachable from the current state")]
    InvalidIvUpdateTransition {
        /// Rejected IV index
        index: u32,
        /// Rejected IV Update flag
        update_active: bool,
    },

    /// The 24-bit sequence number of a source is used up
    #[error("sequence numbers of {0:#06x} exhausted")]
    SequenceNumberExhausted(u16),

    /// A group with the same address already exists
    #[error("group {0:#06x} already exists")]
    GroupAlreadyExists(u16),

    /// Group is subscribed to, published to, or parents another group
    #[error("group {0:#06x} is in use")]
    GroupInUse(u16),

    /// A scene with the same number already exists
    #[error("scene {0:#06x} already exists")]
    SceneAlreadyExists(u16),

    /// Scene is stored on at least one node
    #[error("scene {0:#06x} is in use")]
    SceneInUse(u16),

    /// Scene number 0x0000 is prohibited
    #[error("invalid scene number {0:#06x}")]
    InvalidSceneNumber(u16),

    /// Partial export without network keys
    #[error("at least one network key must be selected")]
    AtLeastOneNetworkKeyMustBeSelected,

    /// Network key lookup failed
    #[error("network key {0} not found")]
    NetworkKeyNotFound(KeyIndex),

    /// Application key lookup failed
    #[error("application key {0} not found")]
    ApplicationKeyNotFound(KeyIndex),

    /// Node lookup failed
    #[error("node {0} not found")]
    NodeNotFound(Uuid),

    /// Provisioner lookup failed
    #[error("provisioner {0} not found")]
    ProvisionerNotFound(Uuid),

    /// Group lookup failed
    #[error("group {0:#06x} not found")]
    GroupNotFound(u16),

    /// Scene lookup failed
    #[error("scene {0:#06x} not found")]
    SceneNotFound(u16),

    /// The network has no provisioner
    #[error("network has no local provisioner")]
    NoLocalProvisioner,

    /// Mesh CDB document could not be imported
    #[error("import failed: {error}")]
    ImportError {
        /// What was wrong with the document
        error: String,
        /// Underlying parse failure
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Mesh CDB document could not be produced
    #[error("export failed: {0}")]
    ExportError(#[from] serde_json::Error),

    /// Persistence failure
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The network task has stopped
    #[error("network task closed")]
    Closed,
}

impl NetworkError {
    /// Builds an [`NetworkError::ImportError`] keeping `cause` as its source
    pub fn import<E>(error: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        NetworkError::ImportError {
            error: error.into(),
            cause: Box::new(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_import_error_keeps_source() {
        let cause = serde_json::from_str::<u32>("x").unwrap_err();
        let err = NetworkError::import("invalid document", cause);
        assert_eq!(err.to_string(), "import failed: invalid document");
        assert!(err.source().is_some());
    }
}
