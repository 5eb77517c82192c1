//! Mesh addresses and address ranges.
//!
//! ```text
//! 0x0000           unassigned
//! 0x0001..=0x7FFF  unicast
//! 0x8000..=0xBFFF  virtual (hash of a Label UUID)
//! 0xC000..=0xFEFF  group
//! 0xFF00..=0xFFFF  fixed and reserved group addresses
//! ```

use crate::error::NetworkError;
use mesh_crypto::create_virtual_address;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The unassigned address
pub const UNASSIGNED_ADDRESS: u16 = 0x0000;
/// Lowest unicast address
pub const MIN_UNICAST_ADDRESS: u16 = 0x0001;
/// Highest unicast address
pub const MAX_UNICAST_ADDRESS: u16 = 0x7FFF;
/// Lowest virtual address
pub const MIN_VIRTUAL_ADDRESS: u16 = 0x8000;
/// Highest virtual address
pub const MAX_VIRTUAL_ADDRESS: u16 = 0xBFFF;
/// Lowest group address
pub const MIN_GROUP_ADDRESS: u16 = 0xC000;
/// Highest group address a provisioner may allocate
pub const MAX_GROUP_ADDRESS: u16 = 0xFEFF;

/// All directed forwarding nodes
pub const ALL_DIRECTED_FORWARDING_NODES: u16 = 0xFFFB;
/// All proxies
pub const ALL_PROXIES: u16 = 0xFFFC;
/// All friends
pub const ALL_FRIENDS: u16 = 0xFFFD;
/// All relays
pub const ALL_RELAYS: u16 = 0xFFFE;
/// All nodes
pub const ALL_NODES: u16 = 0xFFFF;

/// Whether `address` is a unicast address
pub fn is_unicast(address: u16) -> bool {
    (MIN_UNICAST_ADDRESS..=MAX_UNICAST_ADDRESS).contains(&address)
}

/// Whether `address` is a virtual address
pub fn is_virtual(address: u16) -> bool {
    (MIN_VIRTUAL_ADDRESS..=MAX_VIRTUAL_ADDRESS).contains(&address)
}

/// Whether `address` is a group address, fixed groups included
pub fn is_group(address: u16) -> bool {
    address >= MIN_GROUP_ADDRESS
}

/// Whether `address` is one of the fixed group addresses
pub fn is_fixed_group(address: u16) -> bool {
    address >= ALL_DIRECTED_FORWARDING_NODES
}

/// A typed mesh address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshAddress {
    /// 0x0000
    Unassigned,
    /// Element address
    Unicast(u16),
    /// Virtual address together with its Label UUID
    Virtual {
        /// 16-bit hash
        address: u16,
        /// Label UUID the hash was computed from
        label: Uuid,
    },
    /// Group address
    Group(u16),
}

impl MeshAddress {
    /// Virtual address of a Label UUID
    pub fn from_label(label: Uuid) -> Self {
        MeshAddress::Virtual {
            address: create_virtual_address(label.as_bytes()),
            label,
        }
    }

    /// 16-bit address value
    pub fn address(&self) -> u16 {
        match *self {
            MeshAddress::Unassigned => UNASSIGNED_ADDRESS,
            MeshAddress::Unicast(address) | MeshAddress::Group(address) => address,
            MeshAddress::Virtual { address, .. } => address,
        }
    }

    /// Label UUID of a virtual address
    pub fn label(&self) -> Option<Uuid> {
        match self {
            MeshAddress::Virtual { label, .. } => Some(*label),
            _ => None,
        }
    }
}

impl TryFrom<u16> for MeshAddress {
    type Error = NetworkError;

    /// Virtual addresses cannot be built from their hash alone
    fn try_from(address: u16) -> Result<Self, Self::Error> {
        match address {
            UNASSIGNED_ADDRESS => Ok(MeshAddress::Unassigned),
            a if is_unicast(a) => Ok(MeshAddress::Unicast(a)),
            a if is_group(a) => Ok(MeshAddress::Group(a)),
            a => Err(NetworkError::InvalidAddress(a)),
        }
    }
}

impl fmt::Display for MeshAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshAddress::Virtual { label, .. } => write!(f, "{}", label.simple()),
            other => write!(f, "{:04X}", other.address()),
        }
    }
}

/// Kind of range a provisioner can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeKind {
    /// Unicast addresses for new nodes
    Unicast,
    /// Group addresses
    Group,
    /// Scene numbers
    Scene,
}

impl RangeKind {
    /// Inclusive bounds of valid values for this kind
    pub fn bounds(self) -> (u16, u16) {
        match self {
            RangeKind::Unicast => (MIN_UNICAST_ADDRESS, MAX_UNICAST_ADDRESS),
            RangeKind::Group => (MIN_GROUP_ADDRESS, MAX_GROUP_ADDRESS),
            RangeKind::Scene => (0x0001, 0xFFFF),
        }
    }
}

/// Inclusive range of addresses or scene numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    /// First value
    pub low: u16,
    /// Last value
    pub high: u16,
}

impl Range {
    /// Creates a range valid for `kind`
    pub fn new(low: u16, high: u16, kind: RangeKind) -> Result<Self, NetworkError> {
        let (min, max) = kind.bounds();
        if low > high || low < min || high > max {
            return Err(NetworkError::InvalidRange { low, high });
        }
        Ok(Self { low, high })
    }

    /// Whether `value` lies in the range
    pub fn contains(&self, value: u16) -> bool {
        (self.low..=self.high).contains(&value)
    }

    /// Whether `other` lies entirely in the range
    pub fn contains_range(&self, other: &Range) -> bool {
        self.contains(other.low) && self.contains(other.high)
    }

    /// Whether the two ranges share at least one value
    pub fn overlaps(&self, other: &Range) -> bool {
        self.low <= other.high && other.low <= self.high
    }

    /// Number of values in the range
    pub fn count(&self) -> u32 {
        u32::from(self.high) - u32::from(self.low) + 1
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}-{:04X}", self.low, self.high)
    }
}
