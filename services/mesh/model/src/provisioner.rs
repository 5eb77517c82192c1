//! Provisioners and the ranges they own.

use crate::address::{Range, RangeKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A provisioner of the network.
///
/// The unicast range bounds the addresses it may assign to new nodes, the
/// group and scene ranges bound the groups and scenes it may create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioner {
    /// Provisioner UUID; the node representing it shares the UUID
    pub uuid: Uuid,
    /// Human readable name
    pub name: String,
    /// Allocated unicast ranges
    pub unicast_ranges: Vec<Range>,
    /// Allocated group ranges
    pub group_ranges: Vec<Range>,
    /// Allocated scene ranges
    pub scene_ranges: Vec<Range>,
}

impl Provisioner {
    /// A provisioner without ranges
    pub fn new(uuid: Uuid, name: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            unicast_ranges: Vec::new(),
            group_ranges: Vec::new(),
            scene_ranges: Vec::new(),
        }
    }

    /// Ranges of the given kind
    pub fn ranges(&self, kind: RangeKind) -> &[Range] {
        match kind {
            RangeKind::Unicast => &self.unicast_ranges,
            RangeKind::Group => &self.group_ranges,
            RangeKind::Scene => &self.scene_ranges,
        }
    }

    pub(crate) fn ranges_mut(&mut self, kind: RangeKind) -> &mut Vec<Range> {
        match kind {
            RangeKind::Unicast => &mut self.unicast_ranges,
            RangeKind::Group => &mut self.group_ranges,
            RangeKind::Scene => &mut self.scene_ranges,
        }
    }

    /// Whether `value` lies in one of the ranges of `kind`
    pub fn owns(&self, kind: RangeKind, value: u16) -> bool {
        self.ranges(kind).iter().any(|r| r.contains(value))
    }

    /// Whether any range of `kind` overlaps `range`
    pub fn overlaps(&self, kind: RangeKind, range: &Range) -> bool {
        self.ranges(kind).iter().any(|r| r.overlaps(range))
    }
}
