//! Addresses of removed nodes.
//!
//! A removed node may still hold keys and replay state, so its addresses are
//! not handed out again until the IV index has moved on by two.

use serde::{Deserialize, Serialize};

/// Addresses excluded at one IV index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionEntry {
    /// IV index at the time of removal
    pub iv_index: u32,
    /// Excluded unicast addresses
    pub addresses: Vec<u16>,
}

/// Network exclusion list
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExclusionList {
    entries: Vec<ExclusionEntry>,
}

impl ExclusionList {
    /// Builds a list from stored entries
    pub fn from_entries(entries: Vec<ExclusionEntry>) -> Self {
        Self { entries }
    }

    /// Stored entries
    pub fn entries(&self) -> &[ExclusionEntry] {
        &self.entries
    }

    /// Excludes `addresses` at `iv_index`
    pub fn exclude(&mut self, addresses: impl IntoIterator<Item = u16>, iv_index: u32) {
        let idx = match self.entries.iter().position(|e| e.iv_index == iv_index) {
            Some(idx) => idx,
            None => {
                self.entries.push(ExclusionEntry {
                    iv_index,
                    addresses: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[idx];
        for address in addresses {
            if !entry.addresses.contains(&address) {
                entry.addresses.push(address);
            }
        }
    }

    /// Whether `address` is excluded
    pub fn is_excluded(&self, address: u16) -> bool {
        self.entries.iter().any(|e| e.addresses.contains(&address))
    }

    /// Drops entries the IV index has advanced past by at least two
    pub fn cleanup(&mut self, iv_index: u32) {
        self.entries
            .retain(|e| iv_index < e.iv_index.saturating_add(2));
    }
}
