//! IV index state.

use chrono::{DateTime, Utc};
use mesh_storage::IvIndexRecord;
use serde::{Deserialize, Serialize};

/// Current IV index and IV Update state of a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IvIndex {
    /// 32-bit IV index
    pub index: u32,
    /// Whether the IV Update procedure is in progress
    pub is_iv_update_active: bool,
    /// When the index or state last changed
    pub transition_date: Option<DateTime<Utc>>,
}

impl IvIndex {
    /// IV index used to secure outgoing messages.
    ///
    /// While an IV Update is in progress messages are still sent with the
    /// previous index.
    pub fn transmit_index(&self) -> u32 {
        if self.is_iv_update_active {
            self.index.saturating_sub(1)
        } else {
            self.index
        }
    }

    /// IVI bit of the transmit index
    pub fn ivi(&self) -> u8 {
        (self.transmit_index() & 1) as u8
    }
}

impl From<IvIndexRecord> for IvIndex {
    fn from(record: IvIndexRecord) -> Self {
        Self {
            index: record.index,
            is_iv_update_active: record.is_iv_update_active,
            transition_date: record.transition_date,
        }
    }
}

impl From<IvIndex> for IvIndexRecord {
    fn from(iv: IvIndex) -> Self {
        Self {
            index: iv.index,
            is_iv_update_active: iv.is_iv_update_active,
            transition_date: iv.transition_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_index() {
        let normal = IvIndex {
            index: 5,
            ..Default::default()
        };
        assert_eq!(normal.transmit_index(), 5);
        assert_eq!(normal.ivi(), 1);

        let updating = IvIndex {
            index: 6,
            is_iv_update_active: true,
            transition_date: None,
        };
        assert_eq!(updating.transmit_index(), 5);
    }
}
