//! Replay protection.
//!
//! Messages are accepted from a source only when their SeqAuth,
//! `(iv_index << 24) | seq`, is above the last one accepted from it.

use crate::error::NetworkError;
use mesh_storage::{SecureStateStore, SeqAuth};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// SeqAuth of a message
pub fn seq_auth(iv_index: u32, seq: u32) -> u64 {
    (u64::from(iv_index) << 24) | u64::from(seq & 0x00FF_FFFF)
}

/// Replay protection list of one network backed by a [`SecureStateStore`].
///
/// Clones share the lock that makes check-and-record atomic.
#[derive(Clone)]
pub struct ReplayGuard {
    network: Uuid,
    store: Arc<dyn SecureStateStore>,
    lock: Arc<Mutex<()>>,
}

impl ReplayGuard {
    /// Guard for `network`
    pub fn new(network: Uuid, store: Arc<dyn SecureStateStore>) -> Self {
        Self {
            network,
            store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Accepts a message if it is newer than anything seen from `source`
    /// and records it. Returns `false` for a replayed message.
    pub async fn check_and_record(
        &self,
        source: u16,
        iv_index: u32,
        seq: u32,
    ) -> Result<bool, NetworkError> {
        let value = seq_auth(iv_index, seq);
        let _guard = self.lock.lock().await;
        let record = self.store.seq_auth(self.network, source).await?;

        if let Some(record) = record {
            if value <= record.last {
                debug!(
                    "Replay from {:#06x} rejected: {:#x} <= {:#x}",
                    source, value, record.last
                );
                return Ok(false);
            }
        }

        self.store
            .store_seq_auth(
                self.network,
                source,
                SeqAuth {
                    last: value,
                    previous: record.map(|r| r.last),
                },
            )
            .await?;
        Ok(true)
    }

    /// Whether a segment of a segmented message may still be processed.
    ///
    /// Segments share the SeqAuth of the first one, so a value equal to the
    /// last or the previous accepted SeqAuth belongs to a message in flight.
    pub async fn accepts_segment(
        &self,
        source: u16,
        iv_index: u32,
        seq_zero_auth: u32,
    ) -> Result<bool, NetworkError> {
        let value = seq_auth(iv_index, seq_zero_auth);
        let _guard = self.lock.lock().await;
        Ok(match self.store.seq_auth(self.network, source).await? {
            None => true,
            Some(record) => value >= record.last || record.previous == Some(value),
        })
    }

    /// Forgets everything seen from `source`, e.g. when its node is removed
    pub async fn forget(&self, source: u16) -> Result<(), NetworkError> {
        let _guard = self.lock.lock().await;
        self.store.remove_seq_auth(self.network, source).await?;
        Ok(())
    }
}
