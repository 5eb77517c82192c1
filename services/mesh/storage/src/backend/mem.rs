//! In-memory storage backend for development and testing

use crate::{IvIndexRecord, NetworkStore, SecureStateStore, SeqAuth, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory implementation of both stores
pub struct MemoryStore {
    /// Serialized networks by UUID
    networks: Arc<DashMap<Uuid, Bytes>>,
    /// UUID of the last saved network
    current: Arc<RwLock<Option<Uuid>>>,
    /// IV index per network
    iv_index: Arc<DashMap<Uuid, IvIndexRecord>>,
    /// Next sequence number per (network, element address)
    sequence_numbers: Arc<DashMap<(Uuid, u16), u32>>,
    /// Replay protection per (network, source address)
    seq_auth: Arc<DashMap<(Uuid, u16), SeqAuth>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            networks: Arc::new(DashMap::new()),
            current: Arc::new(RwLock::new(None)),
            iv_index: Arc::new(DashMap::new()),
            sequence_numbers: Arc::new(DashMap::new()),
            seq_auth: Arc::new(DashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkStore for MemoryStore {
    async fn load(&self) -> Result<Option<Bytes>, StorageError> {
        let current = *self.current.read().await;
        Ok(current.and_then(|uuid| self.networks.get(&uuid).map(|v| v.clone())))
    }

    async fn save(&self, network: Uuid, data: &[u8]) -> Result<(), StorageError> {
        debug!("Network save uuid={} len={}", network, data.len());
        self.networks.insert(network, Bytes::copy_from_slice(data));
        *self.current.write().await = Some(network);
        Ok(())
    }
}

#[async_trait]
impl SecureStateStore for MemoryStore {
    async fn iv_index(&self, network: Uuid) -> Result<Option<IvIndexRecord>, StorageError> {
        Ok(self.iv_index.get(&network).map(|v| *v))
    }

    async fn store_iv_index(
        &self,
        network: Uuid,
        record: IvIndexRecord,
    ) -> Result<(), StorageError> {
        debug!(
            "IV index store uuid={} index={} update_active={}",
            network, record.index, record.is_iv_update_active
        );
        self.iv_index.insert(network, record);
        Ok(())
    }

    async fn sequence_number(
        &self,
        network: Uuid,
        address: u16,
    ) -> Result<Option<u32>, StorageError> {
        Ok(self.sequence_numbers.get(&(network, address)).map(|v| *v))
    }

    async fn store_sequence_number(
        &self,
        network: Uuid,
        address: u16,
        next: u32,
    ) -> Result<(), StorageError> {
        self.sequence_numbers.insert((network, address), next);
        Ok(())
    }

    async fn reset_sequence_numbers(&self, network: Uuid) -> Result<(), StorageError> {
        debug!("Sequence numbers reset uuid={}", network);
        for mut entry in self.sequence_numbers.iter_mut() {
            if entry.key().0 == network {
                *entry.value_mut() = 0;
            }
        }
        Ok(())
    }

    async fn seq_auth(&self, network: Uuid, source: u16) -> Result<Option<SeqAuth>, StorageError> {
        Ok(self.seq_auth.get(&(network, source)).map(|v| *v))
    }

    async fn store_seq_auth(
        &self,
        network: Uuid,
        source: u16,
        seq_auth: SeqAuth,
    ) -> Result<(), StorageError> {
        self.seq_auth.insert((network, source), seq_auth);
        Ok(())
    }

    async fn remove_seq_auth(&self, network: Uuid, source: u16) -> Result<(), StorageError> {
        self.seq_auth.remove(&(network, source));
        Ok(())
    }
}
