//! Persistence for mesh networks with pluggable backends.
//!
//! Two kinds of state are kept apart:
//!
//! - the network configuration itself, an opaque byte blob (a Mesh CDB
//!   document) saved whenever the caller decides to persist a mutation, and
//! - the security state that must survive a restart even when the
//!   configuration is not saved: the IV index, the next outgoing sequence
//!   number of each local element and the last SeqAuth seen from each source.
//!
//! Losing the second kind allows replay attacks or makes the node reuse
//! nonces, so backends write it through on every update.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Entry not found
    #[error("Entry not found")]
    NotFound,
    /// Invalid operation
    #[error("Invalid operation: {0}")]
    Invalid(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted IV index state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvIndexRecord {
    /// Current IV index
    pub index: u32,
    /// Whether the IV Update procedure is in progress
    pub is_iv_update_active: bool,
    /// When the IV index or its state last changed
    pub transition_date: Option<DateTime<Utc>>,
}

/// Replay protection record of one source address.
///
/// A SeqAuth is `(iv_index << 24) | seq`. `previous` holds the value `last`
/// replaced, which lets a segmented message still in flight complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqAuth {
    /// Highest SeqAuth accepted from the source
    pub last: u64,
    /// SeqAuth accepted before `last`
    pub previous: Option<u64>,
}

/// Store for the serialized network configuration
#[async_trait]
pub trait NetworkStore: Send + Sync {
    /// Load the most recently saved network, if any
    async fn load(&self) -> Result<Option<Bytes>, StorageError>;

    /// Save a network under its UUID and make it the one returned by [`NetworkStore::load`]
    async fn save(&self, network: Uuid, data: &[u8]) -> Result<(), StorageError>;
}

/// Store for state that must never go backwards
#[async_trait]
pub trait SecureStateStore: Send + Sync {
    /// Load the IV index of a network
    async fn iv_index(&self, network: Uuid) -> Result<Option<IvIndexRecord>, StorageError>;

    /// Store the IV index of a network
    async fn store_iv_index(&self, network: Uuid, record: IvIndexRecord)
        -> Result<(), StorageError>;

    /// Load the next sequence number of a local element
    async fn sequence_number(&self, network: Uuid, address: u16)
        -> Result<Option<u32>, StorageError>;

    /// Store the next sequence number of a local element
    async fn store_sequence_number(
        &self,
        network: Uuid,
        address: u16,
        next: u32,
    ) -> Result<(), StorageError>;

    /// Reset every sequence number of a network to 0
    async fn reset_sequence_numbers(&self, network: Uuid) -> Result<(), StorageError>;

    /// Load the replay protection record of a source address
    async fn seq_auth(&self, network: Uuid, source: u16) -> Result<Option<SeqAuth>, StorageError>;

    /// Store the replay protection record of a source address
    async fn store_seq_auth(
        &self,
        network: Uuid,
        source: u16,
        seq_auth: SeqAuth,
    ) -> Result<(), StorageError>;

    /// Forget the replay protection record of a source address
    async fn remove_seq_auth(&self, network: Uuid, source: u16) -> Result<(), StorageError>;
}

/// Combined storage interface
#[derive(Clone)]
pub struct Storage {
    /// Network configuration store
    pub network: Arc<dyn NetworkStore>,
    /// IV index, sequence number and replay protection store
    pub secure: Arc<dyn SecureStateStore>,
}

/// Storage backend configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StorageMode {
    /// In-memory storage (dev/tests only)
    #[default]
    InMemory,
    /// File-based storage
    File {
        /// Data directory path
        data_dir: PathBuf,
        /// Fsync frequency (1 = every write, N = every N writes)
        fsync_every: u32,
    },
}

// Re-export backend implementations
pub use backend::file::{FileStore, FileStoreConfig};
pub use backend::mem::MemoryStore;

impl Storage {
    /// Create storage from configuration
    pub async fn from_mode(mode: StorageMode) -> Result<Self, StorageError> {
        match mode {
            StorageMode::InMemory => {
                let store = Arc::new(MemoryStore::new());
                Ok(Storage {
                    network: store.clone(),
                    secure: store,
                })
            }
            StorageMode::File {
                data_dir,
                fsync_every,
            } => {
                if fsync_every == 0 {
                    return Err(StorageError::Invalid(
                        "fsync_every must be at least 1".to_string(),
                    ));
                }
                let store = Arc::new(
                    FileStore::new(FileStoreConfig {
                        data_dir,
                        fsync_every,
                    })
                    .await?,
                );
                Ok(Storage {
                    network: store.clone(),
                    secure: store,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_mode_in_memory() {
        let storage = Storage::from_mode(StorageMode::default()).await.unwrap();
        assert!(storage.network.load().await.unwrap().is_none());

        let network = Uuid::new_v4();
        storage.secure.store_sequence_number(network, 1, 5).await.unwrap();
        assert_eq!(storage.secure.sequence_number(network, 1).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_from_mode_rejects_zero_fsync() {
        let dir = tempfile::tempdir().unwrap();
        let result = Storage::from_mode(StorageMode::File {
            data_dir: dir.path().to_path_buf(),
            fsync_every: 0,
        })
        .await;
        assert!(matches!(result, Err(StorageError::Invalid(_))));
    }
}
