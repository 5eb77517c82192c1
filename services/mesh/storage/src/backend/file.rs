//! File-based storage backend with checksummed network blobs
//!
//! ```text
//! data_dir/
//!   current                      UUID of the last saved network
//!   networks/<uuid>/network.bin  u32 len | u32 crc32 | blob
//!   networks/<uuid>/state.json   IV index, sequence numbers, SeqAuth
//! ```

use crate::{IvIndexRecord, NetworkStore, SecureStateStore, SeqAuth, StorageError};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

const NETWORK_FILE: &str = "network.bin";
const STATE_FILE: &str = "state.json";
const CURRENT_FILE: &str = "current";

/// Configuration for the file store
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Base data directory
    pub data_dir: PathBuf,
    /// Fsync frequency (1 = every write, N = every N writes)
    pub fsync_every: u32,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./meshdata"),
            fsync_every: 1,
        }
    }
}

/// Per-network state file content
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct NetworkState {
    iv_index: Option<IvIndexRecord>,
    sequence_numbers: BTreeMap<u16, u32>,
    seq_auth: BTreeMap<u16, SeqAuth>,
}

/// Network blob header
#[derive(Debug)]
struct BlobHeader {
    len: u32,
    crc32: u32,
}

impl BlobHeader {
    const SIZE: usize = 4 + 4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len);
        buf.put_u32_le(self.crc32);
    }

    fn decode(buf: &mut Bytes) -> Result<Self, StorageError> {
        if buf.remaining() < Self::SIZE {
            return Err(StorageError::Corruption(
                "Incomplete network blob header".to_string(),
            ));
        }

        Ok(Self {
            len: buf.get_u32_le(),
            crc32: buf.get_u32_le(),
        })
    }

    fn compute_crc(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}

/// File-based implementation of both stores
pub struct FileStore {
    config: FileStoreConfig,
    /// Per-network state cache
    states: Arc<DashMap<Uuid, NetworkState>>,
    /// Write counter for fsync batching
    write_counter: Arc<AtomicU32>,
    /// Held from state update until the file is renamed into place
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open a file store, loading the state of every known network
    pub async fn new(config: FileStoreConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(config.data_dir.join("networks"))?;

        let store = Self {
            config,
            states: Arc::new(DashMap::new()),
            write_counter: Arc::new(AtomicU32::new(0)),
            write_lock: Mutex::new(()),
        };
        store.load_states()?;

        Ok(store)
    }

    fn load_states(&self) -> Result<(), StorageError> {
        for entry in std::fs::read_dir(self.config.data_dir.join("networks"))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(uuid) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };

            let state_file = entry.path().join(STATE_FILE);
            if !state_file.exists() {
                continue;
            }
            match Self::read_state(&state_file) {
                Ok(state) => {
                    info!("Loaded secure state for network {}", uuid);
                    self.states.insert(uuid, state);
                }
                Err(e) => {
                    warn!("Failed to load state for network {}: {}", uuid, e);
                }
            }
        }
        Ok(())
    }

    fn read_state(state_file: &Path) -> Result<NetworkState, StorageError> {
        let content = std::fs::read_to_string(state_file)?;
        serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!("Invalid state file {}: {}", state_file.display(), e))
        })
    }

    fn network_dir(&self, network: Uuid) -> PathBuf {
        self.config.data_dir.join("networks").join(network.to_string())
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>, StorageError> {
        self.write_lock
            .lock()
            .map_err(|_| StorageError::Invalid("Write lock poisoned".to_string()))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;

        let count = self.write_counter.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.config.fsync_every.max(1) == 0 {
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Applies `update` to the cached state of a network and writes it through
    fn update_state<F>(&self, network: Uuid, update: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut NetworkState),
    {
        let _writing = self.lock_writes()?;
        let content = {
            let mut state = self.states.entry(network).or_default();
            update(&mut state);
            serde_json::to_string_pretty(&*state)?
        };

        let dir = self.network_dir(network);
        std::fs::create_dir_all(&dir)?;
        self.write_file(&dir.join(STATE_FILE), content.as_bytes())
    }

    fn read_network(&self, network: Uuid) -> Result<Bytes, StorageError> {
        let path = self.network_dir(network).join(NETWORK_FILE);
        if !path.exists() {
            return Err(StorageError::NotFound);
        }
        let mut buf = Bytes::from(std::fs::read(&path)?);
        let header = BlobHeader::decode(&mut buf)?;

        if buf.remaining() != header.len as usize {
            return Err(StorageError::Corruption(format!(
                "Network blob length mismatch: header {} actual {}",
                header.len,
                buf.remaining()
            )));
        }
        if BlobHeader::compute_crc(&buf) != header.crc32 {
            return Err(StorageError::Corruption(
                "Network blob checksum mismatch".to_string(),
            ));
        }
        Ok(buf)
    }
}

#[async_trait]
impl NetworkStore for FileStore {
    async fn load(&self) -> Result<Option<Bytes>, StorageError> {
        let current_file = self.config.data_dir.join(CURRENT_FILE);
        if !current_file.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&current_file)?;
        let network = Uuid::parse_str(content.trim())
            .map_err(|e| StorageError::Corruption(format!("Invalid current network: {}", e)))?;

        match self.read_network(network) {
            Ok(data) => {
                debug!("Network load uuid={} len={}", network, data.len());
                Ok(Some(data))
            }
            Err(StorageError::NotFound) => {
                warn!("Current network {} has no saved configuration", network);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, network: Uuid, data: &[u8]) -> Result<(), StorageError> {
        debug!("Network save uuid={} len={}", network, data.len());
        let len = u32::try_from(data.len())
            .map_err(|_| StorageError::Invalid(format!("Network too large: {}", data.len())))?;

        let mut buf = BytesMut::with_capacity(BlobHeader::SIZE + data.len());
        BlobHeader {
            len,
            crc32: BlobHeader::compute_crc(data),
        }
        .encode(&mut buf);
        buf.put_slice(data);

        let _writing = self.lock_writes()?;
        let dir = self.network_dir(network);
        std::fs::create_dir_all(&dir)?;
        self.write_file(&dir.join(NETWORK_FILE), &buf)?;
        self.write_file(
            &self.config.data_dir.join(CURRENT_FILE),
            network.to_string().as_bytes(),
        )
    }
}

#[async_trait]
impl SecureStateStore for FileStore {
    async fn iv_index(&self, network: Uuid) -> Result<Option<IvIndexRecord>, StorageError> {
        Ok(self.states.get(&network).and_then(|s| s.iv_index))
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
        self.update_state(network, |state| state.iv_index = Some(record))
    }

    async fn sequence_number(
        &self,
        network: Uuid,
        address: u16,
    ) -> Result<Option<u32>, StorageError> {
        Ok(self
            .states
            .get(&network)
            .and_then(|s| s.sequence_numbers.get(&address).copied()))
    }

    async fn store_sequence_number(
        &self,
        network: Uuid,
        address: u16,
        next: u32,
    ) -> Result<(), StorageError> {
        self.update_state(network, |state| {
            state.sequence_numbers.insert(address, next);
        })
    }

    async fn reset_sequence_numbers(&self, network: Uuid) -> Result<(), StorageError> {
        debug!("Sequence numbers reset uuid={}", network);
        self.update_state(network, |state| {
            state.sequence_numbers.values_mut().for_each(|seq| *seq = 0);
        })
    }

    async fn seq_auth(&self, network: Uuid, source: u16) -> Result<Option<SeqAuth>, StorageError> {
        Ok(self
            .states
            .get(&network)
            .and_then(|s| s.seq_auth.get(&source).copied()))
    }

    async fn store_seq_auth(
        &self,
        network: Uuid,
        source: u16,
        seq_auth: SeqAuth,
    ) -> Result<(), StorageError> {
        self.update_state(network, |state| {
            state.seq_auth.insert(source, seq_auth);
        })
    }

    async fn remove_seq_auth(&self, network: Uuid, source: u16) -> Result<(), StorageError> {
        self.update_state(network, |state| {
            state.seq_auth.remove(&source);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> FileStoreConfig {
        FileStoreConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_every: 1,
        }
    }

    #[tokio::test]
    async fn test_file_network_round_trip() {
        let dir = TempDir::new().unwrap();
        let network = Uuid::new_v4();

        {
            let store = FileStore::new(config(&dir)).await.unwrap();
            assert!(store.load().await.unwrap().is_none());
            store.save(network, b"{\"meshName\":\"home\"}").await.unwrap();
        }

        let store = FileStore::new(config(&dir)).await.unwrap();
        assert_eq!(
            store.load().await.unwrap().unwrap(),
            Bytes::from_static(b"{\"meshName\":\"home\"}")
        );
    }

    #[tokio::test]
    async fn test_file_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let network = Uuid::new_v4();
        let store = FileStore::new(config(&dir)).await.unwrap();
        store.save(network, b"network configuration").await.unwrap();

        let path = dir
            .path()
            .join("networks")
            .join(network.to_string())
            .join(NETWORK_FILE);
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(
            store.load().await,
            Err(StorageError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn test_file_secure_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let network = Uuid::new_v4();
        let record = IvIndexRecord {
            index: 7,
            is_iv_update_active: true,
            transition_date: None,
        };

        {
            let store = FileStore::new(config(&dir)).await.unwrap();
            store.store_iv_index(network, record).await.unwrap();
            store.store_sequence_number(network, 0x0001, 42).await.unwrap();
            store
                .store_seq_auth(
                    network,
                    0x0002,
                    SeqAuth {
                        last: (7 << 24) | 9,
                        previous: None,
                    },
                )
                .await
                .unwrap();
        }

        let store = FileStore::new(config(&dir)).await.unwrap();
        assert_eq!(store.iv_index(network).await.unwrap(), Some(record));
        assert_eq!(store.sequence_number(network, 0x0001).await.unwrap(), Some(42));
        assert_eq!(
            store.seq_auth(network, 0x0002).await.unwrap().unwrap().last,
            (7 << 24) | 9
        );

        store.reset_sequence_numbers(network).await.unwrap();
        assert_eq!(store.sequence_number(network, 0x0001).await.unwrap(), Some(0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_concurrent_state_writes() {
        let dir = TempDir::new().unwrap();
        let network = Uuid::new_v4();
        let store = Arc::new(FileStore::new(config(&dir)).await.unwrap());

        let sequence_writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for next in 1..=300 {
                    store.store_sequence_number(network, 0x0001, next).await?;
                }
                Ok::<_, StorageError>(())
            })
        };
        let replay_writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for seq in 1..=300u64 {
                    store
                        .store_seq_auth(
                            network,
                            0x0002,
                            SeqAuth {
                                last: seq,
                                previous: Some(seq - 1),
                            },
                        )
                        .await?;
                }
                Ok::<_, StorageError>(())
            })
        };
        sequence_writer.await.unwrap().unwrap();
        replay_writer.await.unwrap().unwrap();
        drop(store);

        let store = FileStore::new(config(&dir)).await.unwrap();
        assert_eq!(store.sequence_number(network, 0x0001).await.unwrap(), Some(300));
        assert_eq!(
            store.seq_auth(network, 0x0002).await.unwrap().unwrap().last,
            300
        );
    }

    #[tokio::test]
    async fn test_file_ignores_unreadable_state() {
        let dir = TempDir::new().unwrap();
        let network = Uuid::new_v4();
        let network_dir = dir.path().join("networks").join(network.to_string());
        std::fs::create_dir_all(&network_dir).unwrap();
        std::fs::write(network_dir.join(STATE_FILE), "not json").unwrap();

        let store = FileStore::new(config(&dir)).await.unwrap();
        assert_eq!(store.iv_index(network).await.unwrap(), None);
    }
}
