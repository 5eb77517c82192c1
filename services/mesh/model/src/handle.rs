//! Network actor.
//!
//! A single task owns the [`MeshNetwork`]. Callers talk to it through a
//! cloneable [`NetworkHandle`]; every command is processed to completion
//! before the next one, so check-then-modify operations cannot interleave.
//! Mutations run on a copy that replaces the network only after it has been
//! persisted.

use crate::address::Range;
use crate::cdb::{self, ExportConfiguration};
use crate::error::NetworkError;
use crate::keys::{KeyIndex, KeyRefreshPhase};
use crate::network::MeshNetwork;
use crate::replay::ReplayGuard;
use mesh_crypto::Key;
use mesh_storage::Storage;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Change notifications published by the network task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A network key was added
    NetworkKeyAdded(KeyIndex),
    /// A network key was replaced or entered Key Refresh
    NetworkKeyUpdated(KeyIndex),
    /// A network key was removed
    NetworkKeyRemoved(KeyIndex),
    /// A network key moved to another Key Refresh phase
    KeyRefreshPhaseChanged {
        /// Network key index
        index: KeyIndex,
        /// New phase
        phase: KeyRefreshPhase,
    },
    /// An application key was added
    ApplicationKeyAdded(KeyIndex),
    /// An application key was replaced or rebound
    ApplicationKeyUpdated(KeyIndex),
    /// An application key was removed
    ApplicationKeyRemoved(KeyIndex),
    /// A provisioner was added
    ProvisionerAdded(Uuid),
    /// A node was added
    NodeAdded(Uuid),
    /// Keys, features or composition of a node changed
    NodeUpdated(Uuid),
    /// A node was removed
    NodeRemoved {
        /// Node UUID
        uuid: Uuid,
        /// Addresses the node used
        addresses: Range,
    },
    /// The IV index or IV Update state changed
    IvIndexChanged {
        /// New IV index
        index: u32,
        /// Whether IV Update is in progress
        update_active: bool,
        /// Whether sequence numbers restarted from 0
        sequence_reset: bool,
    },
    /// Groups changed
    GroupsChanged,
    /// Scenes changed
    ScenesChanged,
}

type Query = Box<dyn FnOnce(&MeshNetwork) + Send>;
type Mutation = Box<dyn FnOnce(&mut MeshNetwork) -> Result<Vec<NetworkEvent>, NetworkError> + Send>;

enum Command {
    Query(Query),
    Mutate {
        apply: Mutation,
        response_tx: oneshot::Sender<Result<(), NetworkError>>,
    },
    NextSequenceNumber {
        source: u16,
        response_tx: oneshot::Sender<Result<u32, NetworkError>>,
    },
    Shutdown,
}

/// Handle to the task owning a mesh network
#[derive(Clone)]
pub struct NetworkHandle {
    uuid: Uuid,
    command_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<NetworkEvent>,
    replay: ReplayGuard,
}

impl NetworkHandle {
    /// Starts the task owning `network` without persisting it first
    pub fn spawn(network: MeshNetwork, storage: Storage) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let uuid = network.uuid;
        let replay = ReplayGuard::new(uuid, storage.secure.clone());

        let actor = NetworkActor {
            network,
            storage,
            events: events.clone(),
            replay: replay.clone(),
        };
        tokio::spawn(actor.run(command_rx));
        info!("Network task started for {}", uuid);

        Self {
            uuid,
            command_tx,
            events,
            replay,
        }
    }

    /// Persists a new network and starts its task
    pub async fn create(network: MeshNetwork, storage: Storage) -> Result<Self, NetworkError> {
        let bytes = cdb::export(&network, &ExportConfiguration::Full)?;
        storage.network.save(network.uuid, &bytes).await?;
        storage
            .secure
            .store_iv_index(network.uuid, network.iv_index().into())
            .await?;
        Ok(Self::spawn(network, storage))
    }

    /// Loads the last saved network, restoring its IV index and the local
    /// node's sequence numbers from the secure store
    pub async fn load(storage: Storage) -> Result<Option<Self>, NetworkError> {
        let Some(bytes) = storage.network.load().await? else {
            debug!("No saved network");
            return Ok(None);
        };
        let mut network = cdb::import(&bytes)?;

        if let Some(record) = storage.secure.iv_index(network.uuid).await? {
            if record.index >= network.iv_index.index {
                network.iv_index = record.into();
            } else {
                warn!(
                    "Stored IV index {} is behind the document ({}), keeping the document's",
                    record.index, network.iv_index.index
                );
            }
        }

        let local = network.local_node().map(|n| n.address_range());
        if let Some(range) = local {
            for address in range.low..=range.high {
                if let Some(next) = storage.secure.sequence_number(network.uuid, address).await? {
                    network.set_sequence_number(address, next);
                }
            }
        }

        Ok(Some(Self::spawn(network, storage)))
    }

    /// UUID of the network
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Receiver of change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Replay protection for messages received in this network.
    ///
    /// Every guard returned shares one lock, so concurrent copies of a
    /// message are accepted once.
    pub fn replay_guard(&self) -> ReplayGuard {
        self.replay.clone()
    }

    /// Runs `f` on the current network state
    pub async fn query<R, F>(&self, f: F) -> Result<R, NetworkError>
    where
        R: Send + 'static,
        F: FnOnce(&MeshNetwork) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Query(Box::new(move |network| {
                let _ = tx.send(f(network));
            })))
            .map_err(|_| NetworkError::Closed)?;
        rx.await.map_err(|_| NetworkError::Closed)
    }

    /// Applies `f`, persists the result and publishes the returned events.
    ///
    /// Nothing changes when `f` or persisting fails.
    pub async fn mutate<R, F>(&self, f: F) -> Result<R, NetworkError>
    where
        R: Send + 'static,
        F: FnOnce(&mut MeshNetwork) -> Result<(R, Vec<NetworkEvent>), NetworkError> + Send + 'static,
    {
        let (value_tx, value_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        let apply: Mutation = Box::new(move |network| {
            let (value, events) = f(network)?;
            let _ = value_tx.send(value);
            Ok(events)
        });

        self.command_tx
            .send(Command::Mutate { apply, response_tx })
            .map_err(|_| NetworkError::Closed)?;
        response_rx.await.map_err(|_| NetworkError::Closed)??;
        value_rx.await.map_err(|_| NetworkError::Closed)
    }

    /// Next sequence number of a local element, persisted before it is returned
    pub async fn next_sequence_number(&self, source: u16) -> Result<u32, NetworkError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(Command::NextSequenceNumber {
                source,
                response_tx,
            })
            .map_err(|_| NetworkError::Closed)?;
        response_rx.await.map_err(|_| NetworkError::Closed)?
    }

    /// Adds a network key
    pub async fn add_network_key(
        &self,
        index: KeyIndex,
        key: Key,
        name: impl Into<String>,
    ) -> Result<(), NetworkError> {
        let name = name.into();
        self.mutate(move |network| {
            network.add_network_key(index, &key, name)?;
            Ok(((), vec![NetworkEvent::NetworkKeyAdded(index)]))
        })
        .await
    }

    /// Adds an application key bound to `bound_network_key`
    pub async fn add_application_key(
        &self,
        index: KeyIndex,
        key: Key,
        bound_network_key: KeyIndex,
        name: impl Into<String>,
    ) -> Result<(), NetworkError> {
        let name = name.into();
        self.mutate(move |network| {
            network.add_application_key(index, &key, bound_network_key, name)?;
            Ok(((), vec![NetworkEvent::ApplicationKeyAdded(index)]))
        })
        .await
    }

    /// Sets the IV index; returns whether sequence numbers restarted
    pub async fn set_iv_index(&self, index: u32, update_active: bool) -> Result<bool, NetworkError> {
        self.mutate(move |network| {
            let sequence_reset = network.set_iv_index(index, update_active)?;
            Ok((
                sequence_reset,
                vec![NetworkEvent::IvIndexChanged {
                    index,
                    update_active,
                    sequence_reset,
                }],
            ))
        })
        .await
    }

    /// Adds the node of a just provisioned device; returns its primary address
    pub async fn provision_node(
        &self,
        uuid: Uuid,
        name: impl Into<String>,
        device_key: Key,
        element_count: u8,
        net_key: KeyIndex,
        address: Option<u16>,
    ) -> Result<u16, NetworkError> {
        let name = name.into();
        self.mutate(move |network| {
            let node = network.provision_node(uuid, name, device_key, element_count, net_key, address)?;
            Ok((node.primary_unicast_address, vec![NetworkEvent::NodeAdded(uuid)]))
        })
        .await
    }

    /// Removes a node
    pub async fn remove_node(&self, uuid: Uuid) -> Result<(), NetworkError> {
        self.mutate(move |network| {
            let node = network.remove_node(uuid)?;
            Ok((
                (),
                vec![NetworkEvent::NodeRemoved {
                    uuid,
                    addresses: node.address_range(),
                }],
            ))
        })
        .await
    }

    /// Exports the network as a Mesh CDB document
    pub async fn export(&self, config: ExportConfiguration) -> Result<Vec<u8>, NetworkError> {
        self.query(move |network| cdb::export(network, &config)).await?
    }

    /// Stops the network task
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

struct NetworkActor {
    network: MeshNetwork,
    storage: Storage,
    events: broadcast::Sender<NetworkEvent>,
    replay: ReplayGuard,
}

impl NetworkActor {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                Command::Query(f) => f(&self.network),
                Command::Mutate { apply, response_tx } => {
                    let result = self.mutate(apply).await;
                    if let Err(e) = &result {
                        debug!("Mutation rejected: {}", e);
                    }
                    let _ = response_tx.send(result);
                }
                Command::NextSequenceNumber {
                    source,
                    response_tx,
                } => {
                    let _ = response_tx.send(self.next_sequence_number(source).await);
                }
                Command::Shutdown => break,
            }
        }
        info!("Network task for {} stopped", self.network.uuid);
    }

    async fn mutate(&mut self, apply: Mutation) -> Result<(), NetworkError> {
        let mut candidate = self.network.clone();
        let events = apply(&mut candidate)?;

        let bytes = cdb::export(&candidate, &ExportConfiguration::Full)?;
        self.storage.network.save(candidate.uuid, &bytes).await?;
        for event in &events {
            self.persist_side_effects(&candidate, event).await?;
        }

        self.network = candidate;
        for event in events {
            // No receivers is not an error
            let _ = self.events.send(event);
        }
        Ok(())
    }

    async fn persist_side_effects(
        &self,
        network: &MeshNetwork,
        event: &NetworkEvent,
    ) -> Result<(), NetworkError> {
        let secure = &self.storage.secure;
        match event {
            NetworkEvent::IvIndexChanged { sequence_reset, .. } => {
                secure
                    .store_iv_index(network.uuid, network.iv_index().into())
                    .await?;
                if *sequence_reset {
                    secure.reset_sequence_numbers(network.uuid).await?;
                }
            }
            NetworkEvent::NodeRemoved { addresses, .. } => {
                for address in addresses.low..=addresses.high {
                    self.replay.forget(address).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn next_sequence_number(&mut self, source: u16) -> Result<u32, NetworkError> {
        let seq = self.network.next_sequence_number(source)?;
        if let Err(e) = self
            .storage
            .secure
            .store_sequence_number(self.network.uuid, source, seq + 1)
            .await
        {
            warn!("Failed to persist sequence number of {:#06x}: {}", source, e);
            self.network.set_sequence_number(source, seq);
            return Err(e.into());
        }
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_storage::StorageMode;

    async fn memory() -> Storage {
        Storage::from_mode(StorageMode::InMemory).await.unwrap()
    }

    #[tokio::test]
    async fn test_mutation_is_persisted_and_published() {
        let storage = memory().await;
        let network = MeshNetwork::create("Home", "Phone").unwrap();
        let handle = NetworkHandle::create(network, storage.clone()).await.unwrap();
        let mut events = handle.subscribe();

        handle.add_network_key(1, [7; 16], "Guest").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), NetworkEvent::NetworkKeyAdded(1));

        let saved = storage.network.load().await.unwrap().unwrap();
        let restored = cdb::import(&saved).unwrap();
        assert!(restored.network_key(1).is_some());
    }

    #[tokio::test]
    async fn test_failed_mutation_changes_nothing() {
        let handle = NetworkHandle::create(MeshNetwork::create("Home", "Phone").unwrap(), memory().await)
            .await
            .unwrap();

        let result: Result<(), _> = handle
            .mutate(|network| {
                network.add_network_key(1, &[1; 16], "Added")?;
                network.add_network_key(1, &[2; 16], "Duplicate")?;
                Ok(((), vec![]))
            })
            .await;
        assert!(matches!(result, Err(NetworkError::DuplicateKeyIndex(1))));

        let count = handle.query(|n| n.network_keys().len()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sequence_numbers_survive_reload() {
        let storage = memory().await;
        let handle = NetworkHandle::create(MeshNetwork::create("Home", "Phone").unwrap(), storage.clone())
            .await
            .unwrap();
        assert_eq!(handle.next_sequence_number(0x0001).await.unwrap(), 0);
        assert_eq!(handle.next_sequence_number(0x0001).await.unwrap(), 1);
        handle.shutdown();

        let reloaded = NetworkHandle::load(storage).await.unwrap().unwrap();
        assert_eq!(reloaded.uuid(), handle.uuid());
        assert_eq!(reloaded.next_sequence_number(0x0001).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_iv_index_change_resets_sequence_numbers() {
        let storage = memory().await;
        let handle = NetworkHandle::create(MeshNetwork::create("Home", "Phone").unwrap(), storage.clone())
            .await
            .unwrap();
        handle.next_sequence_number(0x0001).await.unwrap();

        assert!(!handle.set_iv_index(1, true).await.unwrap());
        assert!(handle.set_iv_index(1, false).await.unwrap());
        assert_eq!(handle.next_sequence_number(0x0001).await.unwrap(), 0);

        let record = storage.secure.iv_index(handle.uuid()).await.unwrap().unwrap();
        assert_eq!(record.index, 1);
        assert!(!record.is_iv_update_active);

        assert!(matches!(
            handle.set_iv_index(0, false).await,
            Err(NetworkError::IvIndexTooSmall { .. })
        ));
    }

    #[tokio::test]
    async fn test_removed_node_forgets_replay_state() {
        let storage = memory().await;
        let handle = NetworkHandle::create(MeshNetwork::create("Home", "Phone").unwrap(), storage)
            .await
            .unwrap();
        let uuid = Uuid::new_v4();
        let address = handle
            .provision_node(uuid, "Lamp", [3; 16], 1, 0, None)
            .await
            .unwrap();

        let guard = handle.replay_guard();
        assert!(guard.check_and_record(address, 0, 50).await.unwrap());
        handle.remove_node(uuid).await.unwrap();
        assert!(guard.check_and_record(address, 0, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_without_saved_network() {
        assert!(NetworkHandle::load(memory().await).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_handle() {
        let handle = NetworkHandle::spawn(MeshNetwork::create("Home", "Phone").unwrap(), memory().await);
        handle.shutdown();
        tokio::task::yield_now().await;
        let mut closed = false;
        for _ in 0..10 {
            if matches!(handle.query(|n| n.uuid).await, Err(NetworkError::Closed)) {
                closed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed);
    }
}
