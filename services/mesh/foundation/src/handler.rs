//! Configuration Client message handling.
//!
//! Requests sent to a node are remembered until the matching status
//! arrives. A successful NetKey or AppKey status replays the remembered
//! request on the node's known keys; other statuses update the node
//! directly.

use crate::composition::parse_page0;
use crate::error::FoundationError;
use crate::message::{ConfigMessage, ConfigStatus};
use bytes::Bytes;
use mesh_model::{KeyIndex, MeshNetwork, NetworkError, NetworkEvent, NetworkHandle};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration Client for the nodes of one network
pub struct ConfigurationMessageHandler {
    network: NetworkHandle,
    pending: Mutex<HashMap<u16, Vec<ConfigMessage>>>,
}

fn matches_status(request: &ConfigMessage, status: &ConfigMessage) -> bool {
    if request.response_opcode() != Some(status.opcode()) {
        return false;
    }
    match (request, status) {
        (
            ConfigMessage::NetKeyAdd { index, .. }
            | ConfigMessage::NetKeyUpdate { index, .. }
            | ConfigMessage::NetKeyDelete { index },
            ConfigMessage::NetKeyStatus { index: status_index, .. },
        ) => index == status_index,
        (
            ConfigMessage::AppKeyAdd {
                net_index,
                app_index,
                ..
            }
            | ConfigMessage::AppKeyUpdate {
                net_index,
                app_index,
                ..
            }
            | ConfigMessage::AppKeyDelete {
                net_index,
                app_index,
            },
            ConfigMessage::AppKeyStatus {
                net_index: status_net,
                app_index: status_app,
                ..
            },
        ) => net_index == status_net && app_index == status_app,
        (
            ConfigMessage::CompositionDataGet { page },
            ConfigMessage::CompositionDataStatus {
                page: status_page, ..
            },
        ) => page == status_page,
        _ => true,
    }
}

impl ConfigurationMessageHandler {
    /// Handler updating `network`
    pub fn new(network: NetworkHandle) -> Self {
        Self {
            network,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Records a request to `destination` and returns its access payload
    pub async fn request(
        &self,
        destination: u16,
        message: ConfigMessage,
    ) -> Result<Bytes, FoundationError> {
        if !message.is_request() {
            return Err(FoundationError::InvalidMessage(format!(
                "{:#06x} is not a request",
                message.opcode()
            )));
        }
        let payload = message.encode();
        debug!("Config request {:#06x} to {:#06x}", message.opcode(), destination);
        self.pending
            .lock()
            .await
            .entry(destination)
            .or_default()
            .push(message);
        Ok(payload)
    }

    /// Requests still waiting for a status from `destination`
    pub async fn pending_requests(&self, destination: u16) -> Vec<ConfigMessage> {
        self.pending
            .lock()
            .await
            .get(&destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops every request waiting for a status from `destination`
    pub async fn cancel(&self, destination: u16) {
        self.pending.lock().await.remove(&destination);
    }

    async fn take_pending(&self, source: u16, status: &ConfigMessage) -> Option<ConfigMessage> {
        let mut pending = self.pending.lock().await;
        let requests = pending.get_mut(&source)?;
        let position = requests.iter().position(|r| matches_status(r, status))?;
        let request = requests.remove(position);
        if requests.is_empty() {
            pending.remove(&source);
        }
        Some(request)
    }

    async fn node_uuid(&self, address: u16) -> Result<Uuid, FoundationError> {
        self.network
            .query(move |network| network.node_for_address(address).map(|n| n.uuid))
            .await?
            .ok_or(FoundationError::UnknownNode(address))
    }

    async fn update_node<F>(&self, address: u16, f: F) -> Result<(), FoundationError>
    where
        F: FnOnce(&mut MeshNetwork) -> Result<(), NetworkError> + Send + 'static,
    {
        let uuid = self.node_uuid(address).await?;
        self.network
            .mutate(move |network| {
                f(network)?;
                Ok(((), vec![NetworkEvent::NodeUpdated(uuid)]))
            })
            .await?;
        Ok(())
    }

    /// Handles an access payload received from the node at `source`.
    ///
    /// Requests are rejected with [`FoundationError::InvalidMessage`]; a
    /// Configuration Client only receives statuses.
    pub async fn handle(&self, source: u16, payload: &[u8]) -> Result<ConfigMessage, FoundationError> {
        let message = ConfigMessage::parse(payload)?;
        if message.is_request() {
            warn!(
                "Request {:#06x} from {:#06x} rejected",
                message.opcode(),
                source
            );
            return Err(FoundationError::InvalidMessage(format!(
                "unexpected request {:#06x}",
                message.opcode()
            )));
        }

        let request = self.take_pending(source, &message).await;
        match &message {
            ConfigMessage::NetKeyStatus { status, index } => {
                self.net_key_status(source, *status, *index, request).await?
            }
            ConfigMessage::AppKeyStatus {
                status, app_index, ..
            } => self.app_key_status(source, *status, *app_index, request).await?,
            ConfigMessage::CompositionDataStatus { page: 0, data } => {
                let composition = parse_page0(data)?;
                self.update_node(source, move |network| {
                    network.apply_node_composition(source, composition)
                })
                .await?;
                info!("Composition data of {:#06x} applied", source);
            }
            ConfigMessage::CompositionDataStatus { page, .. } => {
                debug!("Composition data page {} of {:#06x} ignored", page, source);
            }
            ConfigMessage::GattProxyStatus { state } => {
                let state = *state;
                self.update_node(source, move |network| {
                    network.set_node_proxy_state(source, state)
                })
                .await?;
            }
            ConfigMessage::NodeResetStatus => {
                let uuid = self.node_uuid(source).await?;
                self.network.remove_node(uuid).await?;
                self.cancel(source).await;
                info!("Node {} at {:#06x} reset", uuid, source);
            }
            _ => {}
        }
        Ok(message)
    }

    async fn net_key_status(
        &self,
        source: u16,
        status: ConfigStatus,
        index: KeyIndex,
        request: Option<ConfigMessage>,
    ) -> Result<(), FoundationError> {
        if status != ConfigStatus::Success {
            warn!(
                "NetKey {} request to {:#06x} failed: {:?}",
                index, source, status
            );
            return Ok(());
        }
        match request {
            Some(ConfigMessage::NetKeyAdd { .. }) => {
                self.update_node(source, move |n| n.add_node_network_key(source, index))
                    .await
            }
            Some(ConfigMessage::NetKeyUpdate { .. }) => {
                self.update_node(source, move |n| n.update_node_network_key(source, index))
                    .await
            }
            Some(ConfigMessage::NetKeyDelete { .. }) => {
                self.update_node(source, move |n| n.remove_node_network_key(source, index))
                    .await
            }
            _ => {
                debug!("Unsolicited NetKey status from {:#06x}", source);
                Ok(())
            }
        }
    }

    async fn app_key_status(
        &self,
        source: u16,
        status: ConfigStatus,
        index: KeyIndex,
        request: Option<ConfigMessage>,
    ) -> Result<(), FoundationError> {
        if status != ConfigStatus::Success {
            warn!(
                "AppKey {} request to {:#06x} failed: {:?}",
                index, source, status
            );
            return Ok(());
        }
        match request {
            Some(ConfigMessage::AppKeyAdd { .. }) => {
                self.update_node(source, move |n| n.add_node_application_key(source, index))
                    .await
            }
            Some(ConfigMessage::AppKeyUpdate { .. }) => {
                self.update_node(source, move |n| n.update_node_application_key(source, index))
                    .await
            }
            Some(ConfigMessage::AppKeyDelete { .. }) => {
                self.update_node(source, move |n| n.remove_node_application_key(source, index))
                    .await
            }
            _ => {
                debug!("Unsolicited AppKey status from {:#06x}", source);
                Ok(())
            }
        }
    }
}
