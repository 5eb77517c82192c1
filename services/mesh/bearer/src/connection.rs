//! Proxy Protocol over a bearer.
//!
//! Outgoing messages are split into Proxy PDUs that fit the bearer MTU;
//! incoming PDUs are reassembled before they reach the caller. Reassembly
//! state lives as long as the bearer stays open.

use crate::bearer::Bearer;
use crate::error::BearerError;
use futures::StreamExt;
use mesh_wire::{PduType, ProxyPdu, ProxyProtocolHandler};
use tracing::{debug, info};

/// A Proxy Protocol connection
pub struct ProxyConnection<B> {
    bearer: B,
    protocol: ProxyProtocolHandler,
}

impl<B: Bearer> ProxyConnection<B> {
    /// Wraps `bearer`
    pub fn new(bearer: B) -> Self {
        Self {
            bearer,
            protocol: ProxyProtocolHandler::new(),
        }
    }

    /// Opens the underlying bearer with no message in progress
    pub async fn open(&mut self) -> Result<(), BearerError> {
        self.bearer.open().await?;
        self.protocol = ProxyProtocolHandler::new();
        info!("Proxy connection open (mtu {})", self.bearer.mtu());
        Ok(())
    }

    /// Closes the underlying bearer, dropping any partially received message
    pub async fn close(&mut self) -> Result<(), BearerError> {
        if self.protocol.is_reassembling() {
            debug!("Partially received message dropped on close");
        }
        self.protocol = ProxyProtocolHandler::new();
        self.bearer.close().await?;
        info!("Proxy connection closed");
        Ok(())
    }

    /// Sends a message, segmented to the bearer MTU
    pub async fn send(&mut self, pdu_type: PduType, data: &[u8]) -> Result<(), BearerError> {
        if !self.bearer.is_open() {
            return Err(BearerError::Closed);
        }
        let pdus = ProxyProtocolHandler::segment(data, pdu_type, self.bearer.mtu())?;
        for pdu in pdus {
            self.bearer.send(pdu).await?;
        }
        Ok(())
    }

    /// Next complete message, or `None` once the bearer stops delivering
    pub async fn receive(&mut self) -> Result<Option<ProxyPdu>, BearerError> {
        if !self.bearer.is_open() {
            return Err(BearerError::Closed);
        }
        let mut incoming = self.bearer.incoming();
        while let Some(pdu) = incoming.next().await {
            if let Some(message) = self.protocol.reassemble(&pdu) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// The underlying bearer
    pub fn bearer(&self) -> &B {
        &self.bearer
    }

    /// Releases the underlying bearer
    pub fn into_inner(self) -> B {
        self.bearer
    }
}
