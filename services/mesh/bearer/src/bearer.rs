//! Bearer trait

use crate::error::BearerError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// Minimum MTU of a GATT bearer carrying Proxy PDUs
pub const DEFAULT_PROXY_MTU: usize = 20;

/// Bearer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerState {
    /// Not connected
    Closed,
    /// Connected and able to carry PDUs
    Open,
}

/// A transport able to carry raw PDUs of at most [`Bearer::mtu`] bytes
#[async_trait]
pub trait Bearer: Send + Sync {
    /// Opens the bearer
    async fn open(&mut self) -> Result<(), BearerError>;

    /// Closes the bearer; PDUs not yet received are dropped
    async fn close(&mut self) -> Result<(), BearerError>;

    /// Current state
    fn state(&self) -> BearerState;

    /// Largest PDU the bearer carries
    fn mtu(&self) -> usize;

    /// Sends one PDU
    async fn send(&mut self, pdu: Bytes) -> Result<(), BearerError>;

    /// PDUs received from the remote end.
    ///
    /// The stream ends when the bearer is closed or the remote end goes away.
    fn incoming(&mut self) -> BoxStream<'_, Bytes>;

    /// Whether the bearer is open
    fn is_open(&self) -> bool {
        self.state() == BearerState::Open
    }
}
