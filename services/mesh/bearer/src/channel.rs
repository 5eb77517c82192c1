//! In-memory bearer backed by tokio channels.

use crate::bearer::{Bearer, BearerState};
use crate::error::BearerError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// One end of a connected pair of in-memory bearers
pub struct ChannelBearer {
    mtu: usize,
    state: BearerState,
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelBearer {
    /// Two connected bearers, both closed
    pub fn pair(mtu: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                mtu,
                state: BearerState::Closed,
                tx: a_tx,
                rx: a_rx,
            },
            Self {
                mtu,
                state: BearerState::Closed,
                tx: b_tx,
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl Bearer for ChannelBearer {
    async fn open(&mut self) -> Result<(), BearerError> {
        if self.tx.is_closed() {
            return Err(BearerError::Disconnected);
        }
        self.state = BearerState::Open;
        debug!("Channel bearer opened (mtu {})", self.mtu);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BearerError> {
        self.state = BearerState::Closed;
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        debug!("Channel bearer closed, {} pending PDUs dropped", dropped);
        Ok(())
    }

    fn state(&self) -> BearerState {
        self.state
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn send(&mut self, pdu: Bytes) -> Result<(), BearerError> {
        if self.state != BearerState::Open {
            return Err(BearerError::Closed);
        }
        if pdu.len() > self.mtu {
            return Err(BearerError::PduTooLarge {
                len: pdu.len(),
                mtu: self.mtu,
            });
        }
        self.tx.send(pdu).await.map_err(|_| BearerError::Disconnected)
    }

    fn incoming(&mut self) -> BoxStream<'_, Bytes> {
        if self.state != BearerState::Open {
            return stream::empty::<Bytes>().boxed();
        }
        let rx = &mut self.rx;
        stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
    }
}
