//! Proxy Protocol segmentation and reassembly.
//!
//! Every Proxy PDU starts with a one byte prefix carrying the SAR field and
//! the type of the carried message. Messages that do not fit in `mtu - 1`
//! bytes are split over several PDUs.
//!
//! ```text
//! +-----+----------+------------------+
//! | SAR | PDU type | payload          |
//! | 2b  | 6b       | 0..mtu-1 bytes   |
//! +-----+----------+------------------+
//! ```

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Segmentation and reassembly flag
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sar {
    /// Data field contains a complete message
    Complete = 0b00,
    /// Data field contains the first segment of a message
    First = 0b01,
    /// Data field contains a continuation segment of a message
    Continuation = 0b10,
    /// Data field contains the last segment of a message
    Last = 0b11,
}

impl Sar {
    /// Extracts the SAR field from a prefix byte
    pub fn from_prefix(prefix: u8) -> Self {
        match prefix >> 6 {
            0b00 => Sar::Complete,
            0b01 => Sar::First,
            0b10 => Sar::Continuation,
            _ => Sar::Last,
        }
    }
}

/// Type of message carried in a Proxy PDU
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PduType {
    /// Network PDU
    NetworkPdu = 0x00,
    /// Mesh beacon
    MeshBeacon = 0x01,
    /// Proxy configuration message
    ProxyConfiguration = 0x02,
    /// Provisioning PDU
    ProvisioningPdu = 0x03,
}

impl TryFrom<u8> for PduType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PduType::NetworkPdu),
            0x01 => Ok(PduType::MeshBeacon),
            0x02 => Ok(PduType::ProxyConfiguration),
            0x03 => Ok(PduType::ProvisioningPdu),
            _ => Err(WireError::UnknownPduType(value)),
        }
    }
}

/// A complete message received over the Proxy Protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPdu {
    /// Reassembled message
    pub data: Bytes,
    /// Type of the message
    pub pdu_type: PduType,
}

/// Builds the prefix byte
pub fn prefix(sar: Sar, pdu_type: PduType) -> u8 {
    ((sar as u8) << 6) | pdu_type as u8
}

/// Per-connection Proxy Protocol state.
///
/// Segmentation is stateless. Reassembly keeps at most one partially received
/// message; a new `Complete` or `First` PDU discards it.
#[derive(Debug, Default)]
pub struct ProxyProtocolHandler {
    buffer: Option<(PduType, BytesMut)>,
}

impl ProxyProtocolHandler {
    /// Create a handler with no message in progress
    pub fn new() -> Self {
        Self { buffer: None }
    }

    /// Whether a segmented message is partially received
    pub fn is_reassembling(&self) -> bool {
        self.buffer.is_some()
    }

    /// Splits `data` into Proxy PDUs no longer than `mtu` bytes each.
    ///
    /// The result holds a single `Complete` PDU when `data` fits in `mtu - 1`
    /// bytes, otherwise `First`, zero or more `Continuation` and one `Last`.
    pub fn segment(data: &[u8], pdu_type: PduType, mtu: usize) -> Result<Vec<Bytes>, WireError> {
        if mtu < 2 {
            return Err(WireError::InvalidMtu(mtu));
        }
        let max_payload = mtu - 1;

        if data.len() <= max_payload {
            let mut pdu = BytesMut::with_capacity(data.len() + 1);
            pdu.put_u8(prefix(Sar::Complete, pdu_type));
            pdu.put_slice(data);
            return Ok(vec![pdu.freeze()]);
        }

        let chunks: Vec<&[u8]> = data.chunks(max_payload).collect();
        let last = chunks.len() - 1;
        let pdus = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| {
                let sar = match i {
                    0 => Sar::First,
                    i if i == last => Sar::Last,
                    _ => Sar::Continuation,
                };
                let mut pdu = BytesMut::with_capacity(chunk.len() + 1);
                pdu.put_u8(prefix(sar, pdu_type));
                pdu.put_slice(chunk);
                pdu.freeze()
            })
            .collect::<Vec<_>>();

        debug!(
            "Segmented {} bytes of {:?} into {} PDUs (mtu {})",
            data.len(),
            pdu_type,
            pdus.len(),
            mtu
        );
        Ok(pdus)
    }

    /// Feeds one received Proxy PDU.
    ///
    /// Returns the complete message once its last segment arrives. Empty input
    /// and unknown PDU types are ignored without touching the reassembly
    /// state. A `Continuation` or `Last` that does not continue the message in
    /// progress drops that message.
    pub fn reassemble(&mut self, pdu: &[u8]) -> Option<ProxyPdu> {
        let (&first, payload) = pdu.split_first()?;

        let pdu_type = match PduType::try_from(first & 0x3F) {
            Ok(pdu_type) => pdu_type,
            Err(e) => {
                warn!("Ignoring proxy PDU: {}", e);
                return None;
            }
        };

        match Sar::from_prefix(first) {
            Sar::Complete => {
                if self.buffer.take().is_some() {
                    debug!("Incomplete segmented message dropped by a complete PDU");
                }
                Some(ProxyPdu {
                    data: Bytes::copy_from_slice(payload),
                    pdu_type,
                })
            }
            Sar::First => {
                if self.buffer.is_some() {
                    debug!("Incomplete segmented message dropped by a new first segment");
                }
                self.buffer = Some((pdu_type, BytesMut::from(payload)));
                None
            }
            sar @ (Sar::Continuation | Sar::Last) => match self.buffer.take() {
                Some((expected, mut buffer)) if expected == pdu_type => {
                    buffer.extend_from_slice(payload);
                    if sar == Sar::Last {
                        Some(ProxyPdu {
                            data: buffer.freeze(),
                            pdu_type,
                        })
                    } else {
                        self.buffer = Some((expected, buffer));
                        None
                    }
                }
                Some((expected, _)) => {
                    warn!(
                        "Segment of {:?} while reassembling {:?}, message dropped",
                        pdu_type, expected
                    );
                    None
                }
                None => {
                    warn!("{:?} segment without a first segment", sar);
                    None
                }
            },
        }
    }
}
