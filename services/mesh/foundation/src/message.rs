//! Configuration messages exchanged with a node's Configuration Server.

use crate::error::FoundationError;
use crate::opcode::*;
use bytes::Bytes;
use mesh_crypto::{Key, KEY_SIZE};
use mesh_model::{FeatureState, KeyIndex};

/// Status code of a configuration status message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigStatus {
    /// Success
    Success = 0x00,
    /// Invalid Address
    InvalidAddress = 0x01,
    /// Invalid Model
    InvalidModel = 0x02,
    /// Invalid AppKey Index
    InvalidAppKeyIndex = 0x03,
    /// Invalid NetKey Index
    InvalidNetKeyIndex = 0x04,
    /// Insufficient Resources
    InsufficientResources = 0x05,
    /// Key Index Already Stored
    KeyIndexAlreadyStored = 0x06,
    /// Invalid Publish Parameters
    InvalidPublishParameters = 0x07,
    /// Not a Subscribe Model
    NotASubscribeModel = 0x08,
    /// Storage Failure
    StorageFailure = 0x09,
    /// Feature Not Supported
    FeatureNotSupported = 0x0A,
    /// Cannot Update
    CannotUpdate = 0x0B,
    /// Cannot Remove
    CannotRemove = 0x0C,
    /// Cannot Bind
    CannotBind = 0x0D,
    /// Temporarily Unable to Change State
    TemporarilyUnableToChangeState = 0x0E,
    /// Cannot Set
    CannotSet = 0x0F,
    /// Unspecified Error
    UnspecifiedError = 0x10,
    /// Invalid Binding
    InvalidBinding = 0x11,
}

impl TryFrom<u8> for ConfigStatus {
    type Error = FoundationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use ConfigStatus::*;
        Ok(match value {
            0x00 => Success,
            0x01 => InvalidAddress,
            0x02 => InvalidModel,
            0x03 => InvalidAppKeyIndex,
            0x04 => InvalidNetKeyIndex,
            0x05 => InsufficientResources,
            0x06 => KeyIndexAlreadyStored,
            0x07 => InvalidPublishParameters,
            0x08 => NotASubscribeModel,
            0x09 => StorageFailure,
            0x0A => FeatureNotSupported,
            0x0B => CannotUpdate,
            0x0C => CannotRemove,
            0x0D => CannotBind,
            0x0E => TemporarilyUnableToChangeState,
            0x0F => CannotSet,
            0x10 => UnspecifiedError,
            0x11 => InvalidBinding,
            other => {
                return Err(FoundationError::InvalidMessage(format!(
                    "unknown status code {other:#04x}"
                )))
            }
        })
    }
}

/// A Configuration model message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigMessage {
    /// Adds a network key to a node
    NetKeyAdd {
        /// Network key index
        index: KeyIndex,
        /// Key material
        key: Key,
    },
    /// Distributes the new key of a network key during Key Refresh
    NetKeyUpdate {
        /// Network key index
        index: KeyIndex,
        /// New key material
        key: Key,
    },
    /// Removes a network key from a node
    NetKeyDelete {
        /// Network key index
        index: KeyIndex,
    },
    /// Result of a NetKey request
    NetKeyStatus {
        /// Status code
        status: ConfigStatus,
        /// Network key index
        index: KeyIndex,
    },
    /// Adds an application key to a node
    AppKeyAdd {
        /// Bound network key index
        net_index: KeyIndex,
        /// Application key index
        app_index: KeyIndex,
        /// Key material
        key: Key,
    },
    /// Distributes the new key of an application key during Key Refresh
    AppKeyUpdate {
        /// Bound network key index
        net_index: KeyIndex,
        /// Application key index
        app_index: KeyIndex,
        /// New key material
        key: Key,
    },
    /// Removes an application key from a node
    AppKeyDelete {
        /// Bound network key index
        net_index: KeyIndex,
        /// Application key index
        app_index: KeyIndex,
    },
    /// Result of an AppKey request
    AppKeyStatus {
        /// Status code
        status: ConfigStatus,
        /// Bound network key index
        net_index: KeyIndex,
        /// Application key index
        app_index: KeyIndex,
    },
    /// Requests a Composition Data page
    CompositionDataGet {
        /// Page number
        page: u8,
    },
    /// A Composition Data page
    CompositionDataStatus {
        /// Page number
        page: u8,
        /// Raw page content
        data: Bytes,
    },
    /// Requests the GATT Proxy state
    GattProxyGet,
    /// Enables or disables the GATT Proxy feature
    GattProxySet {
        /// Requested state, never `NotSupported`
        state: FeatureState,
    },
    /// Current GATT Proxy state
    GattProxyStatus {
        /// Reported state
        state: FeatureState,
    },
    /// Resets a node to the unprovisioned state
    NodeReset,
    /// Acknowledges a Node Reset
    NodeResetStatus,
}

fn expect_len(opcode: u32, params: &[u8], expected: usize) -> Result<(), FoundationError> {
    if params.len() != expected {
        return Err(FoundationError::Malformed {
            opcode,
            expected,
            actual: params.len(),
        });
    }
    Ok(())
}

fn key_at(params: &[u8], offset: usize) -> Key {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&params[offset..offset + KEY_SIZE]);
    key
}

/// Packs one 12-bit key index into 2 octets
fn pack_index(index: KeyIndex, out: &mut Vec<u8>) {
    out.extend_from_slice(&(index & 0x0FFF).to_le_bytes());
}

fn unpack_index(params: &[u8]) -> KeyIndex {
    u16::from_le_bytes([params[0], params[1]]) & 0x0FFF
}

/// Packs two 12-bit key indexes into 3 octets, the first in the low bits
fn pack_index_pair(first: KeyIndex, second: KeyIndex, out: &mut Vec<u8>) {
    let packed = u32::from(first & 0x0FFF) | (u32::from(second & 0x0FFF) << 12);
    out.extend_from_slice(&packed.to_le_bytes()[..3]);
}

fn unpack_index_pair(params: &[u8]) -> (KeyIndex, KeyIndex) {
    let packed = u32::from_le_bytes([params[0], params[1], params[2], 0]);
    ((packed & 0x0FFF) as KeyIndex, (packed >> 12) as KeyIndex)
}

fn proxy_state(value: u8, allow_not_supported: bool) -> Result<FeatureState, FoundationError> {
    match FeatureState::try_from(value) {
        Ok(FeatureState::NotSupported) if !allow_not_supported => Err(
            FoundationError::InvalidMessage("GATT Proxy cannot be set to not supported".to_string()),
        ),
        Ok(state) => Ok(state),
        Err(v) => Err(FoundationError::InvalidMessage(format!(
            "invalid GATT Proxy state {v:#04x}"
        ))),
    }
}

impl ConfigMessage {
    /// Opcode of the message
    pub fn opcode(&self) -> u32 {
        match self {
            ConfigMessage::NetKeyAdd { .. } => NET_KEY_ADD,
            ConfigMessage::NetKeyUpdate { .. } => NET_KEY_UPDATE,
            ConfigMessage::NetKeyDelete { .. } => NET_KEY_DELETE,
            ConfigMessage::NetKeyStatus { .. } => NET_KEY_STATUS,
            ConfigMessage::AppKeyAdd { .. } => APP_KEY_ADD,
            ConfigMessage::AppKeyUpdate { .. } => APP_KEY_UPDATE,
            ConfigMessage::AppKeyDelete { .. } => APP_KEY_DELETE,
            ConfigMessage::AppKeyStatus { .. } => APP_KEY_STATUS,
            ConfigMessage::CompositionDataGet { .. } => COMPOSITION_DATA_GET,
            ConfigMessage::CompositionDataStatus { .. } => COMPOSITION_DATA_STATUS,
            ConfigMessage::GattProxyGet => GATT_PROXY_GET,
            ConfigMessage::GattProxySet { .. } => GATT_PROXY_SET,
            ConfigMessage::GattProxyStatus { .. } => GATT_PROXY_STATUS,
            ConfigMessage::NodeReset => NODE_RESET,
            ConfigMessage::NodeResetStatus => NODE_RESET_STATUS,
        }
    }

    /// Opcode of the status answering this request, `None` for a status
    pub fn response_opcode(&self) -> Option<u32> {
        match self {
            ConfigMessage::NetKeyAdd { .. }
            | ConfigMessage::NetKeyUpdate { .. }
            | ConfigMessage::NetKeyDelete { .. } => Some(NET_KEY_STATUS),
            ConfigMessage::AppKeyAdd { .. }
            | ConfigMessage::AppKeyUpdate { .. }
            | ConfigMessage::AppKeyDelete { .. } => Some(APP_KEY_STATUS),
            ConfigMessage::CompositionDataGet { .. } => Some(COMPOSITION_DATA_STATUS),
            ConfigMessage::GattProxyGet | ConfigMessage::GattProxySet { .. } => {
                Some(GATT_PROXY_STATUS)
            }
            ConfigMessage::NodeReset => Some(NODE_RESET_STATUS),
            _ => None,
        }
    }

    /// Whether the message is sent by a Configuration Client
    pub fn is_request(&self) -> bool {
        self.response_opcode().is_some()
    }

    /// Access payload: opcode followed by parameters
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(2 + 3 + KEY_SIZE);
        encode_opcode(self.opcode(), &mut out);
        match self {
            ConfigMessage::NetKeyAdd { index, key } | ConfigMessage::NetKeyUpdate { index, key } => {
                pack_index(*index, &mut out);
                out.extend_from_slice(key);
            }
            ConfigMessage::NetKeyDelete { index } => pack_index(*index, &mut out),
            ConfigMessage::NetKeyStatus { status, index } => {
                out.push(*status as u8);
                pack_index(*index, &mut out);
            }
            ConfigMessage::AppKeyAdd {
                net_index,
                app_index,
                key,
            }
            | ConfigMessage::AppKeyUpdate {
                net_index,
                app_index,
                key,
            } => {
                pack_index_pair(*net_index, *app_index, &mut out);
                out.extend_from_slice(key);
            }
            ConfigMessage::AppKeyDelete {
                net_index,
                app_index,
            } => pack_index_pair(*net_index, *app_index, &mut out),
            ConfigMessage::AppKeyStatus {
                status,
                net_index,
                app_index,
            } => {
                out.push(*status as u8);
                pack_index_pair(*net_index, *app_index, &mut out);
            }
            ConfigMessage::CompositionDataGet { page } => out.push(*page),
            ConfigMessage::CompositionDataStatus { page, data } => {
                out.push(*page);
                out.extend_from_slice(data);
            }
            ConfigMessage::GattProxySet { state } | ConfigMessage::GattProxyStatus { state } => {
                out.push(*state as u8)
            }
            ConfigMessage::GattProxyGet
            | ConfigMessage::NodeReset
            | ConfigMessage::NodeResetStatus => {}
        }
        Bytes::from(out)
    }

    /// Parses an access payload
    pub fn parse(payload: &[u8]) -> Result<Self, FoundationError> {
        let (opcode, params) = decode_opcode(payload)?;
        let message = match opcode {
            NET_KEY_ADD | NET_KEY_UPDATE => {
                expect_len(opcode, params, 2 + KEY_SIZE)?;
                let index = unpack_index(params);
                let key = key_at(params, 2);
                if opcode == NET_KEY_ADD {
                    ConfigMessage::NetKeyAdd { index, key }
                } else {
                    ConfigMessage::NetKeyUpdate { index, key }
                }
            }
            NET_KEY_DELETE => {
                expect_len(opcode, params, 2)?;
                ConfigMessage::NetKeyDelete {
                    index: unpack_index(params),
                }
            }
            NET_KEY_STATUS => {
                expect_len(opcode, params, 3)?;
                ConfigMessage::NetKeyStatus {
                    status: ConfigStatus::try_from(params[0])?,
                    index: unpack_index(&params[1..]),
                }
            }
            APP_KEY_ADD | APP_KEY_UPDATE => {
                expect_len(opcode, params, 3 + KEY_SIZE)?;
                let (net_index, app_index) = unpack_index_pair(params);
                let key = key_at(params, 3);
                if opcode == APP_KEY_ADD {
                    ConfigMessage::AppKeyAdd {
                        net_index,
                        app_index,
                        key,
                    }
                } else {
                    ConfigMessage::AppKeyUpdate {
                        net_index,
                        app_index,
                        key,
                    }
                }
            }
            APP_KEY_DELETE => {
                expect_len(opcode, params, 3)?;
                let (net_index, app_index) = unpack_index_pair(params);
                ConfigMessage::AppKeyDelete {
                    net_index,
                    app_index,
                }
            }
            APP_KEY_STATUS => {
                expect_len(opcode, params, 4)?;
                let (net_index, app_index) = unpack_index_pair(&params[1..]);
                ConfigMessage::AppKeyStatus {
                    status: ConfigStatus::try_from(params[0])?,
                    net_index,
                    app_index,
                }
            }
            COMPOSITION_DATA_GET => {
                expect_len(opcode, params, 1)?;
                ConfigMessage::CompositionDataGet { page: params[0] }
            }
            COMPOSITION_DATA_STATUS => {
                if params.is_empty() {
                    return Err(FoundationError::Malformed {
                        opcode,
                        expected: 1,
                        actual: 0,
                    });
                }
                ConfigMessage::CompositionDataStatus {
                    page: params[0],
                    data: Bytes::copy_from_slice(&params[1..]),
                }
            }
            GATT_PROXY_GET => {
                expect_len(opcode, params, 0)?;
                ConfigMessage::GattProxyGet
            }
            GATT_PROXY_SET => {
                expect_len(opcode, params, 1)?;
                ConfigMessage::GattProxySet {
                    state: proxy_state(params[0], false)?,
                }
            }
            GATT_PROXY_STATUS => {
                expect_len(opcode, params, 1)?;
                ConfigMessage::GattProxyStatus {
                    state: proxy_state(params[0], true)?,
                }
            }
            NODE_RESET => {
                expect_len(opcode, params, 0)?;
                ConfigMessage::NodeReset
            }
            NODE_RESET_STATUS => {
                expect_len(opcode, params, 0)?;
                ConfigMessage::NodeResetStatus
            }
            other => return Err(FoundationError::UnknownOpcode(other)),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: Key = [
        0x7d, 0xd7, 0x36, 0x4c, 0xd8, 0x42, 0xad, 0x18, 0xc1, 0x7c, 0x2b, 0x82, 0x0c, 0x84,
        0xc3, 0xd6,
    ];

    #[test]
    fn test_net_key_add_layout() {
        let encoded = ConfigMessage::NetKeyAdd {
            index: 0x0123,
            key: KEY,
        }
        .encode();
        assert_eq!(
            hex::encode(&encoded),
            "804023017dd7364cd842ad18c17c2b820c84c3d6"
        );
    }

    #[test]
    fn test_app_key_index_packing() {
        let message = ConfigMessage::AppKeyAdd {
            net_index: 0x0456,
            app_index: 0x0123,
            key: KEY,
        };
        let encoded = message.encode();
        assert_eq!(encoded[0], 0x00);
        assert_eq!(&encoded[1..4], &[0x56, 0x34, 0x12]);
        assert_eq!(ConfigMessage::parse(&encoded).unwrap(), message);
    }

    #[test]
    fn test_parse_statuses() {
        assert_eq!(
            ConfigMessage::parse(&hex::decode("8044000100").unwrap()).unwrap(),
            ConfigMessage::NetKeyStatus {
                status: ConfigStatus::Success,
                index: 1
            }
        );
        assert_eq!(
            ConfigMessage::parse(&hex::decode("8003040000a0").unwrap()).unwrap(),
            ConfigMessage::AppKeyStatus {
                status: ConfigStatus::InvalidNetKeyIndex,
                net_index: 0,
                app_index: 0x0A00
            }
        );
        assert_eq!(
            ConfigMessage::parse(&[0x80, 0x14, 0x02]).unwrap(),
            ConfigMessage::GattProxyStatus {
                state: FeatureState::NotSupported
            }
        );
        assert_eq!(
            ConfigMessage::parse(&[0x80, 0x4A]).unwrap(),
            ConfigMessage::NodeResetStatus
        );
    }

    #[test]
    fn test_invalid_messages() {
        assert!(matches!(
            ConfigMessage::parse(&[0x80, 0x13, 0x02]),
            Err(FoundationError::InvalidMessage(_))
        ));
        assert!(matches!(
            ConfigMessage::parse(&[0x80, 0x44, 0x42, 0x00, 0x00]),
            Err(FoundationError::InvalidMessage(_))
        ));
        assert!(matches!(
            ConfigMessage::parse(&[0x80, 0x44, 0x00]),
            Err(FoundationError::Malformed { expected: 3, actual: 1, .. })
        ));
        assert!(matches!(
            ConfigMessage::parse(&[0x80, 0x01]),
            Err(FoundationError::UnknownOpcode(0x8001))
        ));
    }

    #[test]
    fn test_request_classification() {
        assert!(ConfigMessage::NodeReset.is_request());
        assert!(!ConfigMessage::NodeResetStatus.is_request());
        assert_eq!(
            ConfigMessage::CompositionDataGet { page: 0 }.response_opcode(),
            Some(COMPOSITION_DATA_STATUS)
        );
        assert_eq!(
            ConfigMessage::GattProxySet {
                state: FeatureState::Enabled
            }
            .encode()[..],
            [0x80u8, 0x13, 0x01][..]
        );
    }
}
