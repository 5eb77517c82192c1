//! Bearers for Bluetooth Mesh.
//!
//! A [`Bearer`] carries raw PDUs no longer than its MTU. A
//! [`ProxyConnection`] runs the Proxy Protocol on top of one, so callers
//! exchange whole network PDUs, beacons and proxy configuration messages.
//! [`ChannelBearer`] connects two ends in memory.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bearer;
pub mod channel;
pub mod connection;
pub mod error;

pub use bearer::{Bearer, BearerState, DEFAULT_PROXY_MTU};
pub use channel::ChannelBearer;
pub use connection::ProxyConnection;
pub use error::BearerError;
