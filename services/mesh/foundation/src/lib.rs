//! Bluetooth Mesh foundation models.
//!
//! Encodes Configuration Client requests, parses the matching statuses and
//! applies them to a [`mesh_model::NetworkHandle`] through
//! [`ConfigurationMessageHandler`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod composition;
pub mod error;
pub mod handler;
pub mod message;
pub mod opcode;

pub use composition::parse_page0;
pub use error::FoundationError;
pub use handler::ConfigurationMessageHandler;
pub use message::{ConfigMessage, ConfigStatus};
pub use opcode::{decode_opcode, encode_opcode};
