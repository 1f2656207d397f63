//! Murmur bridge: the connection-level glue around the channels.
//!
//! [`ChannelManager`] owns every channel of one connection, routes backend
//! events to them and dispatches protocol requests by object path. It is
//! generic over the [`Backend`](murmur_core::Backend) it drives.

pub mod config;
pub mod error;
pub mod manager;

pub use config::{BridgeConfig, escape_as_identifier};
pub use error::BridgeError;
pub use manager::ChannelManager;
