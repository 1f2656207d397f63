//! Bridge error types.

use murmur_core::{ChannelError, ObjectPath};
use thiserror::Error;

/// Errors returned by [`crate::ChannelManager`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No live channel has this object path
    #[error("no such channel: {0}")]
    UnknownChannel(ObjectPath),

    /// The addressed channel rejected the operation
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl BridgeError {
    /// The channel error, if the channel itself rejected the request.
    pub fn channel_error(&self) -> Option<&ChannelError> {
        match self {
            Self::Channel(err) => Some(err),
            Self::UnknownChannel(_) => None,
        }
    }
}
