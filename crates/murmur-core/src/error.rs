//! Error types for the channel bridge.
//!
//! [`ChannelError`] is what channel operations return to the external
//! protocol layer. [`BackendError`] is what the messaging backend reports
//! when a mutation it accepted fails; it reaches callers either wrapped in
//! [`ChannelError::Backend`] or as the disposition of a send.

use thiserror::Error;

/// Errors returned by channel operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Malformed request (message parts, typing state, pending message id)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not supported by this channel or backend protocol
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Handle not resolvable in the handle registry
    #[error("unknown handle: {0}")]
    UnknownHandle(u32),

    /// Channel already closed; no further operations are accepted
    #[error("channel is closed")]
    Closed,

    /// Operation is valid but cannot be carried out in the current state
    #[error("not available: {0}")]
    NotAvailable(String),

    /// Failure surfaced by the messaging backend
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl ChannelError {
    /// Returns true if the request was rejected before any backend call.
    ///
    /// Validation failures leave no side effects. Backend failures may have
    /// happened after part of an operation already went through.
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::Backend(_))
    }
}

/// Failures reported by the messaging backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Backend refused or failed to send
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Conversation object no longer exists on the backend
    #[error("no such conversation: {0}")]
    NoSuchConversation(u64),

    /// Account is not connected
    #[error("account offline")]
    Offline,
}

/// Reason attached to a member removal.
///
/// Codes are fixed; converting an out-of-range code is a contract
/// violation, see [`RemoveReason::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RemoveReason {
    /// Member disconnected.
    Disconnected = 0,
    /// Member dropped because of a network error.
    NetworkError = 1,
    /// Member lacks permission.
    PermissionDenied = 2,
    /// Handle was not valid for this conversation.
    InvalidHandle = 3,
    /// Request carried an invalid argument.
    InvalidArgument = 4,
    /// No particular reason.
    None = 5,
}

impl RemoveReason {
    /// Every reason, in code order.
    pub const ALL: [Self; 6] = [
        Self::Disconnected,
        Self::NetworkError,
        Self::PermissionDenied,
        Self::InvalidHandle,
        Self::InvalidArgument,
        Self::None,
    ];

    /// Convert a raw reason code.
    ///
    /// # Panics
    ///
    /// Panics if `code` is outside the fixed enumeration. Callers validate
    /// codes at the protocol boundary; an unknown code here is a bug.
    pub fn from_code(code: u32) -> Self {
        let reason = Self::try_from_code(code);
        assert!(reason.is_some(), "invariant: remove reason code {code} out of range");
        reason.unwrap_or(Self::None)
    }

    /// Convert a raw reason code, `None` if it is out of range.
    pub fn try_from_code(code: u32) -> Option<Self> {
        usize::try_from(code).ok().and_then(|index| Self::ALL.get(index).copied())
    }

    /// Raw reason code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Reason string handed to the backend when removing a chat user.
    pub fn backend_text(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::NetworkError => "NetworkError",
            Self::PermissionDenied => "Permission Denied",
            Self::InvalidHandle => "Invalid Handle",
            Self::InvalidArgument => "Invalid Argument",
            Self::None => "",
        }
    }
}

/// Reason reported in a membership-changed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    /// No particular reason.
    None,
    /// Member was invited by the actor.
    Invited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_are_not_validation() {
        let err: ChannelError = BackendError::Offline.into();
        assert!(!err.is_validation());
        assert!(ChannelError::InvalidArgument("bad".into()).is_validation());
        assert!(ChannelError::Closed.is_validation());
    }

    #[test]
    fn reason_codes_round_trip() {
        for reason in RemoveReason::ALL {
            assert_eq!(RemoveReason::from_code(reason.code()), reason);
        }
    }

    #[test]
    #[should_panic(expected = "invariant: remove reason code 6 out of range")]
    fn out_of_range_reason_panics() {
        let _ = RemoveReason::from_code(6);
    }

    #[test]
    fn out_of_range_reason_is_checked() {
        assert_eq!(RemoveReason::try_from_code(2), Some(RemoveReason::PermissionDenied));
        assert_eq!(RemoveReason::try_from_code(6), None);
        assert_eq!(RemoveReason::try_from_code(u32::MAX), None);
    }

    #[test]
    fn error_messages() {
        assert_eq!(ChannelError::UnknownHandle(9).to_string(), "unknown handle: 9");
        assert_eq!(
            ChannelError::from(BackendError::SendFailed("timeout".into())).to_string(),
            "send failed: timeout"
        );
    }
}
