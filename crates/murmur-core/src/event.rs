//! Externally visible channel notifications.
//!
//! Channels are sans-IO: they never call into the protocol layer. Every
//! notification a channel produces is pushed onto a shared [`EventQueue`]
//! tagged with the channel's object path, and the driver drains the queue
//! after each call.

use std::{cell::RefCell, collections::BTreeSet, fmt, rc::Rc};

use crate::{
    error::{ChangeReason, ChannelError},
    handle::Handle,
    message::Message,
};

/// Stable identifier of a channel on the protocol bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath(String);

impl ObjectPath {
    /// Wrap a path string.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single atomic change to a channel's membership sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MembersChanged {
    /// Free-form message accompanying the change.
    pub message: String,
    /// Handles that became full members.
    pub added: BTreeSet<Handle>,
    /// Handles that left every set.
    pub removed: BTreeSet<Handle>,
    /// Handles that became local-pending.
    pub local_pending: BTreeSet<Handle>,
    /// Handles that became remote-pending.
    pub remote_pending: BTreeSet<Handle>,
    /// Who caused the change. `None` for the backend itself.
    pub actor: Option<Handle>,
    /// Why the change happened.
    pub reason: Option<ChangeReason>,
}

/// Notifications emitted by channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The channel signalled closing. Fired on every effective close,
    /// including a rescue that keeps the channel alive.
    Closed,

    /// Membership sets changed.
    MembersChanged(MembersChanged),

    /// An inbound message was queued as pending.
    MessageReceived(Message),

    /// Pending messages were acknowledged and removed.
    PendingMessagesRemoved(Vec<u32>),

    /// Disposition of an outbound message. Exactly one per send.
    SendCompleted {
        /// The message as it was handed to the channel.
        message: Message,
        /// Delivery token on success (always empty), or the failure.
        outcome: Result<String, ChannelError>,
    },
}

/// Shared outbox of `(object path, event)` pairs.
///
/// Clones share the same queue, so every channel of a connection can push
/// into one place.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Rc<RefCell<Vec<(ObjectPath, ChannelEvent)>>>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, path: &ObjectPath, event: ChannelEvent) {
        tracing::trace!(channel = %path, ?event, "channel event");
        self.inner.borrow_mut().push((path.clone(), event));
    }

    /// Take all queued events, oldest first.
    pub fn drain(&self) -> Vec<(ObjectPath, ChannelEvent)> {
        std::mem::take(&mut *self.inner.borrow_mut())
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}
