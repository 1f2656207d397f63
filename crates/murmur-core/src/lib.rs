//! Murmur core: the pieces every channel kind shares.
//!
//! - [`handle`]: process-lifetime handle registry with reference counting
//! - [`backend`]: the messaging backend and event-loop traits channels consume
//! - [`membership`]: the reconciler owning a channel's three member sets
//! - [`message`]: typed multi-part messages
//! - [`event`]: notifications channels emit towards the protocol layer
//! - [`error`]: error taxonomy
//!
//! Nothing in this crate performs I/O. Backends are passed in explicitly and
//! notifications are queued for the caller to drain.

pub mod backend;
pub mod error;
pub mod event;
pub mod handle;
pub mod membership;
pub mod message;

pub use backend::{
    Backend, BackendEvent, BuddyId, ConversationId, ConversationKind, EventLoop, GroupId, MessageFlags, TimerId,
    TypingState,
};
pub use error::{BackendError, ChangeReason, ChannelError, RemoveReason};
pub use event::{ChannelEvent, EventQueue, MembersChanged, ObjectPath};
pub use handle::{Handle, HandleRepo, HandleType, Handles};
pub use membership::{GroupFlags, Membership, Placement};
pub use message::{DeliveryStatus, Message, MessagePart, MessageType, PartValue};
