//! Murmur channels: the externally visible channel state machines.
//!
//! - [`ChatChannel`]: a one-to-one conversation with lifecycle, rescue,
//!   typed messages, invitations and chat states
//! - [`ContactListChannel`]: the subscribe list or a roster group, with
//!   membership reconciled against the backend buddy list
//!
//! Channels are synchronous and sans-IO. They call into the [`Backend`]
//! passed at construction and push notifications onto the connection's
//! [`EventQueue`].

use std::rc::Rc;

use murmur_core::{Backend, EventQueue, Handles};

pub mod chat;
pub mod contact_list;
pub mod properties;
pub mod translator;
pub mod typing;

pub use chat::{ChatChannel, Lifecycle};
pub use contact_list::{ContactListChannel, ListKind};
pub use properties::{ChannelProperties, MessagesProperties};
pub use translator::{Inbound, Outbound, decode_inbound, encode_outbound, strip_markup};
pub use typing::{ChatState, TypingScheduler};

/// Connection-wide collaborators every channel is built with.
#[derive(Debug, Clone)]
pub struct ChannelContext<B: Backend> {
    /// Messaging backend.
    pub backend: B,
    /// Handle repos of the connection.
    pub handles: Rc<Handles>,
    /// Outbox for channel notifications.
    pub events: EventQueue,
}

impl<B: Backend> ChannelContext<B> {
    /// Bundle a backend with fresh handle repos for `self_id` and an empty
    /// event queue.
    pub fn new(backend: B, self_id: &str) -> Self {
        Self { backend, handles: Rc::new(Handles::new(self_id)), events: EventQueue::new() }
    }
}
