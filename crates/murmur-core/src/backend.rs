//! Messaging backend abstraction.
//!
//! Channels never talk to a protocol plugin directly. Everything they need
//! from the backend (conversations, the buddy list, typing announcements and
//! the event loop's timers) goes through the [`Backend`] trait, passed
//! explicitly into every channel constructor.
//!
//! Backends are cheap handles: implementations are expected to be
//! reference-counted so that `clone()` shares state. All calls are
//! synchronous and run on the single event-loop thread.

use std::{fmt, time::Duration};

use crate::error::BackendError;

macro_rules! backend_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

backend_id!(
    /// Backend conversation object.
    ConversationId
);
backend_id!(
    /// Backend buddy-list entry. One name may have several entries.
    BuddyId
);
backend_id!(
    /// Backend roster group.
    GroupId
);
backend_id!(
    /// Event-loop timer.
    TimerId
);

/// Kind of a backend conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    /// One-to-one instant message conversation.
    Im,
    /// Multi-user chat.
    Chat,
}

/// Typing state as understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypingState {
    /// Not typing.
    NotTyping,
    /// Actively typing.
    Typing,
    /// Typed something and paused.
    Typed,
}

/// Flags attached to backend messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MessageFlags(u32);

impl MessageFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Outgoing message (local echo).
    pub const SEND: Self = Self(0x0001);
    /// Incoming message.
    pub const RECV: Self = Self(0x0002);
    /// System notice.
    pub const SYSTEM: Self = Self(0x0004);
    /// Automatic response (away message).
    pub const AUTO_RESP: Self = Self(0x0008);
    /// Error report; the text is a localized error message.
    pub const ERROR: Self = Self(0x0200);
    /// Message was delayed (offline storage, history).
    pub const DELAYED: Self = Self(0x0400);

    /// Raw flag bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits; unknown bits are preserved.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Check if every flag in `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Event-loop primitives: timers and the wall clock.
///
/// # Invariants
///
/// - Timers are repeating: a timer fires every `interval` until removed.
/// - `timeout_remove` takes effect before it returns; a removed timer never
///   fires again.
pub trait EventLoop {
    /// Arm a repeating timer.
    fn timeout_add(&self, interval: Duration) -> TimerId;

    /// Remove a timer. Returns false if it was not live.
    fn timeout_remove(&self, timer: TimerId) -> bool;

    /// Current wall-clock time in seconds since the Unix epoch.
    fn now_secs(&self) -> i64;
}

/// Messaging backend consumed by the channels.
pub trait Backend: EventLoop + Clone + 'static {
    /// Create a one-to-one conversation with `peer`.
    fn conversation_new(&self, peer: &str) -> ConversationId;

    /// Destroy a conversation. Later calls referring to it fail.
    fn conversation_destroy(&self, conv: ConversationId);

    /// Kind of `conv`. `None` if it does not exist.
    fn conversation_kind(&self, conv: ConversationId) -> Option<ConversationKind>;

    /// Send plain text (with backend markup for line breaks) to `conv`.
    fn im_send(
        &self,
        conv: ConversationId,
        text: &str,
        flags: MessageFlags,
    ) -> Result<(), BackendError>;

    /// Invite `name` into the chat `conv`.
    fn chat_add_user(
        &self,
        conv: ConversationId,
        name: &str,
        message: &str,
    ) -> Result<(), BackendError>;

    /// Remove `name` from the chat `conv`.
    fn chat_remove_user(
        &self,
        conv: ConversationId,
        name: &str,
        reason: &str,
    ) -> Result<(), BackendError>;

    /// Check if the account's protocol supports typing notifications.
    fn supports_typing(&self) -> bool;

    /// Announce a typing state to `peer`.
    ///
    /// Returns the number of seconds after which the announcement must be
    /// repeated, or 0 if the protocol has no such timeout (or can no longer
    /// send).
    fn send_typing(&self, peer: &str, state: TypingState) -> u32;

    /// Recognize an action-style payload and return its text without the
    /// action marker.
    fn detect_action(&self, text: &str) -> Option<String> {
        text.strip_prefix(ACTION_MARKER).map(str::to_owned)
    }

    /// Create a buddy-list entry for `name`, not yet placed in any group.
    fn buddy_new(&self, name: &str) -> BuddyId;

    /// Place `buddy` in `group`, or in the backend's default group.
    fn blist_add_buddy(&self, buddy: BuddyId, group: Option<GroupId>);

    /// Remove `buddy` from the buddy list.
    fn blist_remove_buddy(&self, buddy: BuddyId);

    /// Subscribe the account to `buddy` on the server.
    fn account_add_buddy(&self, buddy: BuddyId);

    /// Unsubscribe the account from `buddy` as a member of `group`.
    fn account_remove_buddy(&self, buddy: BuddyId, group: Option<GroupId>);

    /// Group `buddy` is placed in.
    fn buddy_group(&self, buddy: BuddyId) -> Option<GroupId>;

    /// Some entry for `name`, in any group.
    fn find_buddy(&self, name: &str) -> Option<BuddyId>;

    /// Every entry for `name`, across all groups.
    fn find_buddies(&self, name: &str) -> Vec<BuddyId>;

    /// An entry for `name` in `group`.
    fn find_buddy_in_group(&self, name: &str, group: GroupId) -> Option<BuddyId>;

    /// Group called `name`, created if it does not exist.
    fn group_new(&self, name: &str) -> GroupId;

    /// Name of `group`.
    fn group_name(&self, group: GroupId) -> Option<String>;
}

/// Events the backend raises towards the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// The backend created a conversation on its own, usually because a
    /// peer started talking to us.
    ConversationCreated {
        /// New conversation.
        conversation: ConversationId,
        /// Name of the peer.
        peer: String,
    },

    /// A message was written to a conversation.
    ImReceived {
        /// Conversation the message belongs to.
        conversation: ConversationId,
        /// Backend markup.
        markup: String,
        /// Backend message flags.
        flags: MessageFlags,
        /// Time the message was sent, Unix seconds.
        sent_at: i64,
    },

    /// A buddy-list entry was placed in a group.
    BuddyAdded {
        /// Buddy name.
        name: String,
        /// Group name. `None` for the default group.
        group: Option<String>,
    },

    /// A buddy-list entry was removed.
    BuddyRemoved {
        /// Buddy name.
        name: String,
        /// Group the entry was in.
        group: Option<String>,
    },

    /// An event-loop timer fired.
    TimerFired(TimerId),
}

/// Prefix the backend uses to mark action messages.
pub const ACTION_MARKER: &str = "/me ";
