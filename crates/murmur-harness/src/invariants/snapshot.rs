//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of the bridge at a point in time:
//! every live channel, the contact handle reference counts and the backend's
//! live timers. Invariants operate on snapshots rather than live state to
//! ensure consistent, atomic checks.

use std::collections::{BTreeMap, BTreeSet};

use murmur_channels::{ChatChannel, ContactListChannel};
use murmur_core::{Backend, Handle, Handles, ObjectPath, TimerId};

/// Snapshot of the whole bridge.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Every live channel.
    pub channels: Vec<ChannelSnapshot>,
    /// Reference count of every allocated contact handle.
    pub contact_refs: BTreeMap<Handle, u32>,
    /// Connection's own contact, referenced for the connection's lifetime.
    pub self_handle: Option<Handle>,
    /// Timers live in the backend.
    pub live_timers: BTreeSet<TimerId>,
    /// Closed flag observations per channel, oldest first.
    pub closed_history: BTreeMap<ObjectPath, Vec<bool>>,
}

impl SystemSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot holding only `channels`.
    pub fn from_channels(channels: Vec<ChannelSnapshot>) -> Self {
        Self { channels, ..Self::default() }
    }

    /// Capture handle reference counts from `handles`.
    pub fn with_handles(mut self, handles: &Handles) -> Self {
        let contacts = handles.contacts();
        self.contact_refs = (1..=contacts.len())
            .filter_map(|raw| Handle::new(u32::try_from(raw).ok()?))
            .map(|h| (h, contacts.ref_count(h)))
            .collect();
        self.self_handle = Some(handles.self_handle());
        self
    }

    /// Record the backend's live timers.
    pub fn with_live_timers(mut self, timers: impl IntoIterator<Item = TimerId>) -> Self {
        self.live_timers = timers.into_iter().collect();
        self
    }

    /// Add a channel snapshot.
    pub fn add_channel(&mut self, channel: ChannelSnapshot) {
        self.channels.push(channel);
    }

    /// Append this snapshot's closed flags to `history` and attach the
    /// accumulated history.
    ///
    /// History of paths with no channel in this snapshot is forgotten, so a
    /// path reused by a later channel starts afresh.
    pub fn record_history(&mut self, history: &mut BTreeMap<ObjectPath, Vec<bool>>) {
        history.retain(|path, _| self.channels.iter().any(|c| &c.path == path));
        for channel in &self.channels {
            history.entry(channel.path.clone()).or_default().push(channel.closed);
        }
        self.closed_history.clone_from(history);
    }
}

/// Snapshot of one channel.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    /// Object path.
    pub path: ObjectPath,
    /// Whether the channel is closed.
    pub closed: bool,
    /// Full members.
    pub members: BTreeSet<Handle>,
    /// Local-pending members.
    pub local_pending: BTreeSet<Handle>,
    /// Remote-pending members.
    pub remote_pending: BTreeSet<Handle>,
    /// Contact handles the channel itself holds a reference on.
    pub held_contacts: Vec<Handle>,
    /// Typing resend timer.
    pub typing_timer: Option<TimerId>,
}

impl ChannelSnapshot {
    /// Open channel at `path` with no members, held handles or timer.
    pub fn new(path: ObjectPath) -> Self {
        Self {
            path,
            closed: false,
            members: BTreeSet::new(),
            local_pending: BTreeSet::new(),
            remote_pending: BTreeSet::new(),
            held_contacts: Vec::new(),
            typing_timer: None,
        }
    }

    /// Set the closed flag.
    pub fn with_closed(mut self, closed: bool) -> Self {
        self.closed = closed;
        self
    }

    /// Set full members.
    pub fn with_members(mut self, members: impl IntoIterator<Item = Handle>) -> Self {
        self.members = members.into_iter().collect();
        self
    }

    /// Set remote-pending members.
    pub fn with_remote_pending(mut self, pending: impl IntoIterator<Item = Handle>) -> Self {
        self.remote_pending = pending.into_iter().collect();
        self
    }

    /// Set the handles the channel itself references.
    pub fn with_held_contacts(mut self, held: impl IntoIterator<Item = Handle>) -> Self {
        self.held_contacts = held.into_iter().collect();
        self
    }

    /// Set the typing timer.
    pub fn with_typing_timer(mut self, timer: TimerId) -> Self {
        self.typing_timer = Some(timer);
        self
    }

    /// Capture a chat channel.
    pub fn from_chat<B: Backend>(channel: &ChatChannel<B>) -> Self {
        let membership = channel.membership();
        Self {
            path: channel.path().clone(),
            closed: channel.is_closed(),
            members: membership.members().clone(),
            local_pending: membership.local_pending().clone(),
            remote_pending: membership.remote_pending().clone(),
            held_contacts: vec![channel.target(), channel.initiator()],
            typing_timer: channel.typing_timer(),
        }
    }

    /// Capture a contact list channel.
    pub fn from_contact_list<B: Backend>(channel: &ContactListChannel<B>) -> Self {
        let membership = channel.membership();
        Self {
            closed: channel.is_closed(),
            members: membership.members().clone(),
            local_pending: membership.local_pending().clone(),
            remote_pending: membership.remote_pending().clone(),
            ..Self::new(channel.path().clone())
        }
    }

    /// Every handle in any of the three sets.
    pub fn all_members(&self) -> impl Iterator<Item = Handle> + '_ {
        self.members.iter().chain(&self.local_pending).chain(&self.remote_pending).copied()
    }
}
