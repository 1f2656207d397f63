//! Membership reconciler.
//!
//! Both channel kinds expose three disjoint handle sets: members,
//! local-pending and remote-pending. [`Membership`] owns those sets and is
//! the only thing allowed to mutate them. Every mutation is computed as a
//! delta, applied to all three sets at once, and announced as a single
//! [`ChannelEvent::MembersChanged`].
//!
//! The reconciler also owns the handle references: a handle is referenced
//! when it enters the first set and released when it leaves the last one,
//! or when the reconciler itself is dropped.
//!
//! Backend side effects are supplied by the caller as closures, so the same
//! reconciler serves chat invitations and roster groups.

use std::{collections::BTreeSet, rc::Rc};

use crate::{
    error::{ChangeReason, ChannelError},
    event::{ChannelEvent, EventQueue, MembersChanged, ObjectPath},
    handle::{Handle, Handles},
};

/// Capability flags advertised on the group interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupFlags {
    /// Members may be added.
    pub can_add: bool,
    /// Members may be removed.
    pub can_remove: bool,
    /// Remote-pending invitations may be withdrawn.
    pub can_rescind: bool,
}

/// Where a handle ends up after a successful add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Full member.
    Member,
    /// Invited, not yet joined.
    RemotePending {
        /// Who sent the invitation.
        actor: Handle,
        /// Reason reported with the change.
        reason: ChangeReason,
    },
}

/// The three membership sets of one channel.
#[derive(Debug)]
pub struct Membership {
    handles: Rc<Handles>,
    path: ObjectPath,
    events: EventQueue,
    flags: GroupFlags,
    members: BTreeSet<Handle>,
    local_pending: BTreeSet<Handle>,
    remote_pending: BTreeSet<Handle>,
}

impl Membership {
    /// Empty membership for the channel at `path`.
    pub fn new(handles: Rc<Handles>, path: ObjectPath, events: EventQueue, flags: GroupFlags) -> Self {
        Self {
            handles,
            path,
            events,
            flags,
            members: BTreeSet::new(),
            local_pending: BTreeSet::new(),
            remote_pending: BTreeSet::new(),
        }
    }

    /// Full members.
    pub fn members(&self) -> &BTreeSet<Handle> {
        &self.members
    }

    /// Members awaiting local approval.
    pub fn local_pending(&self) -> &BTreeSet<Handle> {
        &self.local_pending
    }

    /// Members invited but not yet joined.
    pub fn remote_pending(&self) -> &BTreeSet<Handle> {
        &self.remote_pending
    }

    /// Advertised capability flags.
    pub fn flags(&self) -> GroupFlags {
        self.flags
    }

    /// Handle of the connection's own contact.
    pub fn self_handle(&self) -> Handle {
        self.handles.self_handle()
    }

    /// Check if `handle` is in any of the three sets.
    pub fn contains(&self, handle: Handle) -> bool {
        self.members.contains(&handle)
            || self.local_pending.contains(&handle)
            || self.remote_pending.contains(&handle)
    }

    /// Check if the channel has no members of any kind.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.local_pending.is_empty() && self.remote_pending.is_empty()
    }

    /// Add `handle`, running `on_add` with its name to mutate the backend.
    ///
    /// Already being a full member is a no-op. The sets only change if
    /// `on_add` succeeds.
    pub fn add_member<F>(&mut self, handle: Handle, message: &str, on_add: F) -> Result<(), ChannelError>
    where
        F: FnOnce(&str) -> Result<Placement, ChannelError>,
    {
        if self.members.contains(&handle) {
            tracing::debug!(channel = %self.path, %handle, "already a member");
            return Ok(());
        }
        if !self.flags.can_add {
            return Err(ChannelError::NotAvailable("members may not be added".into()));
        }

        let name = self.handles.contacts().resolve(handle)?;
        let placement = on_add(&name)?;

        let mut change = MembersChanged { message: message.to_owned(), ..MembersChanged::default() };
        match placement {
            Placement::Member => {
                change.added.insert(handle);
            },
            Placement::RemotePending { actor, reason } => {
                change.remote_pending.insert(handle);
                change.actor = Some(actor);
                change.reason = Some(reason);
            },
        }
        self.change_members(change);
        Ok(())
    }

    /// Remove `handle` from every set, running `on_remove` with its name to
    /// mutate the backend.
    ///
    /// Removing a handle that is in no set is a no-op. The change is
    /// reported with no actor and [`ChangeReason::None`].
    pub fn remove_member<F>(&mut self, handle: Handle, message: &str, on_remove: F) -> Result<(), ChannelError>
    where
        F: FnOnce(&str) -> Result<(), ChannelError>,
    {
        if !self.contains(handle) {
            tracing::debug!(channel = %self.path, %handle, "not a member, nothing to remove");
            return Ok(());
        }

        let allowed = if self.members.contains(&handle) {
            self.flags.can_remove
        } else if self.remote_pending.contains(&handle) {
            self.flags.can_rescind || self.flags.can_remove
        } else {
            true
        };
        if !allowed {
            return Err(ChannelError::NotAvailable("members may not be removed".into()));
        }

        let name = self.handles.contacts().resolve(handle)?;
        on_remove(&name)?;

        let mut change = MembersChanged {
            message: message.to_owned(),
            reason: Some(ChangeReason::None),
            ..MembersChanged::default()
        };
        change.removed.insert(handle);
        self.change_members(change);
        Ok(())
    }

    /// Apply a raw delta to the three sets.
    ///
    /// Handles listed in `added`, `local_pending` or `remote_pending` move
    /// into that set and out of the other two; handles in `removed` leave
    /// all sets. Requests that do not change anything are dropped from the
    /// delta. Returns the effective delta, also emitted as an event, or
    /// `None` if nothing changed.
    ///
    /// # Panics
    ///
    /// Panics if a handle is not a registered contact, or appears in more
    /// than one list of the request.
    pub fn change_members(&mut self, request: MembersChanged) -> Option<MembersChanged> {
        let MembersChanged { message, added, removed, local_pending, remote_pending, actor, reason } =
            request;

        let mut effective = MembersChanged { message, actor, reason, ..MembersChanged::default() };
        let mut seen = BTreeSet::new();

        for (handles, target) in [
            (added, Target::Members),
            (local_pending, Target::LocalPending),
            (remote_pending, Target::RemotePending),
        ] {
            for handle in handles {
                assert!(seen.insert(handle), "invariant: handle {handle} listed twice in one change");
                if self.place(handle, target) {
                    target.delta_mut(&mut effective).insert(handle);
                }
            }
        }

        for handle in removed {
            assert!(seen.insert(handle), "invariant: handle {handle} listed twice in one change");
            if self.evict(handle) {
                effective.removed.insert(handle);
            }
        }

        let unchanged = effective.added.is_empty()
            && effective.removed.is_empty()
            && effective.local_pending.is_empty()
            && effective.remote_pending.is_empty();
        if unchanged {
            return None;
        }

        tracing::debug!(
            channel = %self.path,
            added = effective.added.len(),
            removed = effective.removed.len(),
            local_pending = effective.local_pending.len(),
            remote_pending = effective.remote_pending.len(),
            "members changed"
        );
        self.events.push(&self.path, ChannelEvent::MembersChanged(effective.clone()));
        Some(effective)
    }

    /// Release every handle reference without emitting a change.
    ///
    /// Called when the channel is torn down. Safe to call more than once.
    pub fn release_all(&mut self) {
        let all: Vec<Handle> = std::mem::take(&mut self.members)
            .into_iter()
            .chain(std::mem::take(&mut self.local_pending))
            .chain(std::mem::take(&mut self.remote_pending))
            .collect();
        for handle in all {
            self.handles.contacts().unref_handle(handle);
        }
    }

    /// Move `handle` into `target`. Returns false if it already was there.
    fn place(&mut self, handle: Handle, target: Target) -> bool {
        if target.set_mut(self).contains(&handle) {
            return false;
        }

        let was_present = self.evict_silently(handle);
        if !was_present {
            assert!(
                self.handles.contacts().ref_handle(handle).is_ok(),
                "invariant: member handle {handle} is not a registered contact"
            );
        }
        target.set_mut(self).insert(handle);
        true
    }

    /// Remove `handle` from all sets and release it. Returns false if it
    /// was in none.
    fn evict(&mut self, handle: Handle) -> bool {
        let was_present = self.evict_silently(handle);
        if was_present {
            self.handles.contacts().unref_handle(handle);
        }
        was_present
    }

    fn evict_silently(&mut self, handle: Handle) -> bool {
        let a = self.members.remove(&handle);
        let b = self.local_pending.remove(&handle);
        let c = self.remote_pending.remove(&handle);
        a || b || c
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Members,
    LocalPending,
    RemotePending,
}

impl Target {
    fn set_mut(self, membership: &mut Membership) -> &mut BTreeSet<Handle> {
        match self {
            Self::Members => &mut membership.members,
            Self::LocalPending => &mut membership.local_pending,
            Self::RemotePending => &mut membership.remote_pending,
        }
    }

    fn delta_mut(self, change: &mut MembersChanged) -> &mut BTreeSet<Handle> {
        match self {
            Self::Members => &mut change.added,
            Self::LocalPending => &mut change.local_pending,
            Self::RemotePending => &mut change.remote_pending,
        }
    }
}
