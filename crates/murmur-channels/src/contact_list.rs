//! Contact list and roster group channels.
//!
//! The backend has a single buddy list in which one name may appear in
//! several groups, and no notion of pending subscriptions. Two channel
//! kinds sit on top of it:
//!
//! - the `subscribe` list, whose members are every name on the buddy list
//! - one channel per roster group, whose members are the names in it
//!
//! Membership requests from the protocol layer mutate the buddy list and
//! are applied immediately as full membership. Changes that originate in the
//! backend arrive through [`ContactListChannel::sync_member_added`] and
//! [`ContactListChannel::sync_member_removed`].

use std::rc::Rc;

use murmur_core::{
    Backend, BuddyId, ChannelError, ChannelEvent, EventQueue, GroupFlags, GroupId, Handle, HandleType,
    Handles, MembersChanged, Membership, ObjectPath, Placement,
};

use crate::{
    ChannelContext,
    properties::{CHANNEL_TYPE_CONTACT_LIST, ChannelProperties, contact_list_interfaces},
};

/// Which buddy-list view a channel represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// The `subscribe` list: every buddy, in any group.
    Subscribe,
    /// One roster group.
    Group(GroupId),
}

/// A contact list or roster group exposed as a channel.
#[derive(Debug)]
pub struct ContactListChannel<B: Backend> {
    backend: B,
    handles: Rc<Handles>,
    events: EventQueue,
    path: ObjectPath,
    handle_type: HandleType,
    target: Handle,
    name: String,
    kind: ListKind,
    membership: Membership,
    closed: bool,
}

impl<B: Backend> ContactListChannel<B> {
    /// Channel for the list or group `target` of `handle_type`.
    ///
    /// For a group, the backend group is created here if it does not exist
    /// yet and is never recreated.
    ///
    /// # Panics
    ///
    /// Panics if `handle_type` is a list type other than the `subscribe`
    /// list, or neither [`HandleType::List`] nor [`HandleType::Group`].
    pub fn new(
        ctx: &ChannelContext<B>,
        path: ObjectPath,
        handle_type: HandleType,
        target: Handle,
    ) -> Result<Self, ChannelError> {
        assert!(
            matches!(handle_type, HandleType::List | HandleType::Group),
            "invariant: contact list channel for handle type {handle_type:?}"
        );

        let (kind, name, flags) = if handle_type == HandleType::List {
            assert!(
                target == ctx.handles.subscribe_list(),
                "invariant: only the subscribe list is supported, got list handle {target}"
            );
            let name = ctx.handles.lists().resolve(target)?;
            let flags = GroupFlags { can_add: true, can_remove: true, can_rescind: true };
            (ListKind::Subscribe, name, flags)
        } else {
            let name = ctx.handles.groups().resolve(target)?;
            let group = ctx.backend.group_new(&name);
            let flags = GroupFlags { can_add: true, can_remove: true, can_rescind: false };
            (ListKind::Group(group), name, flags)
        };

        if let Some(repo) = ctx.handles.repo(handle_type) {
            repo.ref_handle(target)?;
        }
        let membership =
            Membership::new(Rc::clone(&ctx.handles), path.clone(), ctx.events.clone(), flags);

        tracing::debug!(channel = %path, %name, ?kind, "contact list channel opened");

        Ok(Self {
            backend: ctx.backend.clone(),
            handles: Rc::clone(&ctx.handles),
            events: ctx.events.clone(),
            path,
            handle_type,
            target,
            name,
            kind,
            membership,
            closed: false,
        })
    }

    /// Object path.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// List or group handle.
    pub fn target(&self) -> Handle {
        self.target
    }

    /// List or group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which view of the buddy list this is.
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Check if the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Membership sets.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Close the channel.
    ///
    /// Lists cannot be closed. A group can be closed once it is empty.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.kind == ListKind::Subscribe {
            return Err(ChannelError::NotImplemented(
                "you may not close contact list channels".into(),
            ));
        }
        if self.closed {
            tracing::debug!(channel = %self.path, "already closed");
            return Ok(());
        }
        if !self.membership.is_empty() {
            return Err(ChannelError::NotAvailable(format!("group '{}' is not empty", self.name)));
        }

        self.closed = true;
        self.events.push(&self.path, ChannelEvent::Closed);
        Ok(())
    }

    /// Add `handle` to the buddy list (for the subscribe list) or to this
    /// group.
    ///
    /// # Panics
    ///
    /// Panics if the backend already has an entry for the name that the
    /// channel's membership does not reflect.
    pub fn add_member(&mut self, handle: Handle, message: &str) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let backend = &self.backend;
        let kind = self.kind;
        self.membership.add_member(handle, message, |name| {
            let group = match kind {
                ListKind::Subscribe => {
                    assert!(
                        backend.find_buddy(name).is_none(),
                        "invariant: '{name}' is on the buddy list but not a subscribe member"
                    );
                    None
                },
                ListKind::Group(group) => {
                    assert!(
                        backend.find_buddy_in_group(name, group).is_none(),
                        "invariant: '{name}' is in group {group} but not a member"
                    );
                    Some(group)
                },
            };

            let buddy = backend.buddy_new(name);
            backend.blist_add_buddy(buddy, group);
            backend.account_add_buddy(buddy);
            Ok(Placement::Member)
        })
    }

    /// Remove `handle` from the buddy list (for the subscribe list, from
    /// every group) or from this group only.
    ///
    /// Missing backend entries are logged and skipped; duplicate entries in
    /// a group are purged.
    pub fn remove_member(&mut self, handle: Handle, message: &str) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let backend = &self.backend;
        let kind = self.kind;
        let list = self.name.as_str();
        self.membership.remove_member(handle, message, |name| {
            match kind {
                ListKind::Subscribe => {
                    let buddies = backend.find_buddies(name);
                    if buddies.is_empty() {
                        tracing::warn!(%name, %list, "member is not on the backend buddy list");
                    }
                    for buddy in buddies {
                        remove_buddy(backend, buddy);
                    }
                },
                ListKind::Group(group) => {
                    match backend.find_buddy_in_group(name, group) {
                        Some(buddy) => remove_buddy(backend, buddy),
                        None => tracing::warn!(%name, group = %list, "member is not in the backend group"),
                    }
                    while let Some(buddy) = backend.find_buddy_in_group(name, group) {
                        tracing::warn!(%name, group = %list, "was in group more than once, purging");
                        remove_buddy(backend, buddy);
                    }
                },
            }
            Ok(())
        })
    }

    /// Mirror a buddy the backend placed on this list or group.
    pub fn sync_member_added(&mut self, handle: Handle) {
        self.sync(MembersChanged {
            added: std::iter::once(handle).collect(),
            ..MembersChanged::default()
        });
    }

    /// Mirror a buddy the backend took off this list or group.
    pub fn sync_member_removed(&mut self, handle: Handle) {
        self.sync(MembersChanged {
            removed: std::iter::once(handle).collect(),
            ..MembersChanged::default()
        });
    }

    fn sync(&mut self, change: MembersChanged) {
        if self.closed {
            tracing::debug!(channel = %self.path, "ignoring roster change on closed channel");
            return;
        }
        self.membership.change_members(change);
    }

    /// Identity properties. Contact lists are never requested; the local
    /// user is reported as initiator.
    pub fn properties(&self) -> ChannelProperties {
        let self_handle = self.handles.self_handle();
        ChannelProperties {
            object_path: self.path.clone(),
            channel_type: CHANNEL_TYPE_CONTACT_LIST,
            target_handle: self.target,
            target_handle_type: self.handle_type,
            target_id: self.name.clone(),
            initiator_handle: self_handle,
            initiator_id: self.handles.contacts().inspect(self_handle).unwrap_or_default(),
            requested: false,
            interfaces: contact_list_interfaces(),
            destroyed: self.closed,
        }
    }
}

fn remove_buddy<B: Backend>(backend: &B, buddy: BuddyId) {
    let group = backend.buddy_group(buddy);
    backend.blist_remove_buddy(buddy);
    backend.account_remove_buddy(buddy, group);
}

impl<B: Backend> Drop for ContactListChannel<B> {
    fn drop(&mut self) {
        if let Some(repo) = self.handles.repo(self.handle_type) {
            repo.unref_handle(self.target);
        }
    }
}
