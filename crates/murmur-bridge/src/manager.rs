//! Channel manager: owns every channel of one connection.
//!
//! The manager is the seam between the two outer collaborators. Requests
//! from the protocol layer arrive as method calls addressed by object path.
//! Events from the backend arrive through [`ChannelManager::handle_event`]
//! and are routed to the channel that owns the conversation, the roster
//! entry or the timer. Notifications from every channel collect in one
//! queue, drained with [`ChannelManager::drain_events`].
//!
//! Roster events arrive after the backend has already changed, so contact
//! list membership is reconciled against the backend buddy list rather
//! than replayed from the event. Every contact list mutation reconciles
//! the contact before and after it runs, which keeps the lists correct
//! whether or not pending events have been handled yet.
//!
//! Closed channels are dropped once no operation can reach them any more:
//! torn-down chats and closed groups. Rescued chats stay.

use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};

use murmur_channels::{ChannelContext, ChannelProperties, ChatChannel, ContactListChannel};
use murmur_core::{
    Backend, BackendEvent, ChannelError, ChannelEvent, ConversationId, Handle, HandleType,
    Message, MessageFlags, ObjectPath, RemoveReason, TimerId,
};

use crate::{
    config::{BridgeConfig, escape_as_identifier},
    error::BridgeError,
};

/// All channels of one connection.
#[derive(Debug)]
pub struct ChannelManager<B: Backend> {
    config: BridgeConfig,
    ctx: ChannelContext<B>,
    base: String,
    chats: BTreeMap<ObjectPath, ChatChannel<B>>,
    by_conversation: BTreeMap<ConversationId, ObjectPath>,
    subscribe: ContactListChannel<B>,
    groups: BTreeMap<String, ContactListChannel<B>>,
    next_chat: u32,
}

impl<B: Backend> ChannelManager<B> {
    /// Manager for the account in `config`, talking to `backend`.
    ///
    /// The subscribe list channel exists for the manager's lifetime.
    pub fn new(backend: B, config: BridgeConfig) -> Result<Self, BridgeError> {
        let ctx = ChannelContext::new(backend, &config.self_id);
        let base = config.connection_path();
        let subscribe = ContactListChannel::new(
            &ctx,
            ObjectPath::new(format!("{base}/ContactListChannel/subscribe")),
            HandleType::List,
            ctx.handles.subscribe_list(),
        )?;

        tracing::info!(connection = %base, self_id = %config.self_id, "channel manager ready");

        Ok(Self {
            config,
            ctx,
            base,
            chats: BTreeMap::new(),
            by_conversation: BTreeMap::new(),
            subscribe,
            groups: BTreeMap::new(),
            next_chat: 0,
        })
    }

    /// Configuration the manager was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Shared channel context: backend, handles, event queue.
    pub fn context(&self) -> &ChannelContext<B> {
        &self.ctx
    }

    /// Contact handle for `name`, allocated if needed.
    pub fn contact(&self, name: &str) -> Handle {
        self.ctx.handles.contacts().ensure(name)
    }

    /// Object path of the subscribe list.
    pub fn subscribe_path(&self) -> &ObjectPath {
        self.subscribe.path()
    }

    /// Live chat channels.
    pub fn chats(&self) -> impl Iterator<Item = &ChatChannel<B>> {
        self.chats.values()
    }

    /// Live contact list channels, subscribe list first.
    pub fn contact_lists(&self) -> impl Iterator<Item = &ContactListChannel<B>> {
        std::iter::once(&self.subscribe).chain(self.groups.values())
    }

    /// Chat channel at `path`.
    pub fn chat(&self, path: &ObjectPath) -> Option<&ChatChannel<B>> {
        self.chats.get(path)
    }

    /// Contact list channel at `path`.
    pub fn contact_list(&self, path: &ObjectPath) -> Option<&ContactListChannel<B>> {
        self.contact_lists().find(|list| list.path() == path)
    }

    /// Identity properties of every live channel.
    pub fn list_channels(&self) -> Vec<ChannelProperties> {
        self.chats
            .values()
            .map(ChatChannel::properties)
            .chain(self.contact_lists().map(ContactListChannel::properties))
            .collect()
    }

    /// Take every pending channel notification, oldest first.
    pub fn drain_events(&self) -> Vec<(ObjectPath, ChannelEvent)> {
        self.ctx.events.drain()
    }

    /// Open (or return the already open) chat with `peer`, initiated by the
    /// local user.
    pub fn request_chat(&mut self, peer: &str) -> Result<ObjectPath, BridgeError> {
        let target = self.contact(peer);
        if let Some(existing) = self.chats.values().find(|c| c.target() == target && !c.is_closed()) {
            return Ok(existing.path().clone());
        }

        let path = self.next_chat_path();
        let chat = ChatChannel::open(&self.ctx, path.clone(), target, self.ctx.handles.self_handle())?;
        Ok(self.insert_chat(chat))
    }

    /// Open (or return the already open) channel for roster group `name`.
    pub fn request_group(&mut self, name: &str) -> Result<ObjectPath, BridgeError> {
        Ok(self.ensure_group(name)?.path().clone())
    }

    /// Close the channel at `path`.
    pub fn close(&mut self, path: &ObjectPath) -> Result<(), BridgeError> {
        if let Some(chat) = self.chats.get_mut(path) {
            chat.close();
        } else {
            self.contact_list_mut(path)?.close()?;
        }
        self.reap();
        Ok(())
    }

    /// Destroy the chat at `path`, discarding its pending messages.
    pub fn destroy(&mut self, path: &ObjectPath) -> Result<(), BridgeError> {
        if self.contact_list(path).is_some() {
            return Err(ChannelError::NotImplemented(
                "contact list channels cannot be destroyed".into(),
            )
            .into());
        }
        self.chat_mut(path)?.destroy();
        self.reap();
        Ok(())
    }

    /// Send `message` on the chat at `path`.
    pub fn send(&mut self, path: &ObjectPath, message: Message) -> Result<(), BridgeError> {
        Ok(self.chat_mut(path)?.send(message)?)
    }

    /// Acknowledge pending messages on the chat at `path`.
    pub fn acknowledge(&mut self, path: &ObjectPath, ids: &[u32]) -> Result<(), BridgeError> {
        Ok(self.chat_mut(path)?.acknowledge(ids)?)
    }

    /// Advertise a raw chat state on the chat at `path`.
    pub fn set_chat_state(&mut self, path: &ObjectPath, state: u32) -> Result<(), BridgeError> {
        Ok(self.chat_mut(path)?.set_chat_state(state)?)
    }

    /// Add `handle` to the members of the channel at `path`.
    pub fn add_member(
        &mut self,
        path: &ObjectPath,
        handle: Handle,
        message: &str,
    ) -> Result<(), BridgeError> {
        if let Some(chat) = self.chats.get_mut(path) {
            return Ok(chat.add_member(handle, message)?);
        }
        self.mutate_contact_list(path, handle, |list| list.add_member(handle, message))
    }

    /// Remove `handle` from the channel at `path`. `reason` is a raw
    /// removal reason code, used by chats.
    pub fn remove_member(
        &mut self,
        path: &ObjectPath,
        handle: Handle,
        message: &str,
        reason: u32,
    ) -> Result<(), BridgeError> {
        let reason = RemoveReason::try_from_code(reason)
            .ok_or_else(|| ChannelError::InvalidArgument(format!("invalid removal reason {reason}")))?;

        if let Some(chat) = self.chats.get_mut(path) {
            return Ok(chat.remove_member(handle, message, reason)?);
        }
        self.mutate_contact_list(path, handle, |list| list.remove_member(handle, message))
    }

    /// Route a backend event to the channel it concerns.
    pub fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::ConversationCreated { conversation, peer } => {
                self.incoming_conversation(conversation, &peer);
            },
            BackendEvent::ImReceived { conversation, markup, flags, sent_at } => {
                self.route_message(conversation, &markup, flags, sent_at);
            },
            BackendEvent::BuddyAdded { name, .. } => self.buddy_added(&name),
            BackendEvent::BuddyRemoved { name, .. } => self.buddy_removed(&name),
            BackendEvent::TimerFired(timer) => self.route_timer(timer),
        }
        self.reap();
    }

    /// Dispose every channel. The manager holds no channels afterwards
    /// except the subscribe list, which lives as long as the connection.
    pub fn shutdown(&mut self) {
        tracing::info!(connection = %self.base, chats = self.chats.len(), "shutting down");
        for (_, mut chat) in std::mem::take(&mut self.chats) {
            chat.dispose();
        }
        self.by_conversation.clear();
        self.groups.clear();
    }

    fn next_chat_path(&mut self) -> ObjectPath {
        let path = ObjectPath::new(format!("{}/ImChannel{}", self.base, self.next_chat));
        self.next_chat += 1;
        path
    }

    fn insert_chat(&mut self, chat: ChatChannel<B>) -> ObjectPath {
        let path = chat.path().clone();
        if let Some(conversation) = chat.conversation() {
            self.by_conversation.insert(conversation, path.clone());
        }
        self.chats.insert(path.clone(), chat);
        path
    }

    fn chat_mut(&mut self, path: &ObjectPath) -> Result<&mut ChatChannel<B>, BridgeError> {
        self.chats.get_mut(path).ok_or_else(|| BridgeError::UnknownChannel(path.clone()))
    }

    fn contact_list_mut(
        &mut self,
        path: &ObjectPath,
    ) -> Result<&mut ContactListChannel<B>, BridgeError> {
        if self.subscribe.path() == path {
            return Ok(&mut self.subscribe);
        }
        self.groups
            .values_mut()
            .find(|group| group.path() == path)
            .ok_or_else(|| BridgeError::UnknownChannel(path.clone()))
    }

    fn ensure_group(&mut self, name: &str) -> Result<&mut ContactListChannel<B>, BridgeError> {
        match self.groups.entry(name.to_owned()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let handle = self.ctx.handles.groups().ensure(name);
                let path = ObjectPath::new(format!(
                    "{}/ContactListChannel/group/{}",
                    self.base,
                    escape_as_identifier(name)
                ));
                let channel = ContactListChannel::new(&self.ctx, path, HandleType::Group, handle)?;
                Ok(entry.insert(channel))
            },
        }
    }

    fn incoming_conversation(&mut self, conversation: ConversationId, peer: &str) {
        if self.by_conversation.contains_key(&conversation) {
            tracing::debug!(%conversation, "conversation already has a channel");
            return;
        }

        let target = self.contact(peer);
        let path = self.next_chat_path();
        match ChatChannel::adopt(&self.ctx, path, target, target, conversation) {
            Ok(chat) => {
                let path = self.insert_chat(chat);
                tracing::info!(channel = %path, %peer, "incoming chat");
            },
            Err(err) => tracing::warn!(%conversation, %peer, error = %err, "cannot open incoming chat"),
        }
    }

    fn route_message(
        &mut self,
        conversation: ConversationId,
        markup: &str,
        flags: MessageFlags,
        sent_at: i64,
    ) {
        let Some(chat) =
            self.by_conversation.get(&conversation).and_then(|path| self.chats.get_mut(path))
        else {
            tracing::warn!(%conversation, "message for a conversation without a channel");
            return;
        };
        chat.receive(markup, flags, sent_at);
    }

    fn route_timer(&mut self, timer: TimerId) {
        if !self.chats.values_mut().any(|chat| chat.handle_timer(timer)) {
            tracing::debug!(%timer, "timer fired with no owning channel");
        }
    }

    fn buddy_added(&mut self, name: &str) {
        let handle = self.contact(name);
        self.reconcile_contact(name, handle);
    }

    fn buddy_removed(&mut self, name: &str) {
        let Some(handle) = self.ctx.handles.contacts().lookup(name) else {
            tracing::debug!(%name, "removed buddy was never seen");
            return;
        };
        self.reconcile_contact(name, handle);
    }

    /// Run `op` on the contact list at `path` with `handle` reconciled
    /// against the backend on both sides.
    fn mutate_contact_list<F>(
        &mut self,
        path: &ObjectPath,
        handle: Handle,
        op: F,
    ) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut ContactListChannel<B>) -> Result<(), ChannelError>,
    {
        if self.contact_list(path).is_none() {
            return Err(BridgeError::UnknownChannel(path.clone()));
        }
        let name = self.ctx.handles.contacts().inspect(handle);

        if let Some(name) = &name {
            self.reconcile_contact(name, handle);
        }
        let outcome = op(self.contact_list_mut(path)?);
        if let Some(name) = &name {
            self.reconcile_contact(name, handle);
        }
        Ok(outcome?)
    }

    /// Make the subscribe list and every group channel agree with the
    /// backend's entries for `name`. Groups the contact is in get a channel
    /// if they have none.
    fn reconcile_contact(&mut self, name: &str, handle: Handle) {
        let (listed, in_groups) = {
            let backend = &self.ctx.backend;
            let buddies = backend.find_buddies(name);
            let in_groups: BTreeSet<String> = buddies
                .iter()
                .filter_map(|&buddy| backend.buddy_group(buddy))
                .filter_map(|group| backend.group_name(group))
                .collect();
            (!buddies.is_empty(), in_groups)
        };

        if listed {
            self.subscribe.sync_member_added(handle);
        } else {
            self.subscribe.sync_member_removed(handle);
        }

        for group in &in_groups {
            match self.ensure_group(group) {
                Ok(channel) => channel.sync_member_added(handle),
                Err(err) => tracing::warn!(%name, %group, error = %err, "cannot mirror buddy"),
            }
        }
        for (group, channel) in &mut self.groups {
            if !in_groups.contains(group) {
                channel.sync_member_removed(handle);
            }
        }
    }

    fn reap(&mut self) {
        let closed: Vec<ObjectPath> =
            self.chats.values().filter(|c| c.is_closed()).map(|c| c.path().clone()).collect();
        for path in closed {
            self.by_conversation.retain(|_, p| *p != path);
            if let Some(mut chat) = self.chats.remove(&path) {
                chat.dispose();
                tracing::debug!(channel = %path, "chat channel released");
            }
        }

        self.groups.retain(|name, group| {
            let keep = !group.is_closed();
            if !keep {
                tracing::debug!(%name, "group channel released");
            }
            keep
        });
    }
}

impl<B: Backend> Drop for ChannelManager<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
