//! One-to-one text channel.
//!
//! # Lifecycle
//!
//! ```text
//!   Open ──close (pending messages)──▶ Rescued ──close (none pending)──▶ Closed
//!    │  ◀────────── message received ────┘                               ▲
//!    └──────────────────── close (none pending) ─────────────────────────┘
//! ```
//!
//! A channel that still holds unacknowledged inbound messages is never torn
//! down by `close`: it is rescued instead, keeping the backend conversation
//! alive and handing the initiator role to the peer. `destroy` drops the
//! pending messages first, so it always tears down. The backend
//! conversation is destroyed exactly once, by whichever of close, destroy
//! or dispose gets there first.

use std::rc::Rc;

use murmur_core::{
    Backend, ChangeReason, ChannelError, ChannelEvent, ConversationId, ConversationKind,
    EventQueue, GroupFlags, Handle, HandleType, Handles, Membership, Message, MessageFlags,
    ObjectPath, Placement, RemoveReason, TimerId, TypingState, message::KEY_PENDING_MESSAGE_ID,
};

use crate::{
    ChannelContext,
    properties::{
        CHANNEL_TYPE_TEXT, ChannelProperties, MessagesProperties, chat_interfaces,
        messages_properties,
    },
    translator::{self, Inbound},
    typing::{ChatState, TypingScheduler},
};

/// Where a chat channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting operations.
    Open,
    /// Close was requested while messages were pending; still alive.
    Rescued,
    /// Torn down. Terminal.
    Closed,
}

/// A one-to-one conversation exposed as a channel.
#[derive(Debug)]
pub struct ChatChannel<B: Backend> {
    backend: B,
    handles: Rc<Handles>,
    events: EventQueue,
    path: ObjectPath,
    target: Handle,
    peer: String,
    initiator: Handle,
    conversation: Option<ConversationId>,
    lifecycle: Lifecycle,
    disposed: bool,
    membership: Membership,
    typing: TypingScheduler,
    pending: Vec<Message>,
    next_pending_id: u32,
}

impl<B: Backend> ChatChannel<B> {
    /// Open a channel to `target`, creating a backend conversation.
    ///
    /// # Panics
    ///
    /// Panics if `initiator` is not a registered contact.
    pub fn open(
        ctx: &ChannelContext<B>,
        path: ObjectPath,
        target: Handle,
        initiator: Handle,
    ) -> Result<Self, ChannelError> {
        Self::build(ctx, path, target, initiator, None)
    }

    /// Wrap a conversation the backend already created.
    ///
    /// # Panics
    ///
    /// Panics if `initiator` is not a registered contact.
    pub fn adopt(
        ctx: &ChannelContext<B>,
        path: ObjectPath,
        target: Handle,
        initiator: Handle,
        conversation: ConversationId,
    ) -> Result<Self, ChannelError> {
        Self::build(ctx, path, target, initiator, Some(conversation))
    }

    fn build(
        ctx: &ChannelContext<B>,
        path: ObjectPath,
        target: Handle,
        initiator: Handle,
        conversation: Option<ConversationId>,
    ) -> Result<Self, ChannelError> {
        let contacts = ctx.handles.contacts();
        assert!(
            contacts.is_valid(initiator),
            "invariant: initiator {initiator} is not a registered contact"
        );

        let peer = contacts.resolve(target)?;
        contacts.ref_handle(target)?;
        contacts.ref_handle(initiator)?;

        let conversation =
            conversation.unwrap_or_else(|| ctx.backend.conversation_new(&peer));
        let flags = GroupFlags { can_add: true, can_remove: true, can_rescind: false };
        let membership =
            Membership::new(Rc::clone(&ctx.handles), path.clone(), ctx.events.clone(), flags);

        tracing::debug!(channel = %path, %peer, %initiator, %conversation, "chat channel opened");

        Ok(Self {
            backend: ctx.backend.clone(),
            handles: Rc::clone(&ctx.handles),
            events: ctx.events.clone(),
            path,
            target,
            typing: TypingScheduler::new(peer.clone()),
            peer,
            initiator,
            conversation: Some(conversation),
            lifecycle: Lifecycle::Open,
            disposed: false,
            membership,
            pending: Vec::new(),
            next_pending_id: 0,
        })
    }

    /// Object path.
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    /// Contact this channel talks to.
    pub fn target(&self) -> Handle {
        self.target
    }

    /// Name of the contact this channel talks to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Handle that caused the channel to exist.
    pub fn initiator(&self) -> Handle {
        self.initiator
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Check if the channel has been torn down.
    pub fn is_closed(&self) -> bool {
        self.lifecycle == Lifecycle::Closed
    }

    /// Backend conversation. `None` once destroyed.
    pub fn conversation(&self) -> Option<ConversationId> {
        self.conversation
    }

    /// Membership sets.
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Inbound messages not yet acknowledged, oldest first.
    pub fn pending_messages(&self) -> &[Message] {
        &self.pending
    }

    /// Locally advertised typing state.
    pub fn typing_state(&self) -> TypingState {
        self.typing.state()
    }

    /// Live typing resend timer, if any.
    pub fn typing_timer(&self) -> Option<TimerId> {
        self.typing.timer()
    }

    /// Request closing the channel.
    ///
    /// No-op on a closed channel, and on a rescued channel whose messages
    /// are still pending. Otherwise the closed notification fires, whether
    /// the channel is torn down or rescued.
    pub fn close(&mut self) {
        match self.lifecycle {
            Lifecycle::Closed => {
                tracing::debug!(channel = %self.path, "already closed");
                return;
            },
            Lifecycle::Rescued if !self.pending.is_empty() => {
                tracing::debug!(channel = %self.path, "already rescued");
                return;
            },
            Lifecycle::Open | Lifecycle::Rescued => {},
        }

        if self.pending.is_empty() {
            self.teardown();
        } else {
            self.rescue();
        }
        self.events.push(&self.path, ChannelEvent::Closed);
    }

    /// Drop all pending messages, then close. Always tears down.
    pub fn destroy(&mut self) {
        let ids: Vec<u32> = self.pending.drain(..).filter_map(|m| m.pending_id()).collect();
        if !ids.is_empty() {
            tracing::debug!(channel = %self.path, count = ids.len(), "discarding pending messages");
            self.events.push(&self.path, ChannelEvent::PendingMessagesRemoved(ids));
        }
        self.close();
    }

    /// Final release. Tears down if still alive and releases every handle.
    ///
    /// Runs at most once; also invoked on drop.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if !self.is_closed() {
            self.teardown();
            self.events.push(&self.path, ChannelEvent::Closed);
        }

        self.membership.release_all();
        let contacts = self.handles.contacts();
        contacts.unref_handle(self.target);
        contacts.unref_handle(self.initiator);
    }

    fn rescue(&mut self) {
        tracing::debug!(
            channel = %self.path,
            pending = self.pending.len(),
            "pending messages, rescuing instead of closing"
        );

        if self.initiator != self.target {
            let contacts = self.handles.contacts();
            // Target is referenced for the channel's lifetime, so this cannot fail
            let _ = contacts.ref_handle(self.target);
            contacts.unref_handle(self.initiator);
            self.initiator = self.target;
        }
        self.lifecycle = Lifecycle::Rescued;
    }

    fn teardown(&mut self) {
        self.typing.cancel(&self.backend);
        if let Some(conversation) = self.conversation.take() {
            tracing::debug!(channel = %self.path, %conversation, "destroying conversation");
            self.backend.conversation_destroy(conversation);
        }
        self.lifecycle = Lifecycle::Closed;
    }

    fn live_conversation(&self) -> Result<ConversationId, ChannelError> {
        match (self.lifecycle, self.conversation) {
            (Lifecycle::Closed, _) | (_, None) => Err(ChannelError::Closed),
            (_, Some(conversation)) => Ok(conversation),
        }
    }

    /// Send a typed message.
    ///
    /// Exactly one [`ChannelEvent::SendCompleted`] is emitted per call,
    /// carrying the same outcome as the return value.
    pub fn send(&mut self, message: Message) -> Result<(), ChannelError> {
        let outcome = self.try_send(&message);
        if let Err(err) = &outcome {
            tracing::debug!(channel = %self.path, error = %err, "send failed");
        }

        let disposition = outcome.clone().map(|()| String::new());
        self.events.push(&self.path, ChannelEvent::SendCompleted { message, outcome: disposition });
        outcome
    }

    fn try_send(&self, message: &Message) -> Result<(), ChannelError> {
        let conversation = self.live_conversation()?;
        let outbound = translator::encode_outbound(message)?;
        self.backend.im_send(conversation, &outbound.text, outbound.flags)?;
        Ok(())
    }

    /// Deliver a backend message to the channel.
    ///
    /// Returns the pending message id if a message was queued. Messages for
    /// a closed channel are dropped.
    pub fn receive(&mut self, markup: &str, flags: MessageFlags, sent_at: i64) -> Option<u32> {
        if self.is_closed() {
            tracing::warn!(channel = %self.path, "dropping message for closed channel");
            return None;
        }

        let received_at = self.backend.now_secs();
        let backend = &self.backend;
        let mut message = translator::decode_inbound(
            &Inbound { markup, flags, sent_at },
            self.target,
            received_at,
            |text| backend.detect_action(text),
        )?;

        let id = self.next_pending_id;
        self.next_pending_id = self.next_pending_id.wrapping_add(1);
        message.set_u32(0, KEY_PENDING_MESSAGE_ID, id);

        if self.lifecycle == Lifecycle::Rescued {
            self.lifecycle = Lifecycle::Open;
        }
        self.pending.push(message.clone());
        self.events.push(&self.path, ChannelEvent::MessageReceived(message));
        Some(id)
    }

    /// Acknowledge pending messages by id.
    ///
    /// Either every id is known and all are removed, or nothing changes.
    pub fn acknowledge(&mut self, ids: &[u32]) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        if let Some(unknown) =
            ids.iter().find(|id| !self.pending.iter().any(|m| m.pending_id() == Some(**id)))
        {
            return Err(ChannelError::InvalidArgument(format!("invalid message id {unknown}")));
        }
        if ids.is_empty() {
            return Ok(());
        }

        self.pending.retain(|m| !m.pending_id().is_some_and(|id| ids.contains(&id)));
        self.events.push(&self.path, ChannelEvent::PendingMessagesRemoved(ids.to_vec()));
        Ok(())
    }

    /// Invite `handle` into the conversation.
    ///
    /// Only chat conversations model invitations. The invitee becomes
    /// remote-pending, with the local user as actor.
    pub fn add_member(&mut self, handle: Handle, message: &str) -> Result<(), ChannelError> {
        let conversation = self.chat_conversation()?;
        let backend = &self.backend;
        let actor = self.handles.self_handle();

        self.membership.add_member(handle, message, |name| {
            backend.chat_add_user(conversation, name, message)?;
            Ok(Placement::RemotePending { actor, reason: ChangeReason::Invited })
        })
    }

    /// Remove `handle` from the conversation.
    pub fn remove_member(
        &mut self,
        handle: Handle,
        message: &str,
        reason: RemoveReason,
    ) -> Result<(), ChannelError> {
        let conversation = self.chat_conversation()?;
        let backend = &self.backend;

        self.membership.remove_member(handle, message, |name| {
            backend.chat_remove_user(conversation, name, reason.backend_text())?;
            Ok(())
        })
    }

    fn chat_conversation(&self) -> Result<ConversationId, ChannelError> {
        let conversation = self.live_conversation()?;
        match self.backend.conversation_kind(conversation) {
            Some(ConversationKind::Chat) => Ok(conversation),
            _ => Err(ChannelError::NotImplemented(
                "this conversation does not support membership changes".into(),
            )),
        }
    }

    /// Advertise a raw chat state to the peer.
    ///
    /// Fails with [`ChannelError::NotImplemented`] if the protocol has no
    /// typing notifications. Gone and unknown states are rejected even on
    /// a closed channel.
    pub fn set_chat_state(&mut self, code: u32) -> Result<(), ChannelError> {
        if !self.backend.supports_typing() {
            return Err(ChannelError::NotImplemented(
                "typing notifications are not supported by this protocol".into(),
            ));
        }
        if self.is_closed() {
            ChatState::validate(code)?;
            return Err(ChannelError::Closed);
        }
        self.typing.set_state(&self.backend, code)
    }

    /// Route a fired timer. Returns false if it does not belong here.
    pub fn handle_timer(&mut self, timer: TimerId) -> bool {
        self.typing.on_timer(&self.backend, timer)
    }

    /// Identity properties.
    pub fn properties(&self) -> ChannelProperties {
        let contacts = self.handles.contacts();
        ChannelProperties {
            object_path: self.path.clone(),
            channel_type: CHANNEL_TYPE_TEXT,
            target_handle: self.target,
            target_handle_type: HandleType::Contact,
            target_id: self.peer.clone(),
            initiator_handle: self.initiator,
            initiator_id: contacts.inspect(self.initiator).unwrap_or_default(),
            requested: self.initiator == self.handles.self_handle(),
            interfaces: chat_interfaces(self.backend.supports_typing()),
            destroyed: self.is_closed(),
        }
    }

    /// Message interface properties.
    pub fn messages_properties(&self) -> MessagesProperties {
        messages_properties()
    }
}

impl<B: Backend> Drop for ChatChannel<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}
