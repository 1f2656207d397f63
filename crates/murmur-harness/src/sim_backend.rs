//! Simulated messaging backend.
//!
//! An in-memory buddy list, conversation table and event loop with a
//! virtual clock. Every mutation a channel performs is recorded so tests can
//! assert on exactly what reached the backend, and backend-originated events
//! (buddy list changes, local echoes, timer fires) are queued for the test
//! driver to feed back into the bridge.
//!
//! Send failures are injected from a seeded RNG, so a run is reproducible
//! from its seed.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, VecDeque},
    rc::Rc,
    time::Duration,
};

use murmur_core::{
    Backend, BackendError, BackendEvent, BuddyId, ConversationId, ConversationKind, EventLoop,
    GroupId, MessageFlags, TimerId, TypingState,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Name of the group buddies land in when added without one.
pub const DEFAULT_GROUP: &str = "Buddies";

/// Knobs for the simulated backend.
#[derive(Debug, Clone)]
pub struct SimBackendConfig {
    /// Whether the protocol supports typing notifications.
    pub typing_supported: bool,
    /// Seconds after which typing announcements must be repeated. 0 for
    /// protocols without such a timeout.
    pub typing_timeout_secs: u32,
    /// Create chat conversations (which support invitations) instead of IMs.
    pub chat_conversations: bool,
    /// Probability in [0.0, 1.0] that a send fails.
    pub send_failure_rate: f64,
    /// Seed for failure injection.
    pub seed: u64,
    /// Wall clock at simulation start, Unix seconds.
    pub start_time: i64,
}

impl Default for SimBackendConfig {
    fn default() -> Self {
        Self {
            typing_supported: true,
            typing_timeout_secs: 30,
            chat_conversations: false,
            send_failure_rate: 0.0,
            seed: 0x5EED,
            start_time: 1_700_000_000,
        }
    }
}

/// A conversation known to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConversation {
    /// Peer name.
    pub peer: String,
    /// IM or chat.
    pub kind: ConversationKind,
    /// Users invited into a chat.
    pub users: BTreeSet<String>,
}

/// A buddy-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBuddy {
    /// Buddy name.
    pub name: String,
    /// Group the entry is placed in.
    pub group: Option<GroupId>,
    /// Whether the entry is currently on the buddy list.
    pub on_blist: bool,
    /// Whether the account is subscribed to the entry on the server.
    pub subscribed: bool,
}

/// A message handed to the backend for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Conversation it was sent to.
    pub conversation: ConversationId,
    /// Backend markup.
    pub text: String,
    /// Send flags.
    pub flags: MessageFlags,
}

/// A chat membership call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCall {
    /// User invited.
    Added {
        /// Chat conversation.
        conversation: ConversationId,
        /// Invitee.
        name: String,
        /// Invitation message.
        message: String,
    },
    /// User removed.
    Removed {
        /// Chat conversation.
        conversation: ConversationId,
        /// Removed user.
        name: String,
        /// Reason text.
        reason: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct SimTimer {
    interval_ms: u64,
    next_fire_ms: u64,
}

#[derive(Debug)]
struct SimState {
    config: SimBackendConfig,
    rng: ChaCha8Rng,
    elapsed_ms: u64,
    next_id: u64,
    online: bool,
    typing_budget: Option<u32>,
    conversations: BTreeMap<ConversationId, SimConversation>,
    destroyed: Vec<ConversationId>,
    buddies: BTreeMap<BuddyId, SimBuddy>,
    groups: BTreeMap<GroupId, String>,
    timers: BTreeMap<TimerId, SimTimer>,
    sent: Vec<SentMessage>,
    typing: Vec<(String, TypingState)>,
    chat_calls: Vec<ChatCall>,
    account_removals: Vec<(String, Option<String>)>,
    events: VecDeque<BackendEvent>,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn now_secs(&self) -> i64 {
        self.config.start_time + i64::try_from(self.elapsed_ms / 1000).unwrap_or(i64::MAX)
    }

    fn group_named(&mut self, name: &str) -> GroupId {
        if let Some((&id, _)) = self.groups.iter().find(|(_, n)| n.as_str() == name) {
            return id;
        }
        let id = GroupId(self.next_id());
        self.groups.insert(id, name.to_owned());
        id
    }

    fn group_label(&self, group: Option<GroupId>) -> Option<String> {
        group.and_then(|g| self.groups.get(&g).cloned())
    }

    fn listed(&self, name: &str) -> impl Iterator<Item = (BuddyId, &SimBuddy)> + '_ {
        let name = name.to_owned();
        self.buddies.iter().filter(move |(_, b)| b.on_blist && b.name == name).map(|(&id, b)| (id, b))
    }
}

/// Simulated backend. Clones share state.
#[derive(Debug, Clone)]
pub struct SimBackend {
    state: Rc<RefCell<SimState>>,
}

impl Default for SimBackend {
    fn default() -> Self {
        Self::new(SimBackendConfig::default())
    }
}

impl SimBackend {
    /// Create a backend with `config`.
    ///
    /// # Panics
    ///
    /// Panics if `send_failure_rate` is outside [0.0, 1.0].
    pub fn new(config: SimBackendConfig) -> Self {
        assert!(
            (0.0..=1.0).contains(&config.send_failure_rate),
            "send_failure_rate must be between 0.0 and 1.0, got {}",
            config.send_failure_rate
        );

        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            state: Rc::new(RefCell::new(SimState {
                config,
                rng,
                elapsed_ms: 0,
                next_id: 0,
                online: true,
                typing_budget: None,
                conversations: BTreeMap::new(),
                destroyed: Vec::new(),
                buddies: BTreeMap::new(),
                groups: BTreeMap::new(),
                timers: BTreeMap::new(),
                sent: Vec::new(),
                typing: Vec::new(),
                chat_calls: Vec::new(),
                account_removals: Vec::new(),
                events: VecDeque::new(),
            })),
        }
    }

    /// Advance the virtual clock, queueing a [`BackendEvent::TimerFired`]
    /// for every timer expiry in order. Returns the number of fires.
    pub fn advance(&self, by: Duration) -> usize {
        let mut state = self.state.borrow_mut();
        let target = state.elapsed_ms + u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let mut fired = 0;

        loop {
            let due = state
                .timers
                .iter()
                .filter(|(_, t)| t.next_fire_ms <= target)
                .min_by_key(|(id, t)| (t.next_fire_ms, **id))
                .map(|(&id, &t)| (id, t));
            let Some((id, timer)) = due else { break };

            state.elapsed_ms = timer.next_fire_ms;
            if let Some(t) = state.timers.get_mut(&id) {
                t.next_fire_ms += t.interval_ms;
            }
            state.events.push_back(BackendEvent::TimerFired(id));
            fired += 1;
        }

        state.elapsed_ms = target;
        fired
    }

    /// Take every queued backend event, oldest first.
    pub fn take_events(&self) -> Vec<BackendEvent> {
        self.state.borrow_mut().events.drain(..).collect()
    }

    /// A peer opens a conversation with us.
    pub fn incoming_conversation(&self, peer: &str) -> ConversationId {
        let conversation = self.conversation_new(peer);
        self.state
            .borrow_mut()
            .events
            .push_back(BackendEvent::ConversationCreated { conversation, peer: peer.to_owned() });
        conversation
    }

    /// A message is written to `conversation`, sent now.
    pub fn deliver(&self, conversation: ConversationId, markup: &str, flags: MessageFlags) {
        let sent_at = self.now_secs();
        self.deliver_at(conversation, markup, flags, sent_at);
    }

    /// A message is written to `conversation`, sent at `sent_at`.
    pub fn deliver_at(
        &self,
        conversation: ConversationId,
        markup: &str,
        flags: MessageFlags,
        sent_at: i64,
    ) {
        self.state.borrow_mut().events.push_back(BackendEvent::ImReceived {
            conversation,
            markup: markup.to_owned(),
            flags,
            sent_at,
        });
    }

    /// Take the account on- or offline. Offline sends fail and typing
    /// announcements are refused.
    pub fn set_online(&self, online: bool) {
        self.state.borrow_mut().online = online;
    }

    /// Accept only `budget` more typing announcements, then refuse.
    /// `None` removes the limit.
    pub fn set_typing_budget(&self, budget: Option<u32>) {
        self.state.borrow_mut().typing_budget = budget;
    }

    /// Live timers.
    pub fn live_timers(&self) -> BTreeSet<TimerId> {
        self.state.borrow().timers.keys().copied().collect()
    }

    /// Messages handed to the backend, oldest first.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state.borrow().sent.clone()
    }

    /// Typing announcements accepted, oldest first.
    pub fn typing_announcements(&self) -> Vec<(String, TypingState)> {
        self.state.borrow().typing.clone()
    }

    /// Chat membership calls, oldest first.
    pub fn chat_calls(&self) -> Vec<ChatCall> {
        self.state.borrow().chat_calls.clone()
    }

    /// Server-side unsubscriptions as `(name, group name)`, oldest first.
    pub fn account_removals(&self) -> Vec<(String, Option<String>)> {
        self.state.borrow().account_removals.clone()
    }

    /// A live conversation.
    pub fn conversation(&self, conversation: ConversationId) -> Option<SimConversation> {
        self.state.borrow().conversations.get(&conversation).cloned()
    }

    /// Conversations destroyed, in order. Duplicates reveal double teardown.
    pub fn destroyed_conversations(&self) -> Vec<ConversationId> {
        self.state.borrow().destroyed.clone()
    }

    /// Buddy-list entries for `name` as `(id, group name)`.
    pub fn buddies_named(&self, name: &str) -> Vec<(BuddyId, Option<String>)> {
        let state = self.state.borrow();
        state.listed(name).map(|(id, b)| (id, state.group_label(b.group))).collect()
    }

    /// Names of every entry on the buddy list, with duplicates.
    pub fn buddy_names(&self) -> Vec<String> {
        self.state.borrow().buddies.values().filter(|b| b.on_blist).map(|b| b.name.clone()).collect()
    }
}

impl EventLoop for SimBackend {
    fn timeout_add(&self, interval: Duration) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = TimerId(state.next_id());
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1);
        let next_fire_ms = state.elapsed_ms + interval_ms;
        state.timers.insert(id, SimTimer { interval_ms, next_fire_ms });
        id
    }

    fn timeout_remove(&self, timer: TimerId) -> bool {
        self.state.borrow_mut().timers.remove(&timer).is_some()
    }

    fn now_secs(&self) -> i64 {
        self.state.borrow().now_secs()
    }
}

impl Backend for SimBackend {
    fn conversation_new(&self, peer: &str) -> ConversationId {
        let mut state = self.state.borrow_mut();
        let id = ConversationId(state.next_id());
        let kind =
            if state.config.chat_conversations { ConversationKind::Chat } else { ConversationKind::Im };
        state
            .conversations
            .insert(id, SimConversation { peer: peer.to_owned(), kind, users: BTreeSet::new() });
        id
    }

    fn conversation_destroy(&self, conv: ConversationId) {
        let mut state = self.state.borrow_mut();
        if state.conversations.remove(&conv).is_none() {
            tracing::warn!(conversation = %conv, "destroying unknown conversation");
        }
        state.destroyed.push(conv);
    }

    fn conversation_kind(&self, conv: ConversationId) -> Option<ConversationKind> {
        self.state.borrow().conversations.get(&conv).map(|c| c.kind)
    }

    fn im_send(
        &self,
        conv: ConversationId,
        text: &str,
        flags: MessageFlags,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        if !state.conversations.contains_key(&conv) {
            return Err(BackendError::NoSuchConversation(conv.0));
        }
        if !state.online {
            return Err(BackendError::Offline);
        }
        let rate = state.config.send_failure_rate;
        if rate > 0.0 && state.rng.gen_bool(rate) {
            return Err(BackendError::SendFailed("simulated failure".into()));
        }

        state.sent.push(SentMessage { conversation: conv, text: text.to_owned(), flags });
        let sent_at = state.now_secs();
        state.events.push_back(BackendEvent::ImReceived {
            conversation: conv,
            markup: text.to_owned(),
            flags: flags | MessageFlags::SEND,
            sent_at,
        });
        Ok(())
    }

    fn chat_add_user(
        &self,
        conv: ConversationId,
        name: &str,
        message: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        let chat =
            state.conversations.get_mut(&conv).ok_or(BackendError::NoSuchConversation(conv.0))?;
        chat.users.insert(name.to_owned());
        state.chat_calls.push(ChatCall::Added {
            conversation: conv,
            name: name.to_owned(),
            message: message.to_owned(),
        });
        Ok(())
    }

    fn chat_remove_user(
        &self,
        conv: ConversationId,
        name: &str,
        reason: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.state.borrow_mut();
        let chat =
            state.conversations.get_mut(&conv).ok_or(BackendError::NoSuchConversation(conv.0))?;
        chat.users.remove(name);
        state.chat_calls.push(ChatCall::Removed {
            conversation: conv,
            name: name.to_owned(),
            reason: reason.to_owned(),
        });
        Ok(())
    }

    fn supports_typing(&self) -> bool {
        self.state.borrow().config.typing_supported
    }

    fn send_typing(&self, peer: &str, state: TypingState) -> u32 {
        let mut sim = self.state.borrow_mut();
        if !sim.config.typing_supported || !sim.online {
            return 0;
        }
        match sim.typing_budget {
            Some(0) => return 0,
            Some(n) => sim.typing_budget = Some(n - 1),
            None => {},
        }
        sim.typing.push((peer.to_owned(), state));
        sim.config.typing_timeout_secs
    }

    fn buddy_new(&self, name: &str) -> BuddyId {
        let mut state = self.state.borrow_mut();
        let id = BuddyId(state.next_id());
        state.buddies.insert(
            id,
            SimBuddy { name: name.to_owned(), group: None, on_blist: false, subscribed: false },
        );
        id
    }

    fn blist_add_buddy(&self, buddy: BuddyId, group: Option<GroupId>) {
        let mut state = self.state.borrow_mut();
        let group = match group {
            Some(group) => group,
            None => state.group_named(DEFAULT_GROUP),
        };
        let group_name = state.group_label(Some(group));
        let Some(entry) = state.buddies.get_mut(&buddy) else {
            tracing::warn!(%buddy, "adding unknown buddy");
            return;
        };
        entry.group = Some(group);
        entry.on_blist = true;
        let name = entry.name.clone();
        state.events.push_back(BackendEvent::BuddyAdded { name, group: group_name });
    }

    fn blist_remove_buddy(&self, buddy: BuddyId) {
        let mut state = self.state.borrow_mut();
        let Some(entry) = state.buddies.get_mut(&buddy) else {
            tracing::warn!(%buddy, "removing unknown buddy");
            return;
        };
        if !entry.on_blist {
            return;
        }
        entry.on_blist = false;
        let (name, group) = (entry.name.clone(), entry.group);
        let group = state.group_label(group);
        state.events.push_back(BackendEvent::BuddyRemoved { name, group });
    }

    fn account_add_buddy(&self, buddy: BuddyId) {
        if let Some(entry) = self.state.borrow_mut().buddies.get_mut(&buddy) {
            entry.subscribed = true;
        }
    }

    fn account_remove_buddy(&self, buddy: BuddyId, group: Option<GroupId>) {
        let mut state = self.state.borrow_mut();
        let group = state.group_label(group);
        let Some(entry) = state.buddies.get_mut(&buddy) else { return };
        entry.subscribed = false;
        let name = entry.name.clone();
        state.account_removals.push((name, group));
    }

    fn buddy_group(&self, buddy: BuddyId) -> Option<GroupId> {
        self.state.borrow().buddies.get(&buddy).and_then(|b| b.group)
    }

    fn find_buddy(&self, name: &str) -> Option<BuddyId> {
        self.state.borrow().listed(name).map(|(id, _)| id).next()
    }

    fn find_buddies(&self, name: &str) -> Vec<BuddyId> {
        self.state.borrow().listed(name).map(|(id, _)| id).collect()
    }

    fn find_buddy_in_group(&self, name: &str, group: GroupId) -> Option<BuddyId> {
        self.state.borrow().listed(name).find(|(_, b)| b.group == Some(group)).map(|(id, _)| id)
    }

    fn group_new(&self, name: &str) -> GroupId {
        self.state.borrow_mut().group_named(name)
    }

    fn group_name(&self, group: GroupId) -> Option<String> {
        self.state.borrow().groups.get(&group).cloned()
    }
}
