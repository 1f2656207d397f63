//! Property-based tests for the channel manager.
//!
//! Random interleavings of protocol requests and backend-side roster and
//! conversation activity. Some steps leave backend events queued for a
//! later step. After every step the standard invariants must hold; once
//! backend events are pumped the subscribe list must also agree with the
//! backend buddy list.

#![allow(clippy::unwrap_used)]

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use murmur_bridge::{BridgeConfig, ChannelManager};
use murmur_core::{Backend, Message, MessageFlags, MessageType, ObjectPath};
use murmur_harness::{
    ChannelSnapshot, InvariantRegistry, SimBackend, SimBackendConfig, SystemSnapshot,
    run_until_idle,
};
use proptest::prelude::*;

const PEERS: [&str; 3] = ["alice@example.com", "bob@example.com", "carol@example.com"];
const GROUPS: [&str; 2] = ["Friends", "Work"];

#[derive(Debug, Clone)]
enum Op {
    RequestChat(usize),
    Incoming(usize),
    Deliver(usize),
    CloseChat(usize),
    DestroyChat(usize),
    AcknowledgeAll(usize),
    ChatState(usize, u32),
    Send(usize),
    AddToGroup(usize, usize),
    RemoveFromGroup(usize, usize),
    CloseGroup(usize),
    AddToSubscribe(usize),
    RemoveFromSubscribe(usize),
    RosterAdd(usize, usize),
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let peer = 0..PEERS.len();
    let group = 0..GROUPS.len();
    let chat = 0usize..4;
    prop_oneof![
        2 => peer.clone().prop_map(Op::RequestChat),
        1 => peer.clone().prop_map(Op::Incoming),
        3 => chat.clone().prop_map(Op::Deliver),
        1 => chat.clone().prop_map(Op::CloseChat),
        1 => chat.clone().prop_map(Op::DestroyChat),
        1 => chat.clone().prop_map(Op::AcknowledgeAll),
        2 => (chat.clone(), 0u32..6).prop_map(|(c, s)| Op::ChatState(c, s)),
        1 => chat.prop_map(Op::Send),
        2 => (group.clone(), peer.clone()).prop_map(|(g, p)| Op::AddToGroup(g, p)),
        2 => (group.clone(), peer.clone()).prop_map(|(g, p)| Op::RemoveFromGroup(g, p)),
        1 => group.clone().prop_map(Op::CloseGroup),
        1 => peer.clone().prop_map(Op::AddToSubscribe),
        1 => peer.clone().prop_map(Op::RemoveFromSubscribe),
        1 => (peer, group).prop_map(|(p, g)| Op::RosterAdd(p, g)),
        2 => (1u64..90).prop_map(Op::Advance),
    ]
}

struct World {
    backend: SimBackend,
    manager: ChannelManager<SimBackend>,
    history: BTreeMap<ObjectPath, Vec<bool>>,
}

impl World {
    fn new() -> Self {
        let backend = SimBackend::new(SimBackendConfig {
            chat_conversations: true,
            send_failure_rate: 0.1,
            ..SimBackendConfig::default()
        });
        let manager = ChannelManager::new(backend.clone(), BridgeConfig::default()).unwrap();
        Self { backend, manager, history: BTreeMap::new() }
    }

    fn nth_chat(&self, i: usize) -> Option<ObjectPath> {
        let count = self.manager.chats().count();
        if count == 0 {
            return None;
        }
        self.manager.chats().nth(i % count).map(|c| c.path().clone())
    }

    fn apply(&mut self, op: &Op, pump: bool) {
        // Request outcomes are not asserted; invariants are checked after each step
        match *op {
            Op::RequestChat(p) => {
                let _ = self.manager.request_chat(PEERS[p]);
            },
            Op::Incoming(p) => {
                self.backend.incoming_conversation(PEERS[p]);
            },
            Op::Deliver(i) => {
                let conversation =
                    self.nth_chat(i).and_then(|path| self.manager.chat(&path)?.conversation());
                if let Some(conversation) = conversation {
                    self.backend.deliver(conversation, "hello", MessageFlags::RECV);
                }
            },
            Op::CloseChat(i) => {
                if let Some(path) = self.nth_chat(i) {
                    let _ = self.manager.close(&path);
                }
            },
            Op::DestroyChat(i) => {
                if let Some(path) = self.nth_chat(i) {
                    let _ = self.manager.destroy(&path);
                }
            },
            Op::AcknowledgeAll(i) => {
                if let Some(path) = self.nth_chat(i) {
                    let ids: Vec<u32> = self
                        .manager
                        .chat(&path)
                        .map(|c| c.pending_messages().iter().filter_map(Message::pending_id).collect())
                        .unwrap_or_default();
                    let _ = self.manager.acknowledge(&path, &ids);
                }
            },
            Op::ChatState(i, code) => {
                if let Some(path) = self.nth_chat(i) {
                    let _ = self.manager.set_chat_state(&path, code);
                }
            },
            Op::Send(i) => {
                if let Some(path) = self.nth_chat(i) {
                    let _ = self.manager.send(&path, Message::text(MessageType::Normal, "hi"));
                }
            },
            Op::AddToGroup(g, p) => {
                let path = self.manager.request_group(GROUPS[g]).unwrap();
                let handle = self.manager.contact(PEERS[p]);
                let _ = self.manager.add_member(&path, handle, "");
            },
            Op::RemoveFromGroup(g, p) => {
                let path = self.manager.request_group(GROUPS[g]).unwrap();
                let handle = self.manager.contact(PEERS[p]);
                let _ = self.manager.remove_member(&path, handle, "", 5);
            },
            Op::CloseGroup(g) => {
                let path = self.manager.request_group(GROUPS[g]).unwrap();
                let _ = self.manager.close(&path);
            },
            Op::AddToSubscribe(p) => {
                let path = self.manager.subscribe_path().clone();
                let handle = self.manager.contact(PEERS[p]);
                let _ = self.manager.add_member(&path, handle, "");
            },
            Op::RemoveFromSubscribe(p) => {
                let path = self.manager.subscribe_path().clone();
                let handle = self.manager.contact(PEERS[p]);
                let _ = self.manager.remove_member(&path, handle, "", 5);
            },
            Op::RosterAdd(p, g) => {
                let buddy = self.backend.buddy_new(PEERS[p]);
                let group = self.backend.group_new(GROUPS[g]);
                self.backend.blist_add_buddy(buddy, Some(group));
            },
            Op::Advance(secs) => {
                self.backend.advance(Duration::from_secs(secs));
            },
        }

        if pump {
            run_until_idle(&self.backend, &mut self.manager);
        }
        self.manager.drain_events();
    }

    fn snapshot(&mut self) -> SystemSnapshot {
        let mut snapshot = SystemSnapshot::empty()
            .with_handles(&self.manager.context().handles)
            .with_live_timers(self.backend.live_timers());
        for chat in self.manager.chats() {
            snapshot.add_channel(ChannelSnapshot::from_chat(chat));
        }
        for list in self.manager.contact_lists() {
            snapshot.add_channel(ChannelSnapshot::from_contact_list(list));
        }
        snapshot.record_history(&mut self.history);
        snapshot
    }

    fn subscribed_names(&self) -> BTreeSet<String> {
        let contacts = self.manager.context().handles.contacts();
        let subscribe = self.manager.contact_list(self.manager.subscribe_path()).unwrap();
        subscribe.membership().members().iter().filter_map(|h| contacts.inspect(*h)).collect()
    }
}

fn step_strategy() -> impl Strategy<Value = (Op, bool)> {
    (op_strategy(), prop::bool::weighted(0.7))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariants hold after every step, and the subscribe list mirrors the
    /// buddy list whenever backend events have been pumped.
    #[test]
    fn prop_manager_invariants_hold(steps in prop::collection::vec(step_strategy(), 0..60)) {
        let mut world = World::new();
        let invariants = InvariantRegistry::standard();

        for (op, pump) in &steps {
            world.apply(op, *pump);

            let snapshot = world.snapshot();
            prop_assert!(
                invariants.check_all(&snapshot).is_ok(),
                "Invariant violated after {:?}: {:?}", op, invariants.check_all(&snapshot)
            );

            if *pump {
                let on_blist: BTreeSet<String> = world.backend.buddy_names().into_iter().collect();
                prop_assert_eq!(world.subscribed_names(), on_blist, "roster diverged after {:?}", op);
            }
        }
    }

    /// Shutdown leaves only the connection's own references and no timers.
    #[test]
    fn prop_shutdown_releases_chats(steps in prop::collection::vec(step_strategy(), 0..40)) {
        let mut world = World::new();
        for (op, pump) in &steps {
            world.apply(op, *pump);
        }

        world.manager.shutdown();

        prop_assert_eq!(world.manager.chats().count(), 0);
        prop_assert!(world.backend.live_timers().is_empty());

        let contacts = world.manager.context().handles.contacts();
        let subscribed = world.subscribed_names().len() as u64;
        prop_assert_eq!(contacts.total_refs(), 1 + subscribed);

        let destroyed = world.backend.destroyed_conversations();
        let unique: BTreeSet<_> = destroyed.iter().collect();
        prop_assert_eq!(unique.len(), destroyed.len());
    }
}
