//! Channel manager routing against the simulated backend.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use murmur_bridge::{BridgeConfig, BridgeError, ChannelManager};
use murmur_channels::{ChatState, Lifecycle};
use murmur_core::{
    Backend, ChannelError, ChannelEvent, Message, MessageFlags, MessageType, ObjectPath,
    RemoveReason, TypingState,
};
use murmur_harness::{SimBackend, SimBackendConfig, run_scripted_session, run_until_idle};

fn manager_with(config: SimBackendConfig) -> (SimBackend, ChannelManager<SimBackend>) {
    let backend = SimBackend::new(config);
    let manager = ChannelManager::new(backend.clone(), BridgeConfig::new("jabber", "me@example.com"))
        .unwrap();
    (backend, manager)
}

fn manager() -> (SimBackend, ChannelManager<SimBackend>) {
    manager_with(SimBackendConfig::default())
}

fn received_on(events: &[(ObjectPath, ChannelEvent)], path: &ObjectPath) -> usize {
    events
        .iter()
        .filter(|(p, e)| p == path && matches!(e, ChannelEvent::MessageReceived(_)))
        .count()
}

/// Place an entry for `name` in `group` behind the manager's back.
fn roster_entry(backend: &SimBackend, name: &str, group: &str) {
    let buddy = backend.buddy_new(name);
    let group = backend.group_new(group);
    backend.blist_add_buddy(buddy, Some(group));
}

fn members_of(manager: &ChannelManager<SimBackend>, path: &ObjectPath) -> Vec<String> {
    let contacts = manager.context().handles.contacts();
    manager
        .contact_list(path)
        .unwrap()
        .membership()
        .members()
        .iter()
        .filter_map(|h| contacts.inspect(*h))
        .collect()
}

#[test]
fn object_paths_nest_under_the_connection() {
    let (_backend, mut manager) = manager();

    let chat = manager.request_chat("alice@example.com").unwrap();
    let group = manager.request_group("Work Friends").unwrap();

    let base = "/im/murmur/Connection/jabber/me_40example_2ecom";
    assert_eq!(chat.as_str(), format!("{base}/ImChannel0"));
    assert_eq!(group.as_str(), format!("{base}/ContactListChannel/group/Work_20Friends"));
    assert_eq!(manager.subscribe_path().as_str(), format!("{base}/ContactListChannel/subscribe"));
}

#[test]
fn requested_chat_is_reused_while_open() {
    let (_backend, mut manager) = manager();

    let first = manager.request_chat("alice@example.com").unwrap();
    let again = manager.request_chat("alice@example.com").unwrap();
    assert_eq!(first, again);
    assert!(manager.chat(&first).unwrap().properties().requested);

    manager.close(&first).unwrap();
    assert!(manager.chat(&first).is_none());

    let fresh = manager.request_chat("alice@example.com").unwrap();
    assert_ne!(first, fresh);
}

#[test]
fn incoming_conversation_opens_peer_initiated_chat() {
    let (backend, mut manager) = manager();

    let conversation = backend.incoming_conversation("bob@example.com");
    run_until_idle(&backend, &mut manager);

    let chat = manager.chats().find(|c| c.conversation() == Some(conversation)).unwrap();
    let props = chat.properties();
    assert!(!props.requested);
    assert_eq!(props.initiator_id, "bob@example.com");
    assert_eq!(props.target_id, "bob@example.com");
}

#[test]
fn messages_route_to_the_owning_chat() {
    let (backend, mut manager) = manager();
    let conversation = backend.incoming_conversation("bob@example.com");
    run_until_idle(&backend, &mut manager);
    let path = manager.chats().next().unwrap().path().clone();
    manager.drain_events();

    backend.deliver(conversation, "hi <b>there</b>", MessageFlags::RECV);
    run_until_idle(&backend, &mut manager);

    let events = manager.drain_events();
    assert_eq!(received_on(&events, &path), 1);
    let chat = manager.chat(&path).unwrap();
    assert_eq!(chat.pending_messages()[0].body_text(), Some("hi there"));
}

#[test]
fn local_echo_is_not_delivered() {
    let (backend, mut manager) = manager();
    let path = manager.request_chat("alice@example.com").unwrap();

    manager.send(&path, Message::text(MessageType::Normal, "hello")).unwrap();
    run_until_idle(&backend, &mut manager);

    assert_eq!(received_on(&manager.drain_events(), &path), 0);
    assert_eq!(backend.sent_messages().len(), 1);
}

#[test]
fn message_for_unknown_conversation_is_dropped() {
    let (backend, mut manager) = manager();
    let path = manager.request_chat("alice@example.com").unwrap();
    let conversation = manager.chat(&path).unwrap().conversation().unwrap();
    manager.close(&path).unwrap();
    manager.drain_events();

    backend.deliver(conversation, "too late", MessageFlags::RECV);
    run_until_idle(&backend, &mut manager);

    assert!(manager.drain_events().is_empty());
    assert_eq!(manager.chats().count(), 0);
}

#[test]
fn rescued_chat_survives_until_acknowledged_and_closed() {
    let (backend, mut manager) = manager();
    let path = manager.request_chat("alice@example.com").unwrap();
    let conversation = manager.chat(&path).unwrap().conversation().unwrap();
    backend.deliver(conversation, "are you there?", MessageFlags::RECV);
    run_until_idle(&backend, &mut manager);

    manager.close(&path).unwrap();
    assert_eq!(manager.chat(&path).unwrap().lifecycle(), Lifecycle::Rescued);
    assert!(!manager.chat(&path).unwrap().properties().requested);

    manager.acknowledge(&path, &[0]).unwrap();
    manager.close(&path).unwrap();

    assert!(manager.chat(&path).is_none());
    assert_eq!(backend.destroyed_conversations(), vec![conversation]);
}

#[test]
fn destroy_reaps_a_rescued_chat() {
    let (backend, mut manager) = manager();
    let path = manager.request_chat("alice@example.com").unwrap();
    let conversation = manager.chat(&path).unwrap().conversation().unwrap();
    backend.deliver(conversation, "ping", MessageFlags::RECV);
    run_until_idle(&backend, &mut manager);
    manager.close(&path).unwrap();

    manager.destroy(&path).unwrap();

    assert!(manager.chat(&path).is_none());
    assert_eq!(backend.destroyed_conversations().len(), 1);
}

#[test]
fn typing_timer_fires_route_to_the_chat() {
    let (backend, mut manager) = manager();
    let path = manager.request_chat("alice@example.com").unwrap();

    manager.set_chat_state(&path, ChatState::Composing as u32).unwrap();
    backend.advance(Duration::from_secs(65));
    run_until_idle(&backend, &mut manager);

    let announced: Vec<_> = backend.typing_announcements().into_iter().map(|(_, s)| s).collect();
    assert_eq!(announced, vec![TypingState::Typing; 3]);
    assert_eq!(backend.live_timers().len(), 1);

    manager.close(&path).unwrap();
    assert!(backend.live_timers().is_empty());
}

#[test]
fn group_additions_are_mirrored_on_the_subscribe_list() {
    let (backend, mut manager) = manager();
    let friends = manager.request_group("Friends").unwrap();
    let carol = manager.contact("carol@example.com");

    manager.add_member(&friends, carol, "").unwrap();
    run_until_idle(&backend, &mut manager);

    let subscribe = manager.subscribe_path().clone();
    assert_eq!(members_of(&manager, &subscribe), vec!["carol@example.com"]);
    assert_eq!(members_of(&manager, &friends), vec!["carol@example.com"]);
}

#[test]
fn subscribe_add_after_group_add_before_roster_events() {
    let (backend, mut manager) = manager();
    let friends = manager.request_group("Friends").unwrap();
    let subscribe = manager.subscribe_path().clone();
    let carol = manager.contact("carol@example.com");

    manager.add_member(&friends, carol, "").unwrap();
    manager.add_member(&subscribe, carol, "").unwrap();

    assert_eq!(members_of(&manager, &subscribe), vec!["carol@example.com"]);
    assert_eq!(members_of(&manager, &friends), vec!["carol@example.com"]);
    assert_eq!(
        backend.buddies_named("carol@example.com"),
        vec![(backend.find_buddy("carol@example.com").unwrap(), Some("Friends".to_owned()))]
    );

    run_until_idle(&backend, &mut manager);
    assert_eq!(members_of(&manager, &subscribe), vec!["carol@example.com"]);
    assert_eq!(backend.buddy_names(), vec!["carol@example.com"]);
}

#[test]
fn subscribe_add_of_unseen_roster_entry_is_a_no_op() {
    let (backend, mut manager) = manager();
    roster_entry(&backend, "bob@example.com", "Work");
    let subscribe = manager.subscribe_path().clone();
    let bob = manager.contact("bob@example.com");

    manager.add_member(&subscribe, bob, "").unwrap();

    assert_eq!(members_of(&manager, &subscribe), vec!["bob@example.com"]);
    assert_eq!(backend.buddy_names(), vec!["bob@example.com"]);
    let work = manager.request_group("Work").unwrap();
    assert_eq!(members_of(&manager, &work), vec!["bob@example.com"]);
}

#[test]
fn stale_roster_events_do_not_resurrect_removed_buddies() {
    let (backend, mut manager) = manager();
    let friends = manager.request_group("Friends").unwrap();
    let subscribe = manager.subscribe_path().clone();
    let carol = manager.contact("carol@example.com");

    manager.add_member(&friends, carol, "").unwrap();
    manager.remove_member(&subscribe, carol, "", RemoveReason::None.code()).unwrap();
    run_until_idle(&backend, &mut manager);

    assert!(members_of(&manager, &subscribe).is_empty());
    assert!(members_of(&manager, &friends).is_empty());
    assert!(backend.buddy_names().is_empty());
}

#[test]
fn roster_changes_create_group_channels_on_demand() {
    let (backend, mut manager) = manager();

    roster_entry(&backend, "bob@example.com", "Work");
    run_until_idle(&backend, &mut manager);

    let work = manager
        .contact_lists()
        .find(|list| list.name() == "Work")
        .map(|list| list.path().clone())
        .unwrap();
    assert_eq!(members_of(&manager, &work), vec!["bob@example.com"]);
}

#[test]
fn group_removal_keeps_buddy_listed_elsewhere() {
    let (backend, mut manager) = manager();
    roster_entry(&backend, "bob@example.com", "Friends");
    roster_entry(&backend, "bob@example.com", "Work");
    run_until_idle(&backend, &mut manager);
    let friends = manager.request_group("Friends").unwrap();
    let work = manager.request_group("Work").unwrap();
    let bob = manager.contact("bob@example.com");

    manager.remove_member(&friends, bob, "", RemoveReason::None.code()).unwrap();
    run_until_idle(&backend, &mut manager);

    let subscribe = manager.subscribe_path().clone();
    assert!(members_of(&manager, &friends).is_empty());
    assert_eq!(members_of(&manager, &work), vec!["bob@example.com"]);
    assert_eq!(members_of(&manager, &subscribe), vec!["bob@example.com"]);
}

#[test]
fn subscribe_removal_empties_every_group() {
    let (backend, mut manager) = manager();
    roster_entry(&backend, "bob@example.com", "Friends");
    roster_entry(&backend, "bob@example.com", "Work");
    run_until_idle(&backend, &mut manager);
    let subscribe = manager.subscribe_path().clone();
    let bob = manager.contact("bob@example.com");

    manager.remove_member(&subscribe, bob, "", RemoveReason::None.code()).unwrap();
    run_until_idle(&backend, &mut manager);

    for list in manager.contact_lists() {
        assert!(list.membership().is_empty(), "{} still has members", list.name());
    }
    assert!(backend.buddy_names().is_empty());
}

#[test]
fn closing_an_empty_group_drops_it() {
    let (_backend, mut manager) = manager();
    let friends = manager.request_group("Friends").unwrap();

    manager.close(&friends).unwrap();

    assert!(manager.contact_list(&friends).is_none());
    assert_eq!(
        manager.close(&friends),
        Err(BridgeError::UnknownChannel(friends.clone()))
    );
}

#[test]
fn invalid_requests_are_rejected() {
    let (_backend, mut manager) = manager();
    let chat = manager.request_chat("alice@example.com").unwrap();
    let subscribe = manager.subscribe_path().clone();
    let alice = manager.contact("alice@example.com");

    let err = manager.remove_member(&chat, alice, "", 42).unwrap_err();
    assert!(matches!(err.channel_error(), Some(ChannelError::InvalidArgument(_))));

    let err = manager.destroy(&subscribe).unwrap_err();
    assert!(matches!(err.channel_error(), Some(ChannelError::NotImplemented(_))));

    let nowhere = ObjectPath::new("/nowhere");
    assert_eq!(manager.acknowledge(&nowhere, &[]), Err(BridgeError::UnknownChannel(nowhere)));
}

#[test]
fn shutdown_disposes_every_chat() {
    let (backend, mut manager) = manager();
    manager.request_chat("alice@example.com").unwrap();
    manager.request_chat("bob@example.com").unwrap();
    manager.request_group("Friends").unwrap();
    manager.drain_events();

    manager.shutdown();

    let closes = manager.drain_events().into_iter().filter(|(_, e)| *e == ChannelEvent::Closed).count();
    assert_eq!(closes, 2);
    assert_eq!(manager.chats().count(), 0);
    assert_eq!(manager.contact_lists().count(), 1);
    assert_eq!(backend.destroyed_conversations().len(), 2);
    assert_eq!(manager.context().handles.contacts().total_refs(), 1);
}

#[test]
fn scripted_session_completes() {
    let (backend, mut manager) = manager();

    let log = run_scripted_session(&backend, &mut manager).unwrap();

    assert_eq!(log.count(|e| matches!(e, ChannelEvent::SendCompleted { outcome: Ok(_), .. })), 1);
    assert_eq!(log.count(|e| matches!(e, ChannelEvent::MessageReceived(_))), 1);
    assert!(log.count(|e| *e == ChannelEvent::Closed) >= 3);
    assert_eq!(manager.chats().count(), 0);
    assert!(backend.live_timers().is_empty());
}

#[test]
fn scripted_session_survives_failures_and_no_typing() {
    let (backend, mut manager) = manager_with(SimBackendConfig {
        typing_supported: false,
        send_failure_rate: 1.0,
        ..SimBackendConfig::default()
    });

    let log = run_scripted_session(&backend, &mut manager).unwrap();

    assert_eq!(log.count(|e| matches!(e, ChannelEvent::SendCompleted { outcome: Err(_), .. })), 1);
    assert!(backend.sent_messages().is_empty());
}
