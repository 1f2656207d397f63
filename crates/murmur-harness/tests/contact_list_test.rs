//! Contact list and roster group channels against the simulated buddy list.

#![allow(clippy::unwrap_used)]

use murmur_channels::{ChannelContext, ContactListChannel, ListKind};
use murmur_core::{Backend, ChannelError, ChannelEvent, Handle, HandleType, ObjectPath};
use murmur_harness::{DEFAULT_GROUP, SimBackend, SimBackendConfig};

const BOB: &str = "bob@example.com";

fn context() -> (SimBackend, ChannelContext<SimBackend>) {
    let backend = SimBackend::new(SimBackendConfig::default());
    let ctx = ChannelContext::new(backend.clone(), "me@example.com");
    (backend, ctx)
}

fn subscribe(ctx: &ChannelContext<SimBackend>) -> ContactListChannel<SimBackend> {
    let list = ctx.handles.subscribe_list();
    ContactListChannel::new(ctx, ObjectPath::new("/list/subscribe"), HandleType::List, list).unwrap()
}

fn group(ctx: &ChannelContext<SimBackend>, name: &str) -> ContactListChannel<SimBackend> {
    let handle = ctx.handles.groups().ensure(name);
    ContactListChannel::new(ctx, ObjectPath::new(format!("/group/{name}")), HandleType::Group, handle)
        .unwrap()
}

/// Place an entry for `name` in `group` behind the channels' back.
fn roster_entry(backend: &SimBackend, name: &str, group: &str) {
    let buddy = backend.buddy_new(name);
    let group = backend.group_new(group);
    backend.blist_add_buddy(buddy, Some(group));
}

fn bob(ctx: &ChannelContext<SimBackend>) -> Handle {
    ctx.handles.contacts().ensure(BOB)
}

#[test]
fn subscribe_add_places_buddy_in_default_group() {
    let (backend, ctx) = context();
    let mut list = subscribe(&ctx);
    let bob = bob(&ctx);

    list.add_member(bob, "").unwrap();

    assert!(list.membership().members().contains(&bob));
    let entries = backend.buddies_named(BOB);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.as_deref(), Some(DEFAULT_GROUP));
    assert_eq!(ctx.handles.contacts().ref_count(bob), 1);
}

#[test]
fn adding_an_existing_member_is_a_no_op() {
    let (backend, ctx) = context();
    let mut list = subscribe(&ctx);
    let bob = bob(&ctx);
    list.add_member(bob, "").unwrap();
    ctx.events.drain();

    list.add_member(bob, "").unwrap();

    assert_eq!(backend.buddies_named(BOB).len(), 1);
    assert!(ctx.events.is_empty());
}

#[test]
#[should_panic(expected = "invariant")]
fn add_panics_when_backend_disagrees() {
    let (backend, ctx) = context();
    let mut list = subscribe(&ctx);
    roster_entry(&backend, BOB, "Friends");

    let _ = list.add_member(bob(&ctx), "");
}

#[test]
#[should_panic(expected = "invariant: contact list channel for handle type Contact")]
fn contact_handles_do_not_name_a_list() {
    let (_backend, ctx) = context();
    let bob = bob(&ctx);

    let _ = ContactListChannel::new(&ctx, ObjectPath::new("/list/bob"), HandleType::Contact, bob);
}

#[test]
fn subscribe_remove_takes_buddy_off_every_group() {
    let (backend, ctx) = context();
    roster_entry(&backend, BOB, "Friends");
    roster_entry(&backend, BOB, "Work");
    let mut list = subscribe(&ctx);
    let bob = bob(&ctx);
    list.sync_member_added(bob);

    list.remove_member(bob, "").unwrap();

    assert!(backend.buddies_named(BOB).is_empty());
    let mut removals = backend.account_removals();
    removals.sort();
    assert_eq!(
        removals,
        vec![(BOB.to_owned(), Some("Friends".to_owned())), (BOB.to_owned(), Some("Work".to_owned()))]
    );
    assert!(list.membership().is_empty());
    assert_eq!(ctx.handles.contacts().ref_count(bob), 0);
}

#[test]
fn group_remove_purges_duplicates_and_spares_other_groups() {
    let (backend, ctx) = context();
    roster_entry(&backend, BOB, "Friends");
    roster_entry(&backend, BOB, "Friends");
    roster_entry(&backend, BOB, "Work");
    let mut friends = group(&ctx, "Friends");
    let bob = bob(&ctx);
    friends.sync_member_added(bob);

    friends.remove_member(bob, "").unwrap();

    let left = backend.buddies_named(BOB);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].1.as_deref(), Some("Work"));
    assert_eq!(backend.account_removals().len(), 2);
    assert!(friends.membership().is_empty());
}

#[test]
fn removing_a_missing_backend_entry_still_updates_membership() {
    let (backend, ctx) = context();
    let mut friends = group(&ctx, "Friends");
    let bob = bob(&ctx);
    friends.sync_member_added(bob);

    friends.remove_member(bob, "").unwrap();

    assert!(friends.membership().is_empty());
    assert!(backend.account_removals().is_empty());
}

#[test]
fn removing_a_non_member_is_a_no_op() {
    let (backend, ctx) = context();
    roster_entry(&backend, BOB, "Friends");
    let mut friends = group(&ctx, "Friends");

    friends.remove_member(bob(&ctx), "").unwrap();

    assert_eq!(backend.buddies_named(BOB).len(), 1);
}

#[test]
fn group_closes_only_when_empty() {
    let (_backend, ctx) = context();
    let mut friends = group(&ctx, "Friends");
    let bob = bob(&ctx);
    friends.add_member(bob, "").unwrap();

    let err = friends.close().unwrap_err();
    assert_eq!(err, ChannelError::NotAvailable("group 'Friends' is not empty".into()));
    assert!(!friends.is_closed());

    friends.remove_member(bob, "").unwrap();
    ctx.events.drain();
    friends.close().unwrap();
    friends.close().unwrap();

    assert!(friends.is_closed());
    let closes = ctx.events.drain().into_iter().filter(|(_, e)| *e == ChannelEvent::Closed).count();
    assert_eq!(closes, 1);
}

#[test]
fn subscribe_list_cannot_be_closed() {
    let (_backend, ctx) = context();
    let mut list = subscribe(&ctx);

    assert!(matches!(list.close(), Err(ChannelError::NotImplemented(_))));
    assert!(!list.is_closed());
}

#[test]
fn closed_group_rejects_changes_and_ignores_roster_sync() {
    let (_backend, ctx) = context();
    let mut friends = group(&ctx, "Friends");
    friends.close().unwrap();
    let bob = bob(&ctx);

    assert_eq!(friends.add_member(bob, ""), Err(ChannelError::Closed));
    friends.sync_member_added(bob);

    assert!(friends.membership().is_empty());
    assert_eq!(ctx.handles.contacts().ref_count(bob), 0);
}

#[test]
fn group_add_targets_its_own_group() {
    let (backend, ctx) = context();
    let mut work = group(&ctx, "Work");

    work.add_member(bob(&ctx), "").unwrap();

    assert_eq!(backend.buddies_named(BOB)[0].1.as_deref(), Some("Work"));
    assert!(matches!(work.kind(), ListKind::Group(_)));
}

#[test]
fn contact_lists_are_never_requested() {
    let (_backend, ctx) = context();
    let list = subscribe(&ctx);

    let props = list.properties();
    assert!(!props.requested);
    assert_eq!(props.initiator_handle, ctx.handles.self_handle());
    assert_eq!(props.initiator_id, "me@example.com");
    assert_eq!(props.target_id, "subscribe");
    assert_eq!(props.channel_type, murmur_channels::properties::CHANNEL_TYPE_CONTACT_LIST);
}

#[test]
fn dropping_a_group_channel_releases_its_handle() {
    let (_backend, ctx) = context();
    let friends = group(&ctx, "Friends");
    let handle = friends.target();
    assert_eq!(ctx.handles.groups().ref_count(handle), 1);

    drop(friends);

    assert_eq!(ctx.handles.groups().ref_count(handle), 0);
}
