//! Driving a [`ChannelManager`] against the simulated backend.

use std::time::Duration;

use murmur_bridge::{BridgeError, ChannelManager};
use murmur_channels::ChatState;
use murmur_core::{ChannelEvent, Message, MessageFlags, MessageType, ObjectPath, RemoveReason};

use crate::sim_backend::SimBackend;

/// Feed queued backend events to `manager` until the backend is quiet.
/// Returns the number of events handled.
pub fn run_until_idle(backend: &SimBackend, manager: &mut ChannelManager<SimBackend>) -> usize {
    let mut handled = 0;
    loop {
        let events = backend.take_events();
        if events.is_empty() {
            return handled;
        }
        for event in events {
            manager.handle_event(event);
            handled += 1;
        }
    }
}

/// Channel notifications collected over a session.
#[derive(Debug, Default)]
pub struct SessionLog {
    events: Vec<(ObjectPath, ChannelEvent)>,
}

impl SessionLog {
    /// Every notification, in emission order.
    pub fn events(&self) -> &[(ObjectPath, ChannelEvent)] {
        &self.events
    }

    /// Number of notifications matching `pred`.
    pub fn count(&self, pred: impl Fn(&ChannelEvent) -> bool) -> usize {
        self.events.iter().filter(|(_, event)| pred(event)).count()
    }

    fn collect(&mut self, manager: &ChannelManager<SimBackend>) {
        for (path, event) in manager.drain_events() {
            tracing::info!(channel = %path, ?event, "channel event");
            self.events.push((path, event));
        }
    }
}

/// Run a short scripted session exercising every channel kind: an
/// outgoing chat with typing, an incoming chat that gets rescued and then
/// acknowledged, and a roster group round trip. Ends with a shutdown.
pub fn run_scripted_session(
    backend: &SimBackend,
    manager: &mut ChannelManager<SimBackend>,
) -> Result<SessionLog, BridgeError> {
    let mut log = SessionLog::default();

    let alice = manager.request_chat("alice@example.com")?;
    if let Err(err) = manager.send(&alice, Message::text(MessageType::Normal, "hello\nalice")) {
        tracing::warn!(error = %err, "send failed");
    }
    if let Err(err) = manager.set_chat_state(&alice, ChatState::Composing as u32) {
        tracing::warn!(error = %err, "typing notifications unavailable");
    }
    backend.advance(Duration::from_secs(30));
    run_until_idle(backend, manager);
    if let Err(err) = manager.set_chat_state(&alice, ChatState::Active as u32) {
        tracing::warn!(error = %err, "typing notifications unavailable");
    }
    log.collect(manager);

    let conversation = backend.incoming_conversation("bob@example.com");
    run_until_idle(backend, manager);
    backend.deliver(conversation, "hi <b>there</b>", MessageFlags::RECV);
    run_until_idle(backend, manager);
    let bob = manager
        .chats()
        .find(|chat| chat.conversation() == Some(conversation))
        .map(|chat| chat.path().clone())
        .ok_or_else(|| BridgeError::UnknownChannel(ObjectPath::new("incoming chat")))?;
    manager.close(&bob)?;
    let pending: Vec<u32> = manager
        .chat(&bob)
        .map(|chat| chat.pending_messages().iter().filter_map(Message::pending_id).collect())
        .unwrap_or_default();
    manager.acknowledge(&bob, &pending)?;
    manager.close(&bob)?;
    log.collect(manager);

    let friends = manager.request_group("Friends")?;
    let carol = manager.contact("carol@example.com");
    manager.add_member(&friends, carol, "")?;
    run_until_idle(backend, manager);
    manager.remove_member(&friends, carol, "", RemoveReason::None.code())?;
    run_until_idle(backend, manager);
    manager.close(&friends)?;
    log.collect(manager);

    manager.close(&alice)?;
    manager.shutdown();
    log.collect(manager);

    Ok(log)
}
