//! Typing state advertisement.
//!
//! The locally advertised chat state is announced to the peer through the
//! backend. Some protocols forget a typing state after a while; for those
//! the backend returns a timeout and the state is re-announced on a
//! repeating timer until it changes or the backend stops accepting it.

use std::time::Duration;

use murmur_core::{Backend, ChannelError, TimerId, TypingState};

/// Chat states a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ChatState {
    /// The channel is going away. Never requested explicitly.
    Gone = 0,
    /// Not paying attention to the conversation.
    Inactive = 1,
    /// Paying attention, not typing.
    Active = 2,
    /// Typed something, then stopped.
    Paused = 3,
    /// Typing.
    Composing = 4,
}

impl ChatState {
    /// Decode a raw chat state.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Gone),
            1 => Some(Self::Inactive),
            2 => Some(Self::Active),
            3 => Some(Self::Paused),
            4 => Some(Self::Composing),
            _ => None,
        }
    }

    pub(crate) fn validate(code: u32) -> Result<TypingState, ChannelError> {
        match Self::from_code(code) {
            Some(Self::Gone) => {
                Err(ChannelError::InvalidArgument("The Gone state may not be explicitly set".into()))
            },
            Some(Self::Inactive | Self::Active) => Ok(TypingState::NotTyping),
            Some(Self::Paused) => Ok(TypingState::Typed),
            Some(Self::Composing) => Ok(TypingState::Typing),
            None => Err(ChannelError::InvalidArgument(format!("Invalid chat state: {code}"))),
        }
    }
}

/// Typing state of one conversation and its resend timer.
///
/// # Invariants
///
/// - At most one resend timer is live at any time.
/// - No timer is armed for [`TypingState::NotTyping`].
#[derive(Debug)]
pub struct TypingScheduler {
    peer: String,
    state: TypingState,
    timer: Option<TimerId>,
}

impl TypingScheduler {
    /// Scheduler announcing to `peer`, starting out not typing.
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into(), state: TypingState::NotTyping, timer: None }
    }

    /// Currently advertised state.
    pub fn state(&self) -> TypingState {
        self.state
    }

    /// Live resend timer, if any.
    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    /// Advertise the chat state `code`.
    ///
    /// Any live resend timer is cancelled first, even if `code` is then
    /// rejected.
    pub fn set_state<B: Backend>(&mut self, backend: &B, code: u32) -> Result<(), ChannelError> {
        self.cancel(backend);

        let state = ChatState::validate(code)?;
        self.state = state;

        let timeout = backend.send_typing(&self.peer, state);
        tracing::debug!(peer = %self.peer, ?state, timeout, "announced typing state");

        if timeout > 0 && state != TypingState::NotTyping {
            self.timer = Some(backend.timeout_add(Duration::from_secs(u64::from(timeout))));
        }
        Ok(())
    }

    /// Handle a timer firing. Returns false if `timer` is not ours.
    ///
    /// Re-announces the current state; if the backend reports it can no
    /// longer send, the timer is removed.
    pub fn on_timer<B: Backend>(&mut self, backend: &B, timer: TimerId) -> bool {
        if self.timer != Some(timer) {
            return false;
        }

        if backend.send_typing(&self.peer, self.state) == 0 {
            tracing::debug!(peer = %self.peer, %timer, "backend stopped accepting typing state");
            backend.timeout_remove(timer);
            self.timer = None;
        }
        true
    }

    /// Remove the resend timer, if any.
    pub fn cancel<B: Backend>(&mut self, backend: &B) {
        if let Some(timer) = self.timer.take() {
            backend.timeout_remove(timer);
        }
    }
}
