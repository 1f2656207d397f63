//! Deterministic simulation harness for Murmur channels.
//!
//! [`SimBackend`] implements the backend and event-loop traits in memory
//! with a virtual clock, seeded failure injection and a record of every call
//! the channels make, so channel behavior can be tested without a real
//! messaging library. The [`session`] module drives a whole
//! [`ChannelManager`](murmur_bridge::ChannelManager) against it.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks over snapshots of channel, handle and timer state. Use
//! [`InvariantRegistry::standard()`] for the channel invariants.

pub mod invariants;
pub mod session;
pub mod sim_backend;

pub use invariants::{
    ChannelSnapshot, ClosedMonotonic, Invariant, InvariantRegistry, InvariantResult,
    MembershipDisjoint, RefcountBalance, SingleTypingTimer, SystemSnapshot, Violation,
};
pub use session::{SessionLog, run_scripted_session, run_until_idle};
pub use sim_backend::{
    ChatCall, DEFAULT_GROUP, SentMessage, SimBackend, SimBackendConfig, SimBuddy, SimConversation,
};
