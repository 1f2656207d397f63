//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::{BTreeMap, BTreeSet};

use murmur_core::Handle;

use super::{Invariant, InvariantResult, SystemSnapshot};

/// A handle sits in at most one of a channel's three member sets.
pub struct MembershipDisjoint;

impl Invariant for MembershipDisjoint {
    fn name(&self) -> &'static str {
        "membership_disjoint"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for channel in &state.channels {
            let sets = [
                ("members", &channel.members),
                ("local_pending", &channel.local_pending),
                ("remote_pending", &channel.remote_pending),
            ];
            for (i, (left_name, left)) in sets.iter().enumerate() {
                for (right_name, right) in &sets[i + 1..] {
                    if let Some(handle) = left.intersection(right).next() {
                        return Err(self.violation(format!(
                            "channel {}: handle {handle} in both {left_name} and {right_name}",
                            channel.path
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Once closed, a channel stays closed.
///
/// The closed flag observed across successive snapshots of one channel must
/// never go from true back to false.
pub struct ClosedMonotonic;

impl Invariant for ClosedMonotonic {
    fn name(&self) -> &'static str {
        "closed_monotonic"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (path, history) in &state.closed_history {
            if let Some(step) = history.windows(2).position(|w| w[0] && !w[1]) {
                return Err(self.violation(format!(
                    "channel {path}: reopened after observation {step}"
                )));
            }
        }
        Ok(())
    }
}

/// Each channel owns at most one typing timer, and no timer is orphaned.
///
/// Every live backend timer belongs to exactly one channel, no two channels
/// share a timer and closed channels hold none.
pub struct SingleTypingTimer;

impl Invariant for SingleTypingTimer {
    fn name(&self) -> &'static str {
        "single_typing_timer"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut owners = BTreeMap::new();
        for channel in &state.channels {
            let Some(timer) = channel.typing_timer else { continue };

            if channel.closed {
                return Err(self.violation(format!(
                    "channel {}: closed but still owns timer {timer}",
                    channel.path
                )));
            }
            if !state.live_timers.contains(&timer) {
                return Err(self.violation(format!(
                    "channel {}: timer {timer} is not live in the backend",
                    channel.path
                )));
            }
            if let Some(other) = owners.insert(timer, &channel.path) {
                return Err(self.violation(format!(
                    "timer {timer} shared by {other} and {}",
                    channel.path
                )));
            }
        }

        let orphaned: Vec<_> = state.live_timers.iter().filter(|t| !owners.contains_key(*t)).collect();
        if !orphaned.is_empty() {
            return Err(self.violation(format!("live timers with no owner: {orphaned:?}")));
        }
        Ok(())
    }
}

/// Contact reference counts equal the number of holders.
///
/// Holders are the connection (for its own handle), each channel's own
/// references (a chat's target and initiator) and one per channel whose
/// member sets contain the handle.
pub struct RefcountBalance;

impl Invariant for RefcountBalance {
    fn name(&self) -> &'static str {
        "refcount_balance"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut expected: BTreeMap<Handle, u32> = BTreeMap::new();
        if let Some(handle) = state.self_handle {
            *expected.entry(handle).or_default() += 1;
        }
        for channel in &state.channels {
            for &handle in &channel.held_contacts {
                *expected.entry(handle).or_default() += 1;
            }
            let members: BTreeSet<_> = channel.all_members().collect();
            for handle in members {
                *expected.entry(handle).or_default() += 1;
            }
        }

        for (&handle, &actual) in &state.contact_refs {
            let want = expected.get(&handle).copied().unwrap_or(0);
            if actual != want {
                return Err(self.violation(format!(
                    "contact {handle}: refcount {actual}, expected {want}"
                )));
            }
        }
        if let Some((handle, want)) = expected.iter().find(|(h, _)| !state.contact_refs.contains_key(*h)) {
            return Err(self.violation(format!("contact {handle}: unallocated but held {want} times")));
        }
        Ok(())
    }
}
