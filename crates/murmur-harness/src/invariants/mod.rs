//! Behavioural checks over a snapshot of the bridge.
//!
//! Tests build a [`SystemSnapshot`] from the live channels, the contact
//! repo and the backend's live timers after each step, then run an
//! [`InvariantRegistry`] over it. A check sees only the snapshot, so the
//! same registry serves channel-level and manager-level suites.
//!
//! ```ignore
//! let snapshot = SystemSnapshot::from_channels(channels).with_handles(&handles);
//! InvariantRegistry::standard().assert_all(&snapshot, "after close");
//! ```

mod checks;
mod snapshot;

pub use checks::{ClosedMonotonic, MembershipDisjoint, RefcountBalance, SingleTypingTimer};
pub use snapshot::{ChannelSnapshot, SystemSnapshot};

/// Outcome of one check.
pub type InvariantResult = Result<(), Violation>;

/// A failed check.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the failing check.
    pub invariant: &'static str,
    /// Offending channel or handle and the observed values.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property every snapshot must satisfy.
pub trait Invariant {
    /// Short name, reported in violations.
    fn name(&self) -> &'static str;

    /// First violation found in `state`, if any.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;

    /// Build a violation of this invariant.
    fn violation(&self, message: String) -> Violation {
        Violation { invariant: self.name(), message }
    }
}

/// Ordered set of checks run together.
#[derive(Default)]
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl std::fmt::Debug for InvariantRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl InvariantRegistry {
    /// Registry with no checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// [`MembershipDisjoint`], [`ClosedMonotonic`], [`SingleTypingTimer`]
    /// and [`RefcountBalance`].
    pub fn standard() -> Self {
        Self::new()
            .with(MembershipDisjoint)
            .with(ClosedMonotonic)
            .with(SingleTypingTimer)
            .with(RefcountBalance)
    }

    /// This registry with `invariant` appended.
    #[must_use]
    pub fn with(mut self, invariant: impl Invariant + 'static) -> Self {
        self.invariants.push(Box::new(invariant));
        self
    }

    /// Names of the registered checks, in run order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.invariants.iter().map(|inv| inv.name())
    }

    /// Run every check. All violations are reported, not only the first.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Like [`InvariantRegistry::check_all`], failing the test on any
    /// violation. `context` names the step that was just applied.
    ///
    /// # Panics
    ///
    /// Panics if any check fails.
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        let violations = self.check_all(state).err().unwrap_or_default();
        let report: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert!(report.is_empty(), "invariant violated {context}:\n  {}", report.join("\n  "));
    }
}
