use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use trellis_ir::{TracePosition, WindowId};
use trellis_model::{ActionHandle, ModelOrigin, SignatureHandle, StateId};

/// Index of a transition in the graph's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransitionId(pub u32);

/// Activation status of a transition.
///
/// Soft-deactivation parks an edge in `Cooling` for a fixed number of
/// batches instead of deleting it; `advance` moves the machine one batch
/// forward. `Removed` is terminal and only used for superseded implicit
/// edges kept for bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    Active,
    Cooling(u32),
    Removed,
}

impl TransitionStatus {
    /// One batch elapsed: decrement cooldowns, reactivating at zero.
    pub fn advance(self) -> Self {
        match self {
            TransitionStatus::Cooling(0) | TransitionStatus::Cooling(1) => {
                TransitionStatus::Active
            }
            TransitionStatus::Cooling(n) => TransitionStatus::Cooling(n - 1),
            other => other,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, TransitionStatus::Active)
    }
}

/// Evidence attached to a transition from observed interactions and the
/// coverage feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionEvidence {
    /// Trace positions of every concrete interaction that produced this edge.
    pub interactions: Vec<TracePosition>,
    pub covered_statements: HashSet<u64>,
    pub covered_methods: HashSet<u64>,
    /// Methods the pre-analysis identified as handlers of the action.
    pub handler_methods: HashSet<u64>,
}

impl TransitionEvidence {
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }
}

/// One edge of the abstract transition graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: TransitionId,
    pub source: StateId,
    pub dest: StateId,
    /// Window owning the destination state; keyed into enablement stats.
    pub dest_window: WindowId,
    pub action: ActionHandle,
    /// Explicit edges are backed by at least one observed interaction.
    pub explicit: bool,
    pub origin: ModelOrigin,
    pub status: TransitionStatus,
    /// History guard: the edge applies only after a visit to one of these
    /// states. Empty set = unguarded.
    pub guard_enabled: bool,
    pub dependent_states: BTreeSet<StateId>,
    pub nondeterministic: bool,
    pub nondeterminism_count: u32,
    pub evidence: TransitionEvidence,
    /// Signatures provably retained in the destination regardless of the
    /// source's extras; narrowed by intersection during propagation.
    pub retained_signatures: BTreeSet<SignatureHandle>,
    /// Signatures provably added by the action; same narrowing rule.
    pub new_signatures: BTreeSet<SignatureHandle>,
}

impl Transition {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Two guard contexts are compatible when either side is unguarded or
    /// the dependent-state sets intersect.
    pub fn guard_compatible_with(&self, other: &Transition) -> bool {
        guards_compatible(
            self.guard_enabled,
            &self.dependent_states,
            other.guard_enabled,
            &other.dependent_states,
        )
    }

    /// Attach a memory guard. Returns false if the state is already in the
    /// guard set.
    pub fn add_guard(&mut self, dependent: StateId) -> bool {
        self.guard_enabled = true;
        self.dependent_states.insert(dependent)
    }

    pub fn deactivate(&mut self, cooldown: u32) {
        self.status = TransitionStatus::Cooling(cooldown);
    }
}

pub fn guards_compatible(
    a_enabled: bool,
    a_deps: &BTreeSet<StateId>,
    b_enabled: bool,
    b_deps: &BTreeSet<StateId>,
) -> bool {
    if !a_enabled || !b_enabled || a_deps.is_empty() || b_deps.is_empty() {
        return true;
    }
    a_deps.intersection(b_deps).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooling_counts_down_to_active() {
        let mut s = TransitionStatus::Cooling(3);
        s = s.advance();
        assert_eq!(s, TransitionStatus::Cooling(2));
        s = s.advance();
        assert_eq!(s, TransitionStatus::Cooling(1));
        s = s.advance();
        assert_eq!(s, TransitionStatus::Active);
        assert_eq!(s.advance(), TransitionStatus::Active);
    }

    #[test]
    fn removed_is_terminal() {
        assert_eq!(TransitionStatus::Removed.advance(), TransitionStatus::Removed);
    }

    #[test]
    fn guard_compatibility_rules() {
        let empty = BTreeSet::new();
        let a: BTreeSet<StateId> = [StateId(1), StateId(2)].into_iter().collect();
        let b: BTreeSet<StateId> = [StateId(2), StateId(3)].into_iter().collect();
        let c: BTreeSet<StateId> = [StateId(9)].into_iter().collect();

        // Unguarded sides are always compatible.
        assert!(guards_compatible(false, &empty, true, &a));
        assert!(guards_compatible(true, &a, false, &empty));
        // Intersecting guards are compatible.
        assert!(guards_compatible(true, &a, true, &b));
        // Disjoint guards are not.
        assert!(!guards_compatible(true, &a, true, &c));
    }
}
