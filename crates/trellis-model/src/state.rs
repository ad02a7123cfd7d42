use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use trellis_ir::{Rotation, SnapshotId, WidgetId, WindowId};

use crate::action::ActionHandle;
use crate::reducer::Cardinality;
use crate::signature::SignatureHandle;

/// Stable identity of an abstract state, derived from the sorted
/// (signature-hash, cardinality) pairs plus window, rotation, and the
/// keyboard flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u64);

/// How the state came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Backed by at least one concrete snapshot.
    Concrete,
    /// Per-window placeholder created before any concrete visit; seeds
    /// actions and transitions speculatively.
    Virtual,
    /// Forecast destination of an implicit edge, never visited.
    Predicted,
}

/// Which exploration session produced the state or edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrigin {
    /// Imported from a prior app version's model.
    Base,
    /// Built during the current session.
    Running,
}

/// Classification flags for an abstract state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFlags {
    pub home_screen: bool,
    pub permission_dialog: bool,
    pub crashed_dialog: bool,
    pub keyboard_open: bool,
    pub menu_open: bool,
    pub out_of_app: bool,
}

/// One abstract state: an equivalence class of concrete snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbstractState {
    pub id: StateId,
    pub kind: StateKind,
    pub origin: ModelOrigin,
    pub window: WindowId,
    pub rotation: Rotation,
    pub flags: StateFlags,
    /// Sorted signature set with cardinalities — the identity basis.
    pub signatures: Vec<(SignatureHandle, Cardinality)>,
    /// Signature realized by each concrete widget across the state's
    /// snapshots. Keyed by widget so duplicates (cardinality `Many`) all
    /// stay resolvable.
    pub signature_of: HashMap<WidgetId, SignatureHandle>,
    /// Every concrete snapshot mapped to this state, in arrival order.
    pub snapshots: Vec<SnapshotId>,
    /// Actions seeded from the signature set.
    pub actions: Vec<ActionHandle>,
    /// Logical inputs available per action (e.g. candidate text values).
    pub inputs: HashMap<ActionHandle, BTreeSet<String>>,
    /// Set when refinement increased granularity for the window; the state
    /// is kept for history but no longer matched against.
    pub obsolete: bool,
}

impl AbstractState {
    pub fn is_concrete(&self) -> bool {
        matches!(self.kind, StateKind::Concrete)
    }

    pub fn attach_snapshot(&mut self, snapshot: SnapshotId) {
        if !self.snapshots.contains(&snapshot) {
            self.snapshots.push(snapshot);
        }
    }

    pub fn has_signature(&self, handle: SignatureHandle) -> bool {
        self.signatures.iter().any(|&(h, _)| h == handle)
    }
}

/// Derive the stable state id.
///
/// `pairs` must already be sorted; the caller gets this from
/// `Reduction::identity_pairs`.
pub fn compute_state_id(
    pairs: &[(u64, Cardinality)],
    window: WindowId,
    rotation: Rotation,
    keyboard_open: bool,
) -> StateId {
    let mut hasher = DefaultHasher::new();
    window.hash(&mut hasher);
    (rotation as u8).hash(&mut hasher);
    keyboard_open.hash(&mut hasher);
    for (h, c) in pairs {
        h.hash(&mut hasher);
        matches!(c, Cardinality::Many).hash(&mut hasher);
    }
    StateId(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_id_depends_on_context() {
        let pairs = vec![(1u64, Cardinality::One), (2, Cardinality::Many)];
        let base = compute_state_id(&pairs, WindowId(0), Rotation::Deg0, false);
        assert_eq!(
            base,
            compute_state_id(&pairs, WindowId(0), Rotation::Deg0, false)
        );
        assert_ne!(
            base,
            compute_state_id(&pairs, WindowId(1), Rotation::Deg0, false)
        );
        assert_ne!(
            base,
            compute_state_id(&pairs, WindowId(0), Rotation::Deg90, false)
        );
        assert_ne!(
            base,
            compute_state_id(&pairs, WindowId(0), Rotation::Deg0, true)
        );
    }

    #[test]
    fn state_id_depends_on_cardinality() {
        let one = vec![(1u64, Cardinality::One)];
        let many = vec![(1u64, Cardinality::Many)];
        assert_ne!(
            compute_state_id(&one, WindowId(0), Rotation::Deg0, false),
            compute_state_id(&many, WindowId(0), Rotation::Deg0, false)
        );
    }
}
