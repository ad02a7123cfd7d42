use serde::{Deserialize, Serialize};
use trellis_ir::{ActionKind, WindowId};

use crate::signature::SignatureHandle;

/// Opaque handle to an interned action in one window's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionHandle(pub u32);

/// Canonical identity of a user/system action, scoped to a window.
///
/// Exactly one live instance exists per (kind, target, extra, window);
/// every transition that uses the action shares it through its handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbstractAction {
    pub kind: ActionKind,
    pub target: Option<SignatureHandle>,
    pub extra: Option<String>,
    pub window: WindowId,
    /// Mutable score consumers use to rank actions; maintained here as
    /// interactions are observed.
    pub meaningfulness: f64,
}

impl AbstractAction {
    fn matches(&self, kind: ActionKind, target: Option<SignatureHandle>, extra: Option<&str>) -> bool {
        self.kind == kind && self.target == target && self.extra.as_deref() == extra
    }
}

/// Per-window interning table for abstract actions.
///
/// Lookup is a linear scan by value equality — action sets per window stay
/// small, and the scan keeps the table free of hash-identity subtleties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTable {
    pub window: WindowId,
    actions: Vec<AbstractAction>,
}

impl ActionTable {
    pub fn new(window: WindowId) -> Self {
        Self {
            window,
            actions: Vec::new(),
        }
    }

    pub fn get_or_create(
        &mut self,
        kind: ActionKind,
        target: Option<SignatureHandle>,
        extra: Option<String>,
        initial_meaningfulness: f64,
    ) -> ActionHandle {
        if let Some(i) = self
            .actions
            .iter()
            .position(|a| a.matches(kind, target, extra.as_deref()))
        {
            return ActionHandle(i as u32);
        }
        let handle = ActionHandle(self.actions.len() as u32);
        self.actions.push(AbstractAction {
            kind,
            target,
            extra,
            window: self.window,
            meaningfulness: initial_meaningfulness,
        });
        handle
    }

    pub fn get(&self, handle: ActionHandle) -> &AbstractAction {
        &self.actions[handle.0 as usize]
    }

    /// An observed interaction exercised the action and changed something.
    pub fn record_observation(&mut self, handle: ActionHandle) {
        self.actions[handle.0 as usize].meaningfulness += 1.0;
    }

    /// The action was exercised but led nowhere new.
    pub fn record_ineffective(&mut self, handle: ActionHandle) {
        let score = &mut self.actions[handle.0 as usize].meaningfulness;
        *score = (*score * 0.5).max(0.0);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionHandle, &AbstractAction)> {
        self.actions
            .iter()
            .enumerate()
            .map(|(i, a)| (ActionHandle(i as u32), a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_identity_returns_same_handle() {
        let mut table = ActionTable::new(WindowId(0));
        let a = table.get_or_create(ActionKind::Click, Some(SignatureHandle(7)), None, 1.0);
        let b = table.get_or_create(ActionKind::Click, Some(SignatureHandle(7)), None, 1.0);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn identity_distinguishes_kind_target_extra() {
        let mut table = ActionTable::new(WindowId(0));
        let click = table.get_or_create(ActionKind::Click, Some(SignatureHandle(1)), None, 1.0);
        let long = table.get_or_create(ActionKind::LongClick, Some(SignatureHandle(1)), None, 1.0);
        let other =
            table.get_or_create(ActionKind::Click, Some(SignatureHandle(2)), None, 1.0);
        let payload = table.get_or_create(
            ActionKind::Click,
            Some(SignatureHandle(1)),
            Some("x".to_string()),
            1.0,
        );
        assert_ne!(click, long);
        assert_ne!(click, other);
        assert_ne!(click, payload);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn meaningfulness_tracks_observations() {
        let mut table = ActionTable::new(WindowId(0));
        let a = table.get_or_create(ActionKind::Click, None, None, 1.0);
        table.record_observation(a);
        assert!((table.get(a).meaningfulness - 2.0).abs() < f64::EPSILON);
        table.record_ineffective(a);
        assert!((table.get(a).meaningfulness - 1.0).abs() < f64::EPSILON);
    }
}
