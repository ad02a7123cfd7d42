use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use trellis_ir::{UiSnapshot, WidgetId, WindowId};

use crate::signature::{abstract_widget, GranularityTable, SignatureArena, SignatureHandle};

/// Whether a signature matched exactly one widget in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cardinality {
    One,
    Many,
}

/// Result of reducing one snapshot against a window's arena.
#[derive(Debug, Clone, Default)]
pub struct Reduction {
    /// Signature assigned to each widget.
    pub by_widget: HashMap<WidgetId, SignatureHandle>,
    /// How many widgets each signature matched.
    pub cardinality: HashMap<SignatureHandle, Cardinality>,
}

impl Reduction {
    /// Sorted (structural-hash, cardinality) pairs — the state identity key.
    pub fn identity_pairs(&self, arena: &SignatureArena) -> Vec<(u64, Cardinality)> {
        let mut pairs: Vec<(u64, Cardinality)> = self
            .cardinality
            .iter()
            .map(|(&h, &c)| (arena.get(h).structural_hash, c))
            .collect();
        pairs.sort_unstable_by_key(|&(h, c)| (h, matches!(c, Cardinality::Many)));
        pairs
    }
}

/// Reduces every widget of one snapshot to an interned signature.
///
/// Interning runs root-first through a worklist: a widget's signature can
/// only be finalized once its parent's handle is known, because the child's
/// structural hash folds the parent's hash. Attribute vectors are memoized
/// per widget so escalated levels never recompute lower-level work twice
/// within one reduction.
pub struct StateReducer;

impl StateReducer {
    pub fn reduce(
        snapshot: &UiSnapshot,
        window: WindowId,
        arena: &mut SignatureArena,
        granularity: &GranularityTable,
    ) -> Reduction {
        let mut by_widget: HashMap<WidgetId, SignatureHandle> = HashMap::new();
        let mut vectors = HashMap::new();

        let mut worklist: VecDeque<&WidgetId> =
            snapshot.widgets.iter().map(|w| &w.id).collect();
        // Each pass resolves at least every root still pending, so the loop
        // terminates after at most depth-of-tree passes.
        let mut deferrals = 0usize;
        let budget = snapshot.widgets.len().saturating_mul(snapshot.widgets.len()) + 1;

        while let Some(id) = worklist.pop_front() {
            if by_widget.contains_key(id) {
                continue;
            }
            let widget = match snapshot.widget(id) {
                Some(w) => w,
                None => continue,
            };
            let parent_handle = match widget.parent.as_ref() {
                None => None,
                Some(pid) if snapshot.widget(pid).is_none() => None,
                Some(pid) => match by_widget.get(pid) {
                    Some(&h) => Some(h),
                    None => {
                        // Parent not interned yet — requeue behind it.
                        worklist.push_back(id);
                        deferrals += 1;
                        if deferrals > budget {
                            // Orphaned parent link; treat as root.
                            None
                        } else {
                            continue;
                        }
                    }
                },
            };

            let level = granularity.level_for(window, &widget.class_name);
            let vector = vectors
                .entry((id.clone(), level))
                .or_insert_with(|| abstract_widget(widget, snapshot, level))
                .clone();
            let handle = arena.intern(vector, parent_handle);
            by_widget.insert(id.clone(), handle);
        }

        let mut counts: HashMap<SignatureHandle, u32> = HashMap::new();
        for &handle in by_widget.values() {
            *counts.entry(handle).or_insert(0) += 1;
        }
        let cardinality = counts
            .into_iter()
            .map(|(h, n)| (h, if n == 1 { Cardinality::One } else { Cardinality::Many }))
            .collect();

        Reduction {
            by_widget,
            cardinality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_ir::{Rotation, SnapshotId, Widget};

    fn widget(id: &str, class: &str, parent: Option<&str>, children: &[&str]) -> Widget {
        Widget {
            id: WidgetId::new(id),
            class_name: class.to_string(),
            resource_id: String::new(),
            text: String::new(),
            content_desc: String::new(),
            bounds: Default::default(),
            clickable: false,
            long_clickable: false,
            scrollable: false,
            checkable: false,
            checked: false,
            enabled: true,
            editable: false,
            password: false,
            focused: false,
            visible: true,
            parent: parent.map(WidgetId::new),
            children: children.iter().map(|c| WidgetId::new(*c)).collect(),
        }
    }

    #[test]
    fn children_processed_after_parents_regardless_of_order() {
        // Child listed before its parent — the worklist must defer it.
        let widgets = vec![
            widget("c", "Button", Some("p"), &[]),
            widget("p", "Layout", None, &["c"]),
        ];
        let snap = UiSnapshot::new(SnapshotId(1), None, Rotation::Deg0, widgets);
        let mut arena = SignatureArena::new(WindowId(0));
        let table = GranularityTable::new();
        let red = StateReducer::reduce(&snap, WindowId(0), &mut arena, &table);

        assert_eq!(red.by_widget.len(), 2);
        let child_handle = red.by_widget[&WidgetId::new("c")];
        let parent_handle = red.by_widget[&WidgetId::new("p")];
        assert_eq!(arena.get(child_handle).parent, Some(parent_handle));
    }

    #[test]
    fn duplicate_widgets_collapse_to_many() {
        let widgets = vec![
            widget("root", "List", None, &["a", "b"]),
            widget("a", "Row", Some("root"), &[]),
            widget("b", "Row", Some("root"), &[]),
        ];
        let snap = UiSnapshot::new(SnapshotId(2), None, Rotation::Deg0, widgets);
        let mut arena = SignatureArena::new(WindowId(0));
        let table = GranularityTable::new();
        let red = StateReducer::reduce(&snap, WindowId(0), &mut arena, &table);

        let row = red.by_widget[&WidgetId::new("a")];
        assert_eq!(red.by_widget[&WidgetId::new("b")], row);
        assert_eq!(red.cardinality[&row], Cardinality::Many);
        let root = red.by_widget[&WidgetId::new("root")];
        assert_eq!(red.cardinality[&root], Cardinality::One);
    }

    #[test]
    fn identity_pairs_are_order_independent() {
        let widgets_a = vec![
            widget("x", "Button", None, &[]),
            widget("y", "TextView", None, &[]),
        ];
        let widgets_b = vec![
            widget("y", "TextView", None, &[]),
            widget("x", "Button", None, &[]),
        ];
        let mut arena = SignatureArena::new(WindowId(0));
        let table = GranularityTable::new();
        let a = StateReducer::reduce(
            &UiSnapshot::new(SnapshotId(1), None, Rotation::Deg0, widgets_a),
            WindowId(0),
            &mut arena,
            &table,
        );
        let b = StateReducer::reduce(
            &UiSnapshot::new(SnapshotId(2), None, Rotation::Deg0, widgets_b),
            WindowId(0),
            &mut arena,
            &table,
        );
        assert_eq!(a.identity_pairs(&arena), b.identity_pairs(&arena));
    }
}
