use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use trellis_ir::WindowId;
use trellis_model::{ActionHandle, ModelOrigin, StateId};

use crate::transition::{Transition, TransitionEvidence, TransitionId, TransitionStatus};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("unknown transition: {0:?}")]
    UnknownTransition(TransitionId),
}

/// Outcome of recording an explicit transition.
#[derive(Debug)]
pub enum InsertOutcome {
    /// An existing edge matched (source, action, dest) with a compatible
    /// guard; the new evidence was attached to it.
    Reused(TransitionId),
    /// A fresh explicit edge with no competing destination.
    Created(TransitionId),
    /// A fresh edge was created, but other explicit edges share
    /// (source, action) with compatible guards and different destinations —
    /// a raw non-determinism candidate for the refinement controller.
    Conflict {
        created: TransitionId,
        siblings: Vec<TransitionId>,
    },
}

impl InsertOutcome {
    pub fn transition_id(&self) -> TransitionId {
        match self {
            InsertOutcome::Reused(id)
            | InsertOutcome::Created(id)
            | InsertOutcome::Conflict { created: id, .. } => *id,
        }
    }
}

/// Per-(action, destination-window) enablement counters.
///
/// Tracks how often exercising an action newly unlocked previously
/// unavailable actions in its destination. Increments and decrements are
/// symmetric: removal subtracts exactly the weight insertion added.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnablementStats {
    counts: HashMap<(ActionHandle, WindowId), i64>,
}

impl EnablementStats {
    pub fn get(&self, action: ActionHandle, window: WindowId) -> i64 {
        self.counts.get(&(action, window)).copied().unwrap_or(0)
    }

    fn add(&mut self, action: ActionHandle, window: WindowId, weight: i64) {
        *self.counts.entry((action, window)).or_insert(0) += weight;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(ActionHandle, WindowId), &i64)> {
        self.counts.iter()
    }
}

/// The directed multigraph of abstract states and interned actions.
pub struct TransitionGraph {
    transitions: Vec<Transition>,
    by_source: HashMap<StateId, Vec<TransitionId>>,
    enablement: EnablementStats,
    explicit_bonus: i64,
    base_bonus: i64,
}

impl TransitionGraph {
    pub fn new(explicit_bonus: u32, base_bonus: u32) -> Self {
        Self {
            transitions: Vec::new(),
            by_source: HashMap::new(),
            enablement: EnablementStats::default(),
            explicit_bonus: explicit_bonus as i64,
            base_bonus: base_bonus as i64,
        }
    }

    pub fn get(&self, id: TransitionId) -> Result<&Transition, GraphError> {
        self.transitions
            .get(id.0 as usize)
            .ok_or(GraphError::UnknownTransition(id))
    }

    pub fn get_mut(&mut self, id: TransitionId) -> Result<&mut Transition, GraphError> {
        self.transitions
            .get_mut(id.0 as usize)
            .ok_or(GraphError::UnknownTransition(id))
    }

    /// All transitions, tombstones included.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    /// Outgoing transitions of a state, tombstones excluded.
    pub fn outgoing(&self, source: StateId) -> Vec<&Transition> {
        self.by_source
            .get(&source)
            .map(|ids| {
                ids.iter()
                    .map(|&id| &self.transitions[id.0 as usize])
                    .filter(|t| t.status != TransitionStatus::Removed)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Distinct states appearing as a source or destination.
    pub fn vertices(&self) -> BTreeSet<StateId> {
        let mut out = BTreeSet::new();
        for t in &self.transitions {
            if t.status != TransitionStatus::Removed {
                out.insert(t.source);
                out.insert(t.dest);
            }
        }
        out
    }

    pub fn enablement(&self) -> &EnablementStats {
        &self.enablement
    }

    // ---- edge insertion ---------------------------------------------------

    /// Record an observed transition. Three cases: reuse an existing edge
    /// for the same destination, create a new one, or flag a conflict when
    /// a guard-compatible sibling already reaches a different destination.
    #[allow(clippy::too_many_arguments)]
    pub fn record_explicit(
        &mut self,
        source: StateId,
        dest: StateId,
        action: ActionHandle,
        dest_window: WindowId,
        guard: BTreeSet<StateId>,
        evidence: TransitionEvidence,
        origin: ModelOrigin,
    ) -> InsertOutcome {
        // Case (a): evidence attaches to an existing same-destination edge.
        if let Some(id) = self.find_edge(source, action, dest) {
            let was_implicit = {
                let t = &mut self.transitions[id.0 as usize];
                let was_implicit = !t.explicit;
                t.explicit = true;
                merge_evidence(&mut t.evidence, evidence);
                if t.status == TransitionStatus::Removed {
                    t.status = TransitionStatus::Active;
                }
                was_implicit
            };
            if was_implicit {
                // Promotion from implicit to explicit upgrades its weight.
                self.enablement
                    .add(action, dest_window, self.explicit_bonus - self.base_bonus);
            }
            return InsertOutcome::Reused(id);
        }

        // A contradicting explicit observation supersedes implicit edges
        // for the same (source, action).
        self.supersede_implicit(source, action, dest);

        let guard_enabled = !guard.is_empty();
        let id = self.push(Transition {
            id: TransitionId(self.transitions.len() as u32),
            source,
            dest,
            dest_window,
            action,
            explicit: true,
            origin,
            status: TransitionStatus::Active,
            guard_enabled,
            dependent_states: guard,
            nondeterministic: false,
            nondeterminism_count: 0,
            evidence,
            retained_signatures: BTreeSet::new(),
            new_signatures: BTreeSet::new(),
        });
        self.enablement.add(action, dest_window, self.explicit_bonus);

        // Case (c): guard-compatible explicit siblings to other dests.
        let siblings: Vec<TransitionId> = self
            .sibling_ids(source, action)
            .into_iter()
            .filter(|&sid| {
                let t = &self.transitions[sid.0 as usize];
                sid != id
                    && t.explicit
                    && t.dest != dest
                    && t.status != TransitionStatus::Removed
                    && t.guard_compatible_with(&self.transitions[id.0 as usize])
            })
            .collect();

        if siblings.is_empty() {
            InsertOutcome::Created(id)
        } else {
            tracing::debug!(
                ?source,
                ?action,
                competitors = siblings.len(),
                "non-determinism candidate"
            );
            InsertOutcome::Conflict {
                created: id,
                siblings,
            }
        }
    }

    /// Record an inferred edge. No-op (returning the existing id) when an
    /// edge for (source, action, dest) already exists; never overrides an
    /// explicit edge to a different destination.
    pub fn record_implicit(
        &mut self,
        source: StateId,
        dest: StateId,
        action: ActionHandle,
        dest_window: WindowId,
        guard: BTreeSet<StateId>,
        origin: ModelOrigin,
    ) -> Option<TransitionId> {
        if let Some(id) = self.find_edge(source, action, dest) {
            // Merge guard knowledge into the existing edge.
            let t = &mut self.transitions[id.0 as usize];
            if !guard.is_empty() {
                t.guard_enabled = true;
                t.dependent_states.extend(guard);
            }
            return Some(id);
        }
        // An explicit edge to a different destination contradicts the
        // inference; drop it.
        let contradicted = self.sibling_ids(source, action).into_iter().any(|sid| {
            let t = &self.transitions[sid.0 as usize];
            t.explicit && t.status != TransitionStatus::Removed && t.dest != dest
        });
        if contradicted {
            return None;
        }

        let guard_enabled = !guard.is_empty();
        let id = self.push(Transition {
            id: TransitionId(self.transitions.len() as u32),
            source,
            dest,
            dest_window,
            action,
            explicit: false,
            origin,
            status: TransitionStatus::Active,
            guard_enabled,
            dependent_states: guard,
            nondeterministic: false,
            nondeterminism_count: 0,
            evidence: TransitionEvidence::default(),
            retained_signatures: BTreeSet::new(),
            new_signatures: BTreeSet::new(),
        });
        self.enablement.add(action, dest_window, self.base_bonus);
        Some(id)
    }

    /// Remove an edge outright, decrementing its enablement weight
    /// symmetrically with what insertion added.
    pub fn remove(&mut self, id: TransitionId) -> Result<(), GraphError> {
        let explicit_bonus = self.explicit_bonus;
        let base_bonus = self.base_bonus;
        let (action, window, weight) = {
            let t = self.get_mut(id)?;
            if t.status == TransitionStatus::Removed {
                return Ok(());
            }
            t.status = TransitionStatus::Removed;
            let weight = if t.explicit { explicit_bonus } else { base_bonus };
            (t.action, t.dest_window, weight)
        };
        self.enablement.add(action, window, -weight);
        Ok(())
    }

    // ---- non-determinism --------------------------------------------------

    /// Explicit, non-removed siblings of (source, action).
    pub fn explicit_siblings(&self, source: StateId, action: ActionHandle) -> Vec<TransitionId> {
        self.sibling_ids(source, action)
            .into_iter()
            .filter(|&sid| {
                let t = &self.transitions[sid.0 as usize];
                t.explicit && t.status != TransitionStatus::Removed
            })
            .collect()
    }

    /// Mark a conflicting set non-deterministic and soft-deactivate all but
    /// the most recently observed member.
    pub fn mark_nondeterministic(&mut self, ids: &[TransitionId], cooldown: u32) {
        let most_recent = ids
            .iter()
            .max_by_key(|&&id| {
                self.transitions[id.0 as usize]
                    .evidence
                    .interactions
                    .iter()
                    .max()
                    .copied()
            })
            .copied();
        for &id in ids {
            let t = &mut self.transitions[id.0 as usize];
            t.nondeterministic = true;
            t.nondeterminism_count += 1;
            if Some(id) != most_recent {
                if t.evidence.is_empty() {
                    // Nothing ever backed this edge — prune immediately.
                    t.status = TransitionStatus::Removed;
                } else {
                    t.deactivate(cooldown);
                }
            }
        }
        tracing::warn!(edges = ids.len(), "non-deterministic transition set deactivated");
    }

    /// Advance every cooldown by one batch.
    pub fn advance_cooldowns(&mut self) {
        for t in &mut self.transitions {
            t.status = t.status.advance();
        }
    }

    // ---- rebuild support --------------------------------------------------

    /// Retarget edges after a model rebuild: every source, destination, and
    /// dependent state in `remap` is replaced by its successor.
    pub fn retarget(&mut self, remap: &HashMap<StateId, StateId>) {
        for t in &mut self.transitions {
            if let Some(&new) = remap.get(&t.source) {
                t.source = new;
            }
            if let Some(&new) = remap.get(&t.dest) {
                t.dest = new;
            }
            if t.dependent_states.iter().any(|d| remap.contains_key(d)) {
                t.dependent_states = t
                    .dependent_states
                    .iter()
                    .map(|d| remap.get(d).copied().unwrap_or(*d))
                    .collect();
            }
        }
        self.by_source.clear();
        for i in 0..self.transitions.len() {
            let t = &self.transitions[i];
            self.by_source.entry(t.source).or_default().push(t.id);
        }
    }

    // ---- internals --------------------------------------------------------

    fn push(&mut self, t: Transition) -> TransitionId {
        let id = t.id;
        self.by_source.entry(t.source).or_default().push(id);
        self.transitions.push(t);
        id
    }

    fn sibling_ids(&self, source: StateId, action: ActionHandle) -> Vec<TransitionId> {
        self.by_source
            .get(&source)
            .map(|ids| {
                ids.iter()
                    .copied()
                    .filter(|&id| self.transitions[id.0 as usize].action == action)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find_edge(
        &self,
        source: StateId,
        action: ActionHandle,
        dest: StateId,
    ) -> Option<TransitionId> {
        self.sibling_ids(source, action)
            .into_iter()
            .find(|&id| self.transitions[id.0 as usize].dest == dest)
    }

    fn supersede_implicit(&mut self, source: StateId, action: ActionHandle, dest: StateId) {
        let stale: Vec<TransitionId> = self
            .sibling_ids(source, action)
            .into_iter()
            .filter(|&id| {
                let t = &self.transitions[id.0 as usize];
                !t.explicit && t.dest != dest && t.status != TransitionStatus::Removed
            })
            .collect();
        for id in stale {
            tracing::debug!(?id, "implicit edge superseded by explicit observation");
            // Implicit edges carry no interaction evidence; remove outright.
            let _ = self.remove(id);
        }
    }
}

fn merge_evidence(into: &mut TransitionEvidence, from: TransitionEvidence) {
    into.interactions.extend(from.interactions);
    into.interactions.sort_unstable();
    into.interactions.dedup();
    into.covered_statements.extend(from.covered_statements);
    into.covered_methods.extend(from.covered_methods);
    into.handler_methods.extend(from.handler_methods);
}
