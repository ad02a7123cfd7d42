use std::collections::{HashMap, HashSet};

use trellis_graph::{TransitionGraph, TransitionId};
use trellis_ir::WindowId;
use trellis_model::{ActionHandle, StateRegistry};

use crate::engine::EngineError;
use crate::replay::TraceLog;

/// Terminal outcome of one conflict resolution.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Granularity was escalated and the window's model rebuilt; the batch
    /// restarts validation against the rebuilt states.
    Escalated,
    /// Memory guards now disambiguate the conflicting set.
    Guarded,
    /// Neither escalation nor guarding resolved the conflict; the action is
    /// exempt from further refinement and the losing edges are cooling.
    Abandoned,
}

/// The validate/refine state machine.
///
/// One conflict runs Detect → Escalate → Guard → Abandon. Escalation is
/// attempted at most once per (window, action) so a recurring conflict
/// falls through to guarding instead of looping; the granularity table's
/// ceiling bounds cumulative escalation per widget class independently.
#[derive(Debug, Default)]
pub struct RefinementController {
    exempt: HashSet<(WindowId, ActionHandle)>,
    escalation_attempts: HashMap<(WindowId, ActionHandle), u32>,
}

impl RefinementController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_exempt(&self, window: WindowId, action: ActionHandle) -> bool {
        self.exempt.contains(&(window, action))
    }

    /// Resolve a raw non-determinism candidate reported by the graph.
    ///
    /// `created` is the freshly inserted edge, `siblings` the competing
    /// explicit edges with compatible guards and different destinations.
    pub fn resolve_conflict(
        &mut self,
        registry: &mut StateRegistry,
        graph: &mut TransitionGraph,
        trace: &TraceLog,
        created: TransitionId,
        siblings: &[TransitionId],
    ) -> Result<Resolution, EngineError> {
        let (source_window, action, interacted_class, target_signature) = {
            let t = graph.get(created)?;
            let state = registry.state(t.source)?;
            let window = state.window;
            let action_ref = registry.actions(window)?.get(t.action);
            let (class, sig) = match action_ref.target {
                Some(sig) => (
                    registry.arena(window)?.get(sig).local.class_name.clone(),
                    Some(sig),
                ),
                None => (String::new(), None),
            };
            (window, t.action, class, sig)
        };

        if self.is_exempt(source_window, action) {
            self.deactivate_losers(registry, graph, created, siblings)?;
            return Ok(Resolution::Abandoned);
        }

        // Step 2: escalate granularity, once per (window, action).
        let attempts = self
            .escalation_attempts
            .entry((source_window, action))
            .or_insert(0);
        if let (0, Some(affected)) = (*attempts, target_signature) {
            *attempts += 1;
            if registry.escalate_granularity(source_window, &interacted_class) {
                let report = registry.rebuild_model(source_window, affected)?;
                graph.retarget(&report.remapped);
                tracing::debug!(
                    window = source_window.0,
                    class = %interacted_class,
                    "conflict resolved by escalation; model rebuilt"
                );
                return Ok(Resolution::Escalated);
            }
        }

        // Step 3: attach memory guards to unguarded members of the set.
        let threshold = registry.config().similarity_threshold;
        let mut all = vec![created];
        all.extend_from_slice(siblings);
        for &id in &all {
            let (guarded, dest) = {
                let t = graph.get(id)?;
                (t.guard_enabled && !t.dependent_states.is_empty(), t.dest)
            };
            if guarded {
                continue;
            }
            if let Some(dep) = trace.discover_guard(trace.len(), dest, registry, threshold) {
                graph.get_mut(id)?.add_guard(dep);
                tracing::debug!(?id, ?dep, "memory guard attached");
            }
        }

        // Count members that still collide: unguarded after the attempt.
        let unguarded = all
            .iter()
            .filter(|&&id| {
                graph
                    .get(id)
                    .map(|t| !t.guard_enabled || t.dependent_states.is_empty())
                    .unwrap_or(false)
            })
            .count();
        if unguarded <= 1 {
            return Ok(Resolution::Guarded);
        }

        // Step 4: abandon — exempt the action and cool the losing edges.
        self.exempt.insert((source_window, action));
        self.deactivate_losers(registry, graph, created, siblings)?;
        tracing::warn!(
            window = source_window.0,
            "refinement abandoned; action exempt from further refinement"
        );
        Ok(Resolution::Abandoned)
    }

    fn deactivate_losers(
        &self,
        registry: &StateRegistry,
        graph: &mut TransitionGraph,
        created: TransitionId,
        siblings: &[TransitionId],
    ) -> Result<(), EngineError> {
        let cooldown = registry.config().cooldown_batches;
        let mut all = vec![created];
        all.extend_from_slice(siblings);
        graph.mark_nondeterministic(&all, cooldown);
        Ok(())
    }
}
