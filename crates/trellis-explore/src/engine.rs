use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use trellis_graph::{
    GraphError, InsertOutcome, TransitionEvidence, TransitionGraph, TransitionId,
};
use trellis_ir::{
    Interaction, ModelConfig, SnapshotId, UiSnapshot, WindowId, WindowTransitionMap,
};
use trellis_model::{
    AbstractAction, ModelOrigin, RegistryError, SignatureHandle, StateId, StateRegistry,
};

use crate::base::{BaseEdge, ModelDump};
use crate::coverage_gate::{CoverageGate, GateOutcome};
use crate::infer::{infer_after_explicit, seed_declared_transitions};
use crate::refine::{RefinementController, Resolution};
use crate::replay::{TraceLog, TraceStep};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Logic bug; aborts the current batch and must not be swallowed.
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },

    /// Queried before the first batch was processed.
    #[error("model not yet derived")]
    NotYetDerived,
}

/// What one processed interaction did to the model.
#[derive(Debug)]
pub struct ProcessReport {
    pub source: StateId,
    pub dest: StateId,
    pub transition: TransitionId,
    /// Set when the interaction raised a non-determinism conflict.
    pub resolution: Option<Resolution>,
    /// True when the coverage feed timed out and the batch ran without
    /// coverage evidence.
    pub coverage_degraded: bool,
}

struct EngineInner {
    config: ModelConfig,
    registry: StateRegistry,
    graph: TransitionGraph,
    trace: TraceLog,
    refiner: RefinementController,
    /// Windows whose statically declared edges have been seeded.
    declared_seeded: HashSet<WindowId>,
    batches: u64,
}

/// The single-writer model engine.
///
/// One batch — classification, reduction, state/action/transition update,
/// refinement, implicit inference — runs end-to-end under the lock; no two
/// batches interleave. Read queries serialize through the same lock, so
/// consumers always observe a consistent model.
pub struct ModelEngine {
    inner: Mutex<EngineInner>,
}

impl ModelEngine {
    pub fn new(config: ModelConfig, static_map: WindowTransitionMap) -> Self {
        let graph = TransitionGraph::new(config.explicit_edge_bonus, config.base_edge_bonus);
        Self {
            inner: Mutex::new(EngineInner {
                registry: StateRegistry::new(config.clone(), static_map),
                graph,
                trace: TraceLog::new(),
                refiner: RefinementController::new(),
                declared_seeded: HashSet::new(),
                batches: 0,
                config,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge a prior-version model before exploration starts.
    pub fn import_base(&self, dump: ModelDump) -> usize {
        let mut guard = self.lock();
        let inner = &mut *guard;
        crate::base::import_base_model(&mut inner.registry, &mut inner.graph, dump)
    }

    // ---- batch processing -------------------------------------------------

    /// Process one concrete interaction end-to-end.
    pub fn process_interaction(
        &self,
        prev: &UiSnapshot,
        interaction: &Interaction,
        result: &UiSnapshot,
        coverage: Option<&CoverageGate>,
    ) -> Result<ProcessReport, EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if interaction.prev_snapshot != prev.id || interaction.result_snapshot != result.id {
            return Err(EngineError::InvariantViolation {
                reason: format!(
                    "interaction {:?} does not link snapshots {:?} -> {:?}",
                    interaction.position, prev.id, result.id
                ),
            });
        }

        inner.registry.begin_batch();

        // Coverage-dependent bookkeeping waits (bounded) for the feed.
        let mut coverage_degraded = false;
        let update = match coverage {
            Some(gate) => {
                let timeout = Duration::from_millis(inner.config.coverage_timeout_ms);
                let outcome = gate.wait_ready(interaction.position, timeout);
                coverage_degraded = matches!(outcome, GateOutcome::TimedOut(_));
                outcome.into_update()
            }
            None => trellis_ir::CoverageUpdate::absent(interaction.position),
        };
        inner
            .registry
            .note_recent_methods(update.methods.iter().copied());

        let source = inner.registry.get_or_create(prev)?;
        let dest = inner.registry.get_or_create(result)?;
        verify_registered(&inner.registry, source, prev.id)?;
        verify_registered(&inner.registry, dest, result.id)?;

        let (source_window, dest_window) = {
            (
                inner.registry.state(source)?.window,
                inner.registry.state(dest)?.window,
            )
        };

        // First visit of a statically known window seeds its declared edges.
        for window in [source_window, dest_window] {
            if inner.declared_seeded.insert(window) {
                seed_declared_transitions(&mut inner.registry, &mut inner.graph, window)?;
            }
        }

        // Canonicalize the action against the source window's table.
        let target_signature = match interaction.target.as_ref() {
            Some(widget) => Some(signature_of_widget(
                &inner.registry,
                source,
                widget,
            )?),
            None => None,
        };
        let score = inner.config.initial_meaningfulness;
        let action = inner.registry.actions_mut(source_window)?.get_or_create(
            interaction.kind,
            target_signature,
            interaction.payload.clone(),
            score,
        );
        if dest == source {
            inner.registry.actions_mut(source_window)?.record_ineffective(action);
        } else {
            inner.registry.actions_mut(source_window)?.record_observation(action);
        }

        let evidence = TransitionEvidence {
            interactions: vec![interaction.position],
            covered_statements: update.statements,
            covered_methods: update.methods,
            handler_methods: update.modified_methods,
        };

        let outcome = inner.graph.record_explicit(
            source,
            dest,
            action,
            dest_window,
            BTreeSet::new(),
            evidence,
            ModelOrigin::Running,
        );

        inner.trace.push(TraceStep {
            interaction: interaction.clone(),
            action,
            source_state: source,
            dest_state: dest,
            source_window,
            dest_window,
        });

        let mut resolution = None;
        let transition = outcome.transition_id();
        if let InsertOutcome::Conflict { created, siblings } = outcome {
            // Base edges contradicted by running evidence lose outright.
            let mut running: Vec<TransitionId> = Vec::new();
            for sid in siblings {
                if inner.graph.get(sid)?.origin == ModelOrigin::Base {
                    inner.graph.remove(sid)?;
                    tracing::debug!(?sid, "base edge superseded by running evidence");
                } else {
                    running.push(sid);
                }
            }
            if !running.is_empty() {
                resolution = Some(inner.refiner.resolve_conflict(
                    &mut inner.registry,
                    &mut inner.graph,
                    &inner.trace,
                    created,
                    &running,
                )?);
            }
        }

        // Escalation rebuilt states; resolve the fresh identities.
        let (source, dest) = if resolution == Some(Resolution::Escalated) {
            let source = resolve_after_rebuild(&inner.registry, prev.id, source)?;
            let dest = resolve_after_rebuild(&inner.registry, result.id, dest)?;
            (source, dest)
        } else {
            (source, dest)
        };

        // Implicit closure only for transitions that survived refinement.
        if matches!(resolution, None | Some(Resolution::Guarded)) {
            infer_after_explicit(&mut inner.registry, &mut inner.graph, &mut inner.trace)?;
        }

        inner.graph.advance_cooldowns();
        inner.batches += 1;

        Ok(ProcessReport {
            source,
            dest,
            transition,
            resolution,
            coverage_degraded,
        })
    }

    // ---- consumer queries -------------------------------------------------

    /// Match or create the abstract state for a snapshot (no transition is
    /// recorded).
    pub fn get_or_create_abstract_state(
        &self,
        snapshot: &UiSnapshot,
    ) -> Result<StateId, EngineError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        Ok(inner.registry.get_or_create(snapshot)?)
    }

    /// Actions available in a state.
    pub fn get_available_actions(&self, state: StateId) -> Result<Vec<AbstractAction>, EngineError> {
        let guard = self.lock();
        let inner = &*guard;
        if inner.batches == 0 && inner.trace.is_empty() {
            if inner.registry.state(state).is_err() {
                return Err(EngineError::NotYetDerived);
            }
        }
        let s = inner.registry.state(state)?;
        let table = inner.registry.actions(s.window)?;
        Ok(s.actions.iter().map(|&h| table.get(h).clone()).collect())
    }

    /// Logical inputs known for a state, keyed by action.
    pub fn get_available_inputs(
        &self,
        state: StateId,
    ) -> Result<Vec<(AbstractAction, Vec<String>)>, EngineError> {
        let guard = self.lock();
        let inner = &*guard;
        let s = inner.registry.state(state)?;
        let table = inner.registry.actions(s.window)?;
        Ok(s.inputs
            .iter()
            .map(|(&h, values)| (table.get(h).clone(), values.iter().cloned().collect()))
            .collect())
    }

    pub fn state_for_snapshot(&self, snapshot: SnapshotId) -> Option<StateId> {
        self.lock().registry.state_for_snapshot(snapshot)
    }

    /// Run a read-only closure over the transition graph (reporting).
    pub fn with_graph<R>(&self, f: impl FnOnce(&TransitionGraph) -> R) -> R {
        f(&self.lock().graph)
    }

    /// Run a read-only closure over the state registry (reporting).
    pub fn with_registry<R>(&self, f: impl FnOnce(&StateRegistry) -> R) -> R {
        f(&self.lock().registry)
    }

    /// Serialize the current model for a later session's base import.
    pub fn export(&self) -> ModelDump {
        let guard = self.lock();
        let inner = &*guard;
        let windows = inner.registry.export_windows();
        let states = inner.registry.states().cloned().collect();
        let edges = inner
            .graph
            .transitions()
            .filter(|t| t.is_active())
            .map(|t| BaseEdge {
                source: t.source,
                dest: t.dest,
                dest_window: t.dest_window,
                action: t.action,
                guard: t.dependent_states.clone(),
            })
            .collect();
        ModelDump {
            windows,
            states,
            edges,
        }
    }
}

/// The snapshot must be registered under the state it resolved to.
fn verify_registered(
    registry: &StateRegistry,
    state: StateId,
    snapshot: SnapshotId,
) -> Result<(), EngineError> {
    let s = registry.state(state)?;
    if s.snapshots.contains(&snapshot) {
        Ok(())
    } else {
        Err(EngineError::InvariantViolation {
            reason: format!("snapshot {snapshot:?} not registered under state {state:?}"),
        })
    }
}

fn signature_of_widget(
    registry: &StateRegistry,
    state: StateId,
    widget: &trellis_ir::WidgetId,
) -> Result<SignatureHandle, EngineError> {
    let s = registry.state(state)?;
    s.signature_of
        .get(widget)
        .copied()
        .ok_or_else(|| EngineError::InvariantViolation {
            reason: format!("interacted widget {widget:?} has no signature in {state:?}"),
        })
}

fn resolve_after_rebuild(
    registry: &StateRegistry,
    snapshot: SnapshotId,
    fallback: StateId,
) -> Result<StateId, EngineError> {
    Ok(registry.state_for_snapshot(snapshot).unwrap_or(fallback))
}
