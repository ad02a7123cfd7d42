use std::collections::BTreeSet;

use rayon::prelude::*;
use trellis_graph::{coarse_state_summary, structural_similarity, TransitionGraph};
use trellis_ir::{ActionKind, WindowId, WindowKind};
use trellis_model::{ActionHandle, ModelOrigin, SignatureHandle, StateId, StateRegistry};

use crate::engine::EngineError;
use crate::replay::TraceLog;

/// Derive all implicit edges that follow from the explicit transition just
/// recorded at the last trace position.
///
/// Inference order follows the observation: back-navigation, inverse
/// symmetric actions, keyboard close, sibling propagation, item-subwidget.
/// Every edge created here is implicit and will be superseded by a later
/// contradicting explicit observation.
pub fn infer_after_explicit(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    trace: &mut TraceLog,
) -> Result<(), EngineError> {
    let position = trace.len();
    let Some(step) = trace.steps().last().cloned() else {
        return Ok(());
    };

    infer_back_navigation(registry, graph, trace, position, &step)?;
    infer_inverse_action(registry, graph, &step)?;
    infer_keyboard_close(registry, graph, trace, position, &step)?;
    propagate_to_siblings(registry, graph, &step)?;
    infer_item_subwidget(registry, graph, &step)?;
    Ok(())
}

/// Seed the implicit edges the static pre-analysis declared for `window`.
///
/// Each declared target materializes (window tables, virtual state) and
/// gets a forecast `Predicted` destination; the edge runs from the source
/// window's virtual state under an untargeted `Intent` action, so a later
/// observed transition to the same window supersedes it normally.
pub fn seed_declared_transitions(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    window: WindowId,
) -> Result<(), EngineError> {
    let Some(name) = registry.window(window).map(|w| w.name.clone()) else {
        return Ok(());
    };
    let targets: Vec<(String, WindowKind)> = registry
        .static_map()
        .declared_successors(&name)
        .into_iter()
        .map(|w| (w.name.clone(), w.kind))
        .collect();
    if targets.is_empty() {
        return Ok(());
    }
    let Some(source) = registry.virtual_state(window) else {
        return Ok(());
    };
    let score = registry.config().initial_meaningfulness;
    for (target_name, kind) in targets {
        let dest_window = registry.ensure_window(&target_name, kind);
        let dest = registry.ensure_predicted_state(dest_window);
        let action =
            registry
                .actions_mut(window)?
                .get_or_create(ActionKind::Intent, None, None, score);
        graph.record_implicit(
            source,
            dest,
            action,
            dest_window,
            BTreeSet::new(),
            ModelOrigin::Running,
        );
        tracing::debug!(window = window.0, target = %target_name, "declared edge seeded");
    }
    Ok(())
}

type Step = crate::replay::TraceStep;

/// Back-navigation: if the trace shows a prior (non-home) window before the
/// source, a back press from the destination plausibly returns there.
fn infer_back_navigation(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    trace: &mut TraceLog,
    position: usize,
    step: &Step,
) -> Result<(), EngineError> {
    if step.dest_state == step.source_state {
        return Ok(());
    }
    let home_windows: Vec<_> = registry
        .windows()
        .filter(|w| w.kind == WindowKind::HomeScreen)
        .map(|w| w.id)
        .collect();
    // W_prev is the window visited before the source screen.
    let Some(prior) = trace.prior_window(position, step.source_window, &home_windows) else {
        return Ok(());
    };
    // Latest concrete state of the prior window as the back target.
    let Some(target) = trace.most_recent_state_where(position, prior, registry, |s| s.is_concrete())
    else {
        return Ok(());
    };
    // Every back-like action interned for the destination window plausibly
    // lands on that prior state.
    let back_actions: Vec<ActionHandle> = registry
        .actions(step.dest_window)?
        .iter()
        .filter(|(_, a)| a.kind.is_back_like())
        .map(|(h, _)| h)
        .collect();
    for back in back_actions {
        graph.record_implicit(
            step.dest_state,
            target,
            back,
            prior,
            BTreeSet::new(),
            ModelOrigin::Running,
        );
    }
    Ok(())
}

/// Inverse swipes and rotations: a content-changing symmetric action
/// implies its inverse from destination back to source.
fn infer_inverse_action(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    step: &Step,
) -> Result<(), EngineError> {
    // Content must actually have changed, and both states must share the
    // window (and menu flag, for rotations).
    if step.dest_state == step.source_state || step.source_window != step.dest_window {
        return Ok(());
    }
    let Some(inverse_kind) = step.interaction.kind.inverse() else {
        return Ok(());
    };
    if matches!(
        step.interaction.kind,
        ActionKind::RotateClockwise | ActionKind::RotateCounterClockwise
    ) {
        let src = registry.state(step.source_state)?;
        let dst = registry.state(step.dest_state)?;
        if src.flags.menu_open != dst.flags.menu_open {
            return Ok(());
        }
    }

    // The inverse acts on the same signature, interned in the dest window
    // (== source window here).
    let target = registry.actions(step.source_window)?.get(step.action).target;
    let score = registry.config().initial_meaningfulness;
    let inverse = registry.actions_mut(step.dest_window)?.get_or_create(
        inverse_kind,
        target,
        None,
        score,
    );
    graph.record_implicit(
        step.dest_state,
        step.source_state,
        inverse,
        step.source_window,
        BTreeSet::new(),
        ModelOrigin::Running,
    );
    Ok(())
}

/// Keyboard close: a keyboard-open destination can reach the most recent
/// keyboard-closed state of the same window.
fn infer_keyboard_close(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    trace: &mut TraceLog,
    position: usize,
    step: &Step,
) -> Result<(), EngineError> {
    let keyboard_open = registry.state(step.dest_state)?.flags.keyboard_open;
    if !keyboard_open {
        return Ok(());
    }
    let Some(target) = trace.most_recent_state_where(position, step.dest_window, registry, |s| {
        s.is_concrete() && !s.flags.keyboard_open
    }) else {
        return Ok(());
    };
    let score = registry.config().initial_meaningfulness;
    let close = registry.actions_mut(step.dest_window)?.get_or_create(
        ActionKind::CloseKeyboard,
        None,
        None,
        score,
    );
    graph.record_implicit(
        step.dest_state,
        target,
        close,
        step.dest_window,
        BTreeSet::new(),
        ModelOrigin::Running,
    );
    Ok(())
}

/// Propagation: copy the observed edge to every structurally similar
/// sibling of the source with matching window/rotation/keyboard/menu flags.
///
/// Guard sets merge; the guaranteed-retained/new signature annotations
/// narrow by intersection across all contributing sources.
fn propagate_to_siblings(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    step: &Step,
) -> Result<(), EngineError> {
    let threshold = registry.config().similarity_threshold;
    let (summary, rotation, flags, source_sigs) = {
        let source = registry.state(step.source_state)?;
        (
            coarse_state_summary(source, registry.arena(source.window)?),
            source.rotation,
            source.flags,
            source
                .signatures
                .iter()
                .map(|&(h, _)| h)
                .collect::<BTreeSet<_>>(),
        )
    };
    let dest_sigs: BTreeSet<SignatureHandle> = registry
        .state(step.dest_state)?
        .signatures
        .iter()
        .map(|&(h, _)| h)
        .collect();
    let retained: BTreeSet<_> = dest_sigs.intersection(&source_sigs).copied().collect();
    let added: BTreeSet<_> = dest_sigs.difference(&source_sigs).copied().collect();

    let candidates: Vec<&trellis_model::AbstractState> = registry
        .states()
        .filter(|s| {
            s.id != step.source_state
                && s.is_concrete()
                && !s.obsolete
                && s.window == step.source_window
                && s.rotation == rotation
                && s.flags.keyboard_open == flags.keyboard_open
                && s.flags.menu_open == flags.menu_open
        })
        .collect();

    // Similarity is the expensive part; score candidates in parallel.
    let arena = registry.arena(step.source_window)?;
    let siblings: Vec<StateId> = candidates
        .par_iter()
        .filter(|s| {
            let their = coarse_state_summary(s, arena);
            structural_similarity(&summary, &their) >= threshold
        })
        .map(|s| s.id)
        .collect();

    let (guard, dest_window) = {
        let t = graph.get(step_transition(graph, step)?)?;
        (t.dependent_states.clone(), t.dest_window)
    };

    for sibling in siblings {
        // A self-loop retargets onto the sibling itself.
        let dest = if step.source_state == step.dest_state {
            sibling
        } else {
            step.dest_state
        };
        if let Some(id) = graph.record_implicit(
            sibling,
            dest,
            step.action,
            dest_window,
            guard.clone(),
            ModelOrigin::Running,
        ) {
            let t = graph.get_mut(id)?;
            if t.retained_signatures.is_empty() && t.new_signatures.is_empty() {
                t.retained_signatures = retained.clone();
                t.new_signatures = added.clone();
            } else {
                t.retained_signatures = t
                    .retained_signatures
                    .intersection(&retained)
                    .copied()
                    .collect();
                t.new_signatures = t.new_signatures.intersection(&added).copied().collect();
            }
        }
    }
    Ok(())
}

/// Item-subwidget inference: clicking inside a list row implies the row's
/// own item action.
fn infer_item_subwidget(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    step: &Step,
) -> Result<(), EngineError> {
    if !matches!(step.interaction.kind, ActionKind::Click | ActionKind::LongClick) {
        return Ok(());
    }
    let Some(own_signature) = registry.actions(step.source_window)?.get(step.action).target
    else {
        return Ok(());
    };

    // Nearest actionable ancestor along the interned signature chain.
    let ancestor_sig = {
        let arena = registry.arena(step.source_window)?;
        arena.parent_chain(own_signature).into_iter().find(|&h| {
            let local = &arena.get(h).local;
            local.clickable || local.long_clickable
        })
    };
    let Some(ancestor_sig) = ancestor_sig else {
        return Ok(());
    };

    let kind = match step.interaction.kind {
        ActionKind::Click => ActionKind::ItemClick,
        _ => ActionKind::ItemLongClick,
    };
    let score = registry.config().initial_meaningfulness;
    let item_action = registry.actions_mut(step.source_window)?.get_or_create(
        kind,
        Some(ancestor_sig),
        None,
        score,
    );
    graph.record_implicit(
        step.source_state,
        step.dest_state,
        item_action,
        step.dest_window,
        BTreeSet::new(),
        ModelOrigin::Running,
    );
    Ok(())
}

/// The transition the last trace step produced.
fn step_transition(
    graph: &TransitionGraph,
    step: &Step,
) -> Result<trellis_graph::TransitionId, EngineError> {
    graph
        .outgoing(step.source_state)
        .into_iter()
        .find(|t| t.action == step.action && t.dest == step.dest_state)
        .map(|t| t.id)
        .ok_or_else(|| EngineError::InvariantViolation {
            reason: "observed transition missing from graph".to_string(),
        })
}
