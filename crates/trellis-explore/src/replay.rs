use std::collections::HashMap;
use std::sync::Arc;

use trellis_graph::{coarse_state_summary, structural_similarity};
use trellis_ir::{Interaction, WindowId};
use trellis_model::{ActionHandle, StateId, StateRegistry};

/// One processed interaction with its resolved state identities.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub interaction: Interaction,
    pub action: ActionHandle,
    pub source_state: StateId,
    pub dest_state: StateId,
    pub source_window: WindowId,
    pub dest_window: WindowId,
}

/// The immutable interaction trace plus memoized window stacks.
///
/// The window stack at position i is a pure function of steps 0..i; it is
/// derived from the previous position's stack and cached, so no inference
/// pass can leave a half-updated stack behind.
#[derive(Debug, Default)]
pub struct TraceLog {
    steps: Vec<TraceStep>,
    stacks: HashMap<usize, Arc<Vec<WindowId>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: TraceStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// Window stack after the first `upto` steps.
    ///
    /// Entering a window already on the stack pops back to it (the user
    /// navigated back); entering a fresh window pushes it.
    pub fn window_stack(&mut self, upto: usize) -> Arc<Vec<WindowId>> {
        let upto = upto.min(self.steps.len());
        if let Some(cached) = self.stacks.get(&upto) {
            return Arc::clone(cached);
        }
        let stack = if upto == 0 {
            Arc::new(Vec::new())
        } else {
            let prev = self.window_stack(upto - 1);
            let step = &self.steps[upto - 1];
            let mut next: Vec<WindowId> = (*prev).clone();
            // The source window is on the stack before the step runs.
            if next.last() != Some(&step.source_window) {
                if let Some(pos) = next.iter().rposition(|&w| w == step.source_window) {
                    next.truncate(pos + 1);
                } else {
                    next.push(step.source_window);
                }
            }
            if next.last() != Some(&step.dest_window) {
                if let Some(pos) = next.iter().rposition(|&w| w == step.dest_window) {
                    next.truncate(pos + 1);
                } else {
                    next.push(step.dest_window);
                }
            }
            Arc::new(next)
        };
        self.stacks.insert(upto, Arc::clone(&stack));
        stack
    }

    /// The window visited before `current` according to the stack at
    /// position `upto`, skipping `excluded` windows (e.g. home).
    pub fn prior_window(
        &mut self,
        upto: usize,
        current: WindowId,
        excluded: &[WindowId],
    ) -> Option<WindowId> {
        let stack = self.window_stack(upto);
        let pos = stack.iter().rposition(|&w| w == current)?;
        stack[..pos]
            .iter()
            .rev()
            .find(|w| !excluded.contains(w))
            .copied()
    }

    /// Most recent state of `window` (looking backward from `upto`) whose
    /// coarse summary is similar to `target` at `threshold`.
    pub fn most_recent_similar_state(
        &self,
        upto: usize,
        window: WindowId,
        target: StateId,
        registry: &StateRegistry,
        threshold: f64,
    ) -> Option<StateId> {
        let target_state = registry.state(target).ok()?;
        let target_arena = registry.arena(target_state.window).ok()?;
        let target_summary = coarse_state_summary(target_state, target_arena);
        let arena = registry.arena(window).ok()?;
        let upto = upto.min(self.steps.len());
        for step in self.steps[..upto].iter().rev() {
            for &candidate in [step.dest_state, step.source_state].iter() {
                if candidate == target {
                    continue;
                }
                let Ok(state) = registry.state(candidate) else {
                    continue;
                };
                if state.window != window || state.obsolete {
                    continue;
                }
                let summary = coarse_state_summary(state, arena);
                if structural_similarity(&summary, &target_summary) >= threshold {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Most recent state of `window` satisfying `pred`, looking backward.
    pub fn most_recent_state_where<F>(
        &self,
        upto: usize,
        window: WindowId,
        registry: &StateRegistry,
        pred: F,
    ) -> Option<StateId>
    where
        F: Fn(&trellis_model::AbstractState) -> bool,
    {
        let upto = upto.min(self.steps.len());
        for step in self.steps[..upto].iter().rev() {
            for &candidate in [step.dest_state, step.source_state].iter() {
                if let Ok(state) = registry.state(candidate) {
                    if state.window == window && !state.obsolete && pred(state) {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    /// Guard discovery: the most recent prior visit to the destination's
    /// window that is structurally similar to the destination. If found, it
    /// becomes the memory guard disambiguating the transition.
    pub fn discover_guard(
        &self,
        upto: usize,
        dest: StateId,
        registry: &StateRegistry,
        threshold: f64,
    ) -> Option<StateId> {
        let window = registry.state(dest).ok()?.window;
        self.most_recent_similar_state(upto, window, dest, registry, threshold)
    }
}
