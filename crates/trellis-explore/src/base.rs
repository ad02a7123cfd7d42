use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use trellis_graph::TransitionGraph;
use trellis_ir::WindowId;
use trellis_model::{AbstractState, ActionHandle, ModelOrigin, StateId, StateRegistry, WindowDump};

/// One edge of a serialized prior-version model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseEdge {
    pub source: StateId,
    pub dest: StateId,
    pub dest_window: WindowId,
    pub action: ActionHandle,
    pub guard: BTreeSet<StateId>,
}

/// A serialized model from a prior app version.
///
/// Windows travel with their interning tables: the signature and action
/// handles inside `states` and `edges` are indices into them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDump {
    pub windows: Vec<WindowDump>,
    pub states: Vec<AbstractState>,
    pub edges: Vec<BaseEdge>,
}

/// Merge a prior-version model at startup.
///
/// Imported states and edges are tagged `Base` and live alongside `Running`
/// ones; base edges enter as implicit so a contradicting explicit
/// observation in the current session supersedes them through the graph's
/// normal rules. Returns the number of edges adopted.
pub fn import_base_model(
    registry: &mut StateRegistry,
    graph: &mut TransitionGraph,
    dump: ModelDump,
) -> usize {
    for window in dump.windows {
        registry.import_window(window);
    }
    for state in dump.states {
        registry.import_state(state);
    }
    let mut adopted = 0;
    for edge in dump.edges {
        if graph
            .record_implicit(
                edge.source,
                edge.dest,
                edge.action,
                edge.dest_window,
                edge.guard,
                ModelOrigin::Base,
            )
            .is_some()
        {
            adopted += 1;
        }
    }
    tracing::debug!(edges = adopted, "base model imported");
    adopted
}
