use std::collections::BTreeSet;

use trellis_graph::{InsertOutcome, TransitionGraph, TransitionStatus};
use trellis_graph::transition::TransitionEvidence;
use trellis_ir::{TracePosition, WindowId};
use trellis_model::{ActionHandle, ModelOrigin, StateId};

fn evidence(index: usize) -> TransitionEvidence {
    TransitionEvidence {
        interactions: vec![TracePosition { trace_id: 1, index }],
        ..TransitionEvidence::default()
    }
}

fn graph() -> TransitionGraph {
    TransitionGraph::new(2, 1)
}

const W: WindowId = WindowId(0);
const A: ActionHandle = ActionHandle(0);

#[test]
fn repeat_observation_reuses_edge_and_merges_evidence() {
    let mut g = graph();
    let first = g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        BTreeSet::new(),
        evidence(0),
        ModelOrigin::Running,
    );
    let id = match first {
        InsertOutcome::Created(id) => id,
        other => panic!("expected Created, got {other:?}"),
    };
    let second = g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        BTreeSet::new(),
        evidence(1),
        ModelOrigin::Running,
    );
    assert!(matches!(second, InsertOutcome::Reused(i) if i == id));
    assert_eq!(g.get(id).unwrap().evidence.interactions.len(), 2);
    // Only the first insert counted toward enablement.
    assert_eq!(g.enablement().get(A, W), 2);
}

#[test]
fn different_destination_is_a_conflict() {
    let mut g = graph();
    g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        BTreeSet::new(),
        evidence(0),
        ModelOrigin::Running,
    );
    let outcome = g.record_explicit(
        StateId(1),
        StateId(3),
        A,
        W,
        BTreeSet::new(),
        evidence(1),
        ModelOrigin::Running,
    );
    match outcome {
        InsertOutcome::Conflict { siblings, .. } => assert_eq!(siblings.len(), 1),
        other => panic!("expected Conflict, got {other:?}"),
    }
}

#[test]
fn disjoint_guards_do_not_conflict() {
    let mut g = graph();
    let guard_a: BTreeSet<StateId> = [StateId(10)].into_iter().collect();
    let guard_b: BTreeSet<StateId> = [StateId(20)].into_iter().collect();
    g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        guard_a,
        evidence(0),
        ModelOrigin::Running,
    );
    let outcome = g.record_explicit(
        StateId(1),
        StateId(3),
        A,
        W,
        guard_b,
        evidence(1),
        ModelOrigin::Running,
    );
    assert!(matches!(outcome, InsertOutcome::Created(_)));
}

#[test]
fn explicit_observation_supersedes_contradicting_implicit() {
    let mut g = graph();
    let implicit = g
        .record_implicit(StateId(1), StateId(9), A, W, BTreeSet::new(), ModelOrigin::Running)
        .unwrap();
    assert_eq!(g.enablement().get(A, W), 1);

    g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        BTreeSet::new(),
        evidence(0),
        ModelOrigin::Running,
    );
    assert_eq!(g.get(implicit).unwrap().status, TransitionStatus::Removed);
    // Implicit weight (1) removed, explicit weight (2) added.
    assert_eq!(g.enablement().get(A, W), 2);
}

#[test]
fn implicit_never_contradicts_existing_explicit() {
    let mut g = graph();
    g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        BTreeSet::new(),
        evidence(0),
        ModelOrigin::Running,
    );
    let refused =
        g.record_implicit(StateId(1), StateId(3), A, W, BTreeSet::new(), ModelOrigin::Running);
    assert!(refused.is_none());
}

#[test]
fn implicit_promotion_upgrades_enablement_weight() {
    let mut g = graph();
    g.record_implicit(StateId(1), StateId(2), A, W, BTreeSet::new(), ModelOrigin::Base)
        .unwrap();
    assert_eq!(g.enablement().get(A, W), 1);
    let outcome = g.record_explicit(
        StateId(1),
        StateId(2),
        A,
        W,
        BTreeSet::new(),
        evidence(0),
        ModelOrigin::Running,
    );
    assert!(matches!(outcome, InsertOutcome::Reused(_)));
    assert_eq!(g.enablement().get(A, W), 2);
    assert!(g.get(outcome.transition_id()).unwrap().explicit);
}

#[test]
fn nondeterministic_set_keeps_most_recent_active() {
    let mut g = graph();
    let first = g
        .record_explicit(
            StateId(1),
            StateId(2),
            A,
            W,
            BTreeSet::new(),
            evidence(0),
            ModelOrigin::Running,
        )
        .transition_id();
    let second = g
        .record_explicit(
            StateId(1),
            StateId(3),
            A,
            W,
            BTreeSet::new(),
            evidence(5),
            ModelOrigin::Running,
        )
        .transition_id();

    g.mark_nondeterministic(&[first, second], 3);

    let t1 = g.get(first).unwrap();
    let t2 = g.get(second).unwrap();
    assert!(t1.nondeterministic && t2.nondeterministic);
    assert_eq!(t1.status, TransitionStatus::Cooling(3));
    assert_eq!(t2.status, TransitionStatus::Active);
}

#[test]
fn cooldown_reactivates_after_configured_batches() {
    let mut g = graph();
    let id = g
        .record_explicit(
            StateId(1),
            StateId(2),
            A,
            W,
            BTreeSet::new(),
            evidence(0),
            ModelOrigin::Running,
        )
        .transition_id();
    g.get_mut(id).unwrap().deactivate(2);
    g.advance_cooldowns();
    assert_eq!(g.get(id).unwrap().status, TransitionStatus::Cooling(1));
    g.advance_cooldowns();
    assert_eq!(g.get(id).unwrap().status, TransitionStatus::Active);
}

#[test]
fn retarget_remaps_sources_dests_and_guards() {
    let mut g = graph();
    let guard: BTreeSet<StateId> = [StateId(7)].into_iter().collect();
    let id = g
        .record_explicit(
            StateId(1),
            StateId(2),
            A,
            W,
            guard,
            evidence(0),
            ModelOrigin::Running,
        )
        .transition_id();

    let remap = [(StateId(1), StateId(100)), (StateId(7), StateId(700))]
        .into_iter()
        .collect();
    g.retarget(&remap);

    let t = g.get(id).unwrap();
    assert_eq!(t.source, StateId(100));
    assert_eq!(t.dest, StateId(2));
    assert!(t.dependent_states.contains(&StateId(700)));
    assert_eq!(g.outgoing(StateId(100)).len(), 1);
    assert!(g.outgoing(StateId(1)).is_empty());
}

#[test]
fn vertices_exclude_tombstones() {
    let mut g = graph();
    let id = g
        .record_implicit(StateId(1), StateId(2), A, W, BTreeSet::new(), ModelOrigin::Running)
        .unwrap();
    assert_eq!(g.vertices().len(), 2);
    g.remove(id).unwrap();
    assert!(g.vertices().is_empty());
    assert_eq!(g.enablement().get(A, W), 0);
}
