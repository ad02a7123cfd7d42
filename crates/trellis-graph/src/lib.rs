//! The abstract transition graph.
//!
//! A directed multigraph of abstract states labeled by interned actions.
//! Edges are explicit (backed by observed interactions) or implicit
//! (inferred); each edge carries a guard set of dependent states, an
//! activation status with cooldown, non-determinism bookkeeping, and
//! coverage evidence. Enablement statistics track how often exercising an
//! action unlocked previously unavailable actions in the destination.

pub mod graph;
pub mod similarity;
pub mod transition;

pub use graph::{EnablementStats, GraphError, InsertOutcome, TransitionGraph};
pub use similarity::{coarse_state_summary, structural_similarity};
pub use transition::{Transition, TransitionEvidence, TransitionId, TransitionStatus};
