//! The model-engine loop.
//!
//! Ties the lower layers together: one batch of concrete interaction
//! processing runs classification → reduction → state/action/transition
//! update → refinement → implicit inference end-to-end behind a single
//! writer lock. Also home to trace replay (the pure window/state stack),
//! the refinement controller, implicit-transition inference, base-model
//! import, and the coverage-readiness gate.

pub mod base;
pub mod coverage_gate;
pub mod engine;
pub mod infer;
pub mod refine;
pub mod replay;

pub use base::{import_base_model, BaseEdge, ModelDump};
pub use coverage_gate::{CoverageGate, GateOutcome};
pub use engine::{EngineError, ModelEngine, ProcessReport};
pub use refine::{RefinementController, Resolution};
pub use replay::{TraceLog, TraceStep};
