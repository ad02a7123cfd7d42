//! Signature abstraction and abstract-state identity.
//!
//! One concrete snapshot passes through three layers here:
//! 1. The attribute abstractor reduces each widget to an attribute vector at
//!    the current granularity level (`signature`).
//! 2. The state reducer interns those vectors bottom-up into the window's
//!    signature arena and computes cardinalities (`reducer`).
//! 3. The state registry matches or creates the owning window and the
//!    abstract state, and seeds its actions (`registry`).
//!
//! Signatures and actions are arena-interned per window; only opaque handles
//! travel outside this crate.

pub mod action;
pub mod reducer;
pub mod registry;
pub mod signature;
pub mod state;

pub use action::{AbstractAction, ActionHandle, ActionTable};
pub use reducer::{Cardinality, Reduction, StateReducer};
pub use registry::{RebuildReport, RegistryError, StateRegistry, WindowDump, WindowRecord};
pub use signature::{
    AttributeVector, GranularityTable, Signature, SignatureArena, SignatureHandle,
};
pub use state::{AbstractState, ModelOrigin, StateFlags, StateId, StateKind};
