//! External-interface data types for the trellis model engine.
//!
//! Everything the engine consumes from its collaborators lives here: concrete
//! UI snapshots produced by the device driver, interaction records, the
//! coverage-instrumentation feed, the static window-transition map from
//! pre-analysis, and the engine configuration. Pure data — no model logic.

pub mod config;
pub mod coverage;
pub mod interaction;
pub mod snapshot;
pub mod window;

pub use config::ModelConfig;
pub use coverage::CoverageUpdate;
pub use interaction::{ActionKind, Interaction, SwipeDirection, TracePosition};
pub use snapshot::{Rotation, SnapshotId, UiSnapshot, Widget, WidgetId};
pub use window::{StaticWindow, WindowId, WindowKind, WindowTransitionMap};
