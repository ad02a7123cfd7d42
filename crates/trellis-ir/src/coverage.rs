use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::interaction::TracePosition;

/// One batch of coverage data from the instrumentation feed, tied to a
/// single executed interaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageUpdate {
    /// Interaction this update belongs to.
    pub position: Option<TracePosition>,
    /// Statement ids executed since the previous interaction.
    pub statements: HashSet<u64>,
    /// Method ids executed since the previous interaction.
    pub methods: HashSet<u64>,
    /// Subset of `methods` that the pre-analysis marked as modified in this
    /// app version.
    pub modified_methods: HashSet<u64>,
    /// Whether the feed considers this update complete.
    pub ready: bool,
}

impl CoverageUpdate {
    /// An empty update used when the feed times out (degraded mode).
    pub fn absent(position: TracePosition) -> Self {
        Self {
            position: Some(position),
            ready: false,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.methods.is_empty()
    }
}
