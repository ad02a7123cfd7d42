use serde::{Deserialize, Serialize};

/// Engine configuration. Every empirically calibrated constant lives here
/// as a named, overridable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Structural similarity threshold for guard discovery, implicit-edge
    /// propagation, and replay de-duplication. Calibrated: 0.8.
    pub similarity_threshold: f64,
    /// Batches a soft-deactivated transition waits before reactivation.
    pub cooldown_batches: u32,
    /// Enablement-statistics weight for an explicitly observed edge.
    pub explicit_edge_bonus: u32,
    /// Enablement-statistics weight for an imported base-model edge.
    pub base_edge_bonus: u32,
    /// Ceiling on cumulative granularity escalation steps per widget class.
    pub granularity_ceiling: u8,
    /// How long to wait for the coverage feed before degrading to
    /// "no coverage observed" for the interaction.
    pub coverage_timeout_ms: u64,
    /// Minimum window-match score; below this a new dialog window is
    /// synthesized instead of reusing the best candidate.
    pub window_match_floor: f64,
    /// Initial meaningfulness score for a freshly interned action.
    pub initial_meaningfulness: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            cooldown_batches: 5,
            explicit_edge_bonus: 2,
            base_edge_bonus: 1,
            granularity_ceiling: 3,
            coverage_timeout_ms: 2_000,
            window_match_floor: 1.0,
            initial_meaningfulness: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_calibration() {
        let c = ModelConfig::default();
        assert!((c.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(c.explicit_edge_bonus, 2);
        assert_eq!(c.base_edge_bonus, 1);
        assert!(c.granularity_ceiling >= 1);
    }

    #[test]
    fn config_round_trips_through_json() {
        let c = ModelConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cooldown_batches, c.cooldown_batches);
    }
}
