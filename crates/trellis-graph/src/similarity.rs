use std::collections::BTreeSet;

use trellis_model::{AbstractState, SignatureArena};

/// Coarse attribute summary of a state: the union of its signatures'
/// coarse summaries. Free text and the structure-sensitive child/sibling
/// fields are excluded, so the summary is stable under content churn.
pub fn coarse_state_summary(state: &AbstractState, arena: &SignatureArena) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for &(handle, _) in &state.signatures {
        out.extend(arena.get(handle).local.coarse_summary());
    }
    out
}

/// Structural similarity of two coarse summaries.
///
/// similarity = 1 − |symmetric difference| / |union|; two states are
/// "similar at τ" when the result is ≥ τ. Empty-vs-empty counts as 1.0.
pub fn structural_similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    let sym_diff = a.symmetric_difference(b).count();
    1.0 - (sym_diff as f64 / union as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_sets_are_fully_similar() {
        let a = set(&["class:Button", "res:id/ok"]);
        assert!((structural_similarity(&a, &a) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn disjoint_sets_are_dissimilar() {
        let a = set(&["class:Button"]);
        let b = set(&["class:TextView"]);
        assert!(structural_similarity(&a, &b) < f64::EPSILON);
    }

    #[test]
    fn overlap_fraction_matches_definition() {
        // union = 5, sym diff = 2 -> 1 - 2/5 = 0.6
        let a = set(&["a", "b", "c", "d"]);
        let b = set(&["a", "b", "c", "e"]);
        assert!((structural_similarity(&a, &b) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn both_empty_counts_as_similar() {
        assert!((structural_similarity(&BTreeSet::new(), &BTreeSet::new()) - 1.0).abs()
            < f64::EPSILON);
    }
}
