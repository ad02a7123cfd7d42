use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Identifier for a window owned by the model (static or synthesized).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(pub u32);

/// Static classification of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Activity,
    Dialog,
    Menu,
    Keyboard,
    HomeScreen,
    /// The app under test is no longer in the foreground.
    OutOfApp,
    /// No static candidate matched and no hint was available.
    Unknown,
}

/// One candidate window from the static pre-analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticWindow {
    /// Fully qualified activity/dialog class name.
    pub name: String,
    pub kind: WindowKind,
    /// Expected root dimensions (width, height), if known.
    pub dimensions: Option<(i32, i32)>,
    /// Resource ids the pre-analysis found declared in this window's layout.
    pub widget_inventory: HashSet<String>,
    /// Methods that construct this window (dialog builders, onCreate).
    /// Recent execution of one of these is strong matching evidence.
    pub constructor_methods: HashSet<u64>,
    /// Window names this window has declared transitions to.
    pub declared_targets: Vec<String>,
}

/// The static window-transition map produced by pre-analysis.
///
/// Used only to seed window matching and implicit edges — the engine must
/// work (by synthesizing windows) when it is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowTransitionMap {
    pub windows: Vec<StaticWindow>,
}

impl WindowTransitionMap {
    /// Candidates whose name matches the driver's hint exactly, else all.
    pub fn candidates(&self, hint: Option<&str>) -> Vec<&StaticWindow> {
        if let Some(hint) = hint {
            let exact: Vec<&StaticWindow> =
                self.windows.iter().filter(|w| w.name == hint).collect();
            if !exact.is_empty() {
                return exact;
            }
        }
        self.windows.iter().collect()
    }

    pub fn by_name(&self, name: &str) -> Option<&StaticWindow> {
        self.windows.iter().find(|w| w.name == name)
    }

    /// Declared targets of `name`, resolved to static windows.
    pub fn declared_successors(&self, name: &str) -> Vec<&StaticWindow> {
        self.by_name(name)
            .map(|w| {
                w.declared_targets
                    .iter()
                    .filter_map(|t| self.by_name(t))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn win(name: &str, targets: &[&str]) -> StaticWindow {
        StaticWindow {
            name: name.to_string(),
            kind: WindowKind::Activity,
            dimensions: None,
            widget_inventory: HashSet::new(),
            constructor_methods: HashSet::new(),
            declared_targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn hint_narrows_candidates() {
        let map = WindowTransitionMap {
            windows: vec![win("Main", &["Detail"]), win("Detail", &[])],
        };
        assert_eq!(map.candidates(Some("Main")).len(), 1);
        assert_eq!(map.candidates(None).len(), 2);
        assert_eq!(map.candidates(Some("Missing")).len(), 2);
    }

    #[test]
    fn declared_successors_resolve() {
        let map = WindowTransitionMap {
            windows: vec![win("Main", &["Detail", "Gone"]), win("Detail", &[])],
        };
        let succ = map.declared_successors("Main");
        assert_eq!(succ.len(), 1);
        assert_eq!(succ[0].name, "Detail");
    }
}
