use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Stable identifier for a concrete widget within a snapshot, assigned by
/// the device driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WidgetId(pub String);

impl WidgetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Identifier for one concrete UI snapshot, assigned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

/// Device rotation at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Rotation reached by turning a further 90 degrees clockwise.
    pub fn rotated_by_90(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    /// Rotation that undoes a clockwise 90-degree turn.
    pub fn rotated_back_90(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg270,
            Rotation::Deg90 => Rotation::Deg0,
            Rotation::Deg180 => Rotation::Deg90,
            Rotation::Deg270 => Rotation::Deg180,
        }
    }

    pub fn is_landscape(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Screen-coordinate bounds of a widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One concrete widget as reported by the UI driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub id: WidgetId,
    pub class_name: String,
    pub resource_id: String,
    pub text: String,
    pub content_desc: String,
    pub bounds: Bounds,
    pub clickable: bool,
    pub long_clickable: bool,
    pub scrollable: bool,
    pub checkable: bool,
    pub checked: bool,
    pub enabled: bool,
    /// True for text-entry widgets; their signatures are rebuilt eagerly
    /// during model rebuilds because entered text changes identity.
    pub editable: bool,
    pub password: bool,
    pub focused: bool,
    pub visible: bool,
    pub parent: Option<WidgetId>,
    pub children: Vec<WidgetId>,
}

impl Widget {
    /// A widget the user can act on directly.
    pub fn is_interactive(&self) -> bool {
        self.enabled
            && (self.clickable
                || self.long_clickable
                || self.scrollable
                || self.checkable
                || self.editable)
    }
}

/// One concrete UI snapshot: the widget forest plus capture context.
///
/// Widgets are ordered as delivered by the driver (document order). The
/// classification flags come from the driver's own heuristics and seed the
/// registry's special-state pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiSnapshot {
    pub id: SnapshotId,
    /// Activity or dialog class name hint from the driver, if any.
    pub window_hint: Option<String>,
    pub rotation: Rotation,
    pub keyboard_open: bool,
    pub is_home_screen: bool,
    pub is_permission_dialog: bool,
    pub is_crashed_dialog: bool,
    pub widgets: Vec<Widget>,
    #[serde(skip)]
    index: HashMap<WidgetId, usize>,
}

impl UiSnapshot {
    pub fn new(
        id: SnapshotId,
        window_hint: Option<String>,
        rotation: Rotation,
        widgets: Vec<Widget>,
    ) -> Self {
        let index = widgets
            .iter()
            .enumerate()
            .map(|(i, w)| (w.id.clone(), i))
            .collect();
        Self {
            id,
            window_hint,
            rotation,
            keyboard_open: false,
            is_home_screen: false,
            is_permission_dialog: false,
            is_crashed_dialog: false,
            widgets,
            index,
        }
    }

    /// Rebuild the id index after deserialization or widget mutation.
    pub fn reindex(&mut self) {
        self.index = self
            .widgets
            .iter()
            .enumerate()
            .map(|(i, w)| (w.id.clone(), i))
            .collect();
    }

    pub fn widget(&self, id: &WidgetId) -> Option<&Widget> {
        self.index.get(id).map(|&i| &self.widgets[i])
    }

    pub fn parent_of(&self, id: &WidgetId) -> Option<&Widget> {
        self.widget(id)
            .and_then(|w| w.parent.as_ref())
            .and_then(|p| self.widget(p))
    }

    pub fn children_of<'a>(&'a self, id: &WidgetId) -> Vec<&'a Widget> {
        self.widget(id)
            .map(|w| w.children.iter().filter_map(|c| self.widget(c)).collect())
            .unwrap_or_default()
    }

    /// Walk the ancestor chain of `id`, nearest first.
    pub fn ancestors_of<'a>(&'a self, id: &WidgetId) -> Vec<&'a Widget> {
        let mut out = Vec::new();
        let mut cursor = self.parent_of(id);
        while let Some(w) = cursor {
            out.push(w);
            cursor = self.parent_of(&w.id);
        }
        out
    }

    /// True if `id` or any ancestor is a scrollable container.
    pub fn in_scrollable_container(&self, id: &WidgetId) -> bool {
        self.ancestors_of(id).iter().any(|w| w.scrollable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str, parent: Option<&str>) -> Widget {
        Widget {
            id: WidgetId::new(id),
            class_name: "android.widget.TextView".to_string(),
            resource_id: String::new(),
            text: String::new(),
            content_desc: String::new(),
            bounds: Bounds::default(),
            clickable: false,
            long_clickable: false,
            scrollable: false,
            checkable: false,
            checked: false,
            enabled: true,
            editable: false,
            password: false,
            focused: false,
            visible: true,
            parent: parent.map(WidgetId::new),
            children: Vec::new(),
        }
    }

    #[test]
    fn rotation_round_trip() {
        for r in [
            Rotation::Deg0,
            Rotation::Deg90,
            Rotation::Deg180,
            Rotation::Deg270,
        ] {
            assert_eq!(r.rotated_by_90().rotated_back_90(), r);
        }
    }

    #[test]
    fn ancestor_walk_finds_scrollable() {
        let mut root = leaf("root", None);
        root.scrollable = true;
        root.children = vec![WidgetId::new("mid")];
        let mut mid = leaf("mid", Some("root"));
        mid.children = vec![WidgetId::new("item")];
        let item = leaf("item", Some("mid"));

        let snap = UiSnapshot::new(SnapshotId(1), None, Rotation::Deg0, vec![root, mid, item]);
        assert!(snap.in_scrollable_container(&WidgetId::new("item")));
        assert_eq!(snap.ancestors_of(&WidgetId::new("item")).len(), 2);
    }
}
