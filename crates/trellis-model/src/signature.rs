use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use trellis_ir::{UiSnapshot, Widget, WindowId};

/// Opaque handle to an interned signature in one window's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignatureHandle(pub u32);

/// Local attribute vector of one widget at a given granularity level.
///
/// Level 1 uses only the widget's own attributes. Level 2 folds in a
/// summary of child structure and child text. Level 3 adds sibling context
/// for widgets embedded in scrollable containers, so list items with
/// identical local attributes can still be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeVector {
    pub class_name: String,
    pub resource_id: String,
    /// Entered text is transient for editable widgets, so it does not
    /// participate in identity for them.
    pub text: Option<String>,
    pub content_desc: Option<String>,
    pub clickable: bool,
    pub long_clickable: bool,
    pub scrollable: bool,
    pub checkable: bool,
    pub editable: bool,
    pub enabled: bool,
    pub password: bool,
    pub child_structure: Option<String>,
    pub child_text: Option<String>,
    pub sibling_context: Option<String>,
    pub level: u8,
}

impl AttributeVector {
    /// Coarse summary used for structural similarity: the identity-bearing
    /// attributes minus free text and the structure-sensitive summaries.
    pub fn coarse_summary(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        out.insert(format!("class:{}", self.class_name));
        if !self.resource_id.is_empty() {
            out.insert(format!("res:{}", self.resource_id));
        }
        if self.clickable {
            out.insert("clickable".to_string());
        }
        if self.long_clickable {
            out.insert("long_clickable".to_string());
        }
        if self.scrollable {
            out.insert("scrollable".to_string());
        }
        if self.checkable {
            out.insert("checkable".to_string());
        }
        if self.editable {
            out.insert("editable".to_string());
        }
        out
    }
}

/// Reduce one concrete widget to its attribute vector at `level`.
///
/// Levels are cumulative: each level keeps everything the previous one
/// recorded and adds more context.
pub fn abstract_widget(widget: &Widget, snapshot: &UiSnapshot, level: u8) -> AttributeVector {
    let text = if widget.editable || widget.text.is_empty() {
        None
    } else {
        Some(widget.text.clone())
    };
    let content_desc = if widget.content_desc.is_empty() {
        None
    } else {
        Some(widget.content_desc.clone())
    };

    let (child_structure, child_text) = if level >= 2 {
        summarize_children(widget, snapshot)
    } else {
        (None, None)
    };

    let sibling_context = if level >= 3 && snapshot.in_scrollable_container(&widget.id) {
        summarize_siblings(widget, snapshot)
    } else {
        None
    };

    AttributeVector {
        class_name: widget.class_name.clone(),
        resource_id: widget.resource_id.clone(),
        text,
        content_desc,
        clickable: widget.clickable,
        long_clickable: widget.long_clickable,
        scrollable: widget.scrollable,
        checkable: widget.checkable,
        editable: widget.editable,
        enabled: widget.enabled,
        password: widget.password,
        child_structure,
        child_text,
        sibling_context,
        level,
    }
}

fn summarize_children(
    widget: &Widget,
    snapshot: &UiSnapshot,
) -> (Option<String>, Option<String>) {
    let children = snapshot.children_of(&widget.id);
    if children.is_empty() {
        return (None, None);
    }
    let mut classes: Vec<&str> = children.iter().map(|c| c.class_name.as_str()).collect();
    classes.sort_unstable();
    let structure = Some(classes.join(";"));

    let mut texts: Vec<&str> = children
        .iter()
        .filter(|c| !c.editable && !c.text.is_empty())
        .map(|c| c.text.as_str())
        .collect();
    texts.sort_unstable();
    let text = if texts.is_empty() {
        None
    } else {
        Some(texts.join(";"))
    };
    (structure, text)
}

fn summarize_siblings(widget: &Widget, snapshot: &UiSnapshot) -> Option<String> {
    let parent = snapshot.parent_of(&widget.id)?;
    let mut entries: Vec<String> = snapshot
        .children_of(&parent.id)
        .iter()
        .filter(|s| s.id != widget.id)
        .map(|s| {
            if s.resource_id.is_empty() {
                s.class_name.clone()
            } else {
                s.resource_id.clone()
            }
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    entries.sort_unstable();
    Some(entries.join(";"))
}

/// An interned signature: local attributes plus the parent-chain link.
///
/// The structural hash folds the parent's hash with the local attributes,
/// so equal hashes imply equal attribute vectors along the whole chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub local: AttributeVector,
    pub parent: Option<SignatureHandle>,
    pub structural_hash: u64,
}

/// Per-window arena owning all interned signatures.
///
/// The structural hash is the sole equality key: two lookups with the same
/// hash always yield the same handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureArena {
    pub window: WindowId,
    signatures: Vec<Signature>,
    by_hash: HashMap<u64, SignatureHandle>,
}

impl SignatureArena {
    pub fn new(window: WindowId) -> Self {
        Self {
            window,
            signatures: Vec::new(),
            by_hash: HashMap::new(),
        }
    }

    /// Intern an attribute vector under a parent link, returning the handle
    /// of the existing signature with the same structural hash if present.
    pub fn intern(&mut self, local: AttributeVector, parent: Option<SignatureHandle>) -> SignatureHandle {
        let hash = self.structural_hash(&local, parent);
        if let Some(&handle) = self.by_hash.get(&hash) {
            return handle;
        }
        let handle = SignatureHandle(self.signatures.len() as u32);
        self.signatures.push(Signature {
            local,
            parent,
            structural_hash: hash,
        });
        self.by_hash.insert(hash, handle);
        handle
    }

    pub fn get(&self, handle: SignatureHandle) -> &Signature {
        &self.signatures[handle.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Walk the parent chain of `handle`, nearest first.
    pub fn parent_chain(&self, handle: SignatureHandle) -> Vec<SignatureHandle> {
        let mut out = Vec::new();
        let mut cursor = self.get(handle).parent;
        while let Some(h) = cursor {
            out.push(h);
            cursor = self.get(h).parent;
        }
        out
    }

    fn structural_hash(&self, local: &AttributeVector, parent: Option<SignatureHandle>) -> u64 {
        let mut hasher = DefaultHasher::new();
        if let Some(p) = parent {
            self.get(p).structural_hash.hash(&mut hasher);
        }
        local.hash(&mut hasher);
        hasher.finish()
    }
}

/// Per-(window, widget-class) granularity levels.
///
/// Escalation is global and monotonic: a level is never decreased, and the
/// cumulative escalation per class is bounded by the configured ceiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GranularityTable {
    levels: HashMap<(WindowId, String), u8>,
}

impl GranularityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level_for(&self, window: WindowId, class_name: &str) -> u8 {
        self.levels
            .get(&(window, class_name.to_string()))
            .copied()
            .unwrap_or(1)
    }

    /// Escalate the level for (window, class). Returns true if the level
    /// actually increased, false if the ceiling was already reached.
    pub fn escalate(&mut self, window: WindowId, class_name: &str, ceiling: u8) -> bool {
        let entry = self
            .levels
            .entry((window, class_name.to_string()))
            .or_insert(1);
        if *entry >= ceiling {
            return false;
        }
        *entry += 1;
        tracing::debug!(
            window = window.0,
            class = class_name,
            level = *entry,
            "granularity escalated"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_ir::{Rotation, SnapshotId, WidgetId};

    fn widget(id: &str, class: &str, text: &str) -> Widget {
        Widget {
            id: WidgetId::new(id),
            class_name: class.to_string(),
            resource_id: String::new(),
            text: text.to_string(),
            content_desc: String::new(),
            bounds: Default::default(),
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
            parent: None,
            children: Vec::new(),
        }
    }

    fn snap(widgets: Vec<Widget>) -> UiSnapshot {
        UiSnapshot::new(SnapshotId(0), None, Rotation::Deg0, widgets)
    }

    #[test]
    fn intern_dedups_by_structural_hash() {
        let s = snap(vec![widget("a", "Button", "OK")]);
        let mut arena = SignatureArena::new(WindowId(0));
        let v1 = abstract_widget(s.widget(&WidgetId::new("a")).unwrap(), &s, 1);
        let v2 = v1.clone();
        let h1 = arena.intern(v1, None);
        let h2 = arena.intern(v2, None);
        assert_eq!(h1, h2);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn parent_changes_identity() {
        let s = snap(vec![
            widget("p1", "Layout", ""),
            widget("p2", "Frame", ""),
            widget("c", "Button", "OK"),
        ]);
        let mut arena = SignatureArena::new(WindowId(0));
        let p1 = arena.intern(abstract_widget(s.widget(&WidgetId::new("p1")).unwrap(), &s, 1), None);
        let p2 = arena.intern(abstract_widget(s.widget(&WidgetId::new("p2")).unwrap(), &s, 1), None);
        let child = abstract_widget(s.widget(&WidgetId::new("c")).unwrap(), &s, 1);
        let under_p1 = arena.intern(child.clone(), Some(p1));
        let under_p2 = arena.intern(child, Some(p2));
        assert_ne!(under_p1, under_p2);
    }

    #[test]
    fn editable_text_excluded_from_identity() {
        let mut w1 = widget("e", "EditText", "hello");
        w1.editable = true;
        let mut w2 = widget("e", "EditText", "world");
        w2.editable = true;
        let s1 = snap(vec![w1]);
        let s2 = snap(vec![w2]);
        let v1 = abstract_widget(s1.widget(&WidgetId::new("e")).unwrap(), &s1, 1);
        let v2 = abstract_widget(s2.widget(&WidgetId::new("e")).unwrap(), &s2, 1);
        assert_eq!(v1, v2);
    }

    #[test]
    fn level_two_sees_children() {
        let mut parent = widget("p", "Layout", "");
        parent.children = vec![WidgetId::new("c")];
        let mut child = widget("c", "TextView", "row 1");
        child.parent = Some(WidgetId::new("p"));
        let s = snap(vec![parent, child]);

        let w = s.widget(&WidgetId::new("p")).unwrap();
        let v1 = abstract_widget(w, &s, 1);
        let v2 = abstract_widget(w, &s, 2);
        assert!(v1.child_structure.is_none());
        assert_eq!(v2.child_structure.as_deref(), Some("TextView"));
        assert_eq!(v2.child_text.as_deref(), Some("row 1"));
    }

    #[test]
    fn escalation_is_monotonic_and_capped() {
        let mut table = GranularityTable::new();
        let w = WindowId(3);
        assert_eq!(table.level_for(w, "Button"), 1);
        assert!(table.escalate(w, "Button", 3));
        assert!(table.escalate(w, "Button", 3));
        assert!(!table.escalate(w, "Button", 3));
        assert_eq!(table.level_for(w, "Button"), 3);
    }
}
