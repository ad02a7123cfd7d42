use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use trellis_ir::{
    ActionKind, ModelConfig, Rotation, SnapshotId, StaticWindow, SwipeDirection, UiSnapshot,
    WindowId, WindowKind, WindowTransitionMap,
};

use crate::action::{ActionHandle, ActionTable};
use crate::reducer::{Reduction, StateReducer};
use crate::signature::{GranularityTable, SignatureArena, SignatureHandle};
use crate::state::{
    compute_state_id, AbstractState, ModelOrigin, StateFlags, StateId, StateKind,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Logic bug, not a data condition — aborts the current batch.
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("unknown state: {0:?}")]
    UnknownState(StateId),

    #[error("unknown window: {0:?}")]
    UnknownWindow(WindowId),

    #[error("snapshot {0:?} is not held by the registry")]
    SnapshotNotHeld(SnapshotId),
}

/// Snapshot classification, each with its own matching pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Classification {
    Home,
    Permission,
    Crashed,
    Normal,
}

/// A window known to the model — static or synthesized at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowRecord {
    pub id: WindowId,
    pub name: String,
    pub kind: WindowKind,
    pub dimensions: Option<(i32, i32)>,
    /// Batch ordinal of the most recent visit, for tie-breaking.
    pub last_visited: u64,
}

#[derive(Debug)]
struct WindowEntry {
    record: WindowRecord,
    arena: SignatureArena,
    actions: ActionTable,
}

/// One window's record and interning tables in exportable form. Signature
/// and action handles in an exported state only resolve against the window
/// dump they were interned in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowDump {
    pub record: WindowRecord,
    pub arena: SignatureArena,
    pub actions: ActionTable,
}

/// Result of a model rebuild after granularity escalation.
#[derive(Debug, Default)]
pub struct RebuildReport {
    /// Obsolete state → first replacement state produced by replay.
    pub remapped: HashMap<StateId, StateId>,
    /// Windows whose virtual states were invalidated.
    pub invalidated_virtuals: Vec<StateId>,
}

/// Owns every window, signature arena, action table, and abstract state.
///
/// `get_or_create` is the single entry point for turning a concrete
/// snapshot into a state identity; `rebuild_model` is the granularity-
/// escalation contract used by the refinement controller.
pub struct StateRegistry {
    config: ModelConfig,
    static_map: WindowTransitionMap,
    windows: Vec<WindowEntry>,
    granularity: GranularityTable,
    states: HashMap<StateId, AbstractState>,
    snapshot_cache: HashMap<SnapshotId, StateId>,
    /// Snapshots are retained so obsolete states can be replayed.
    held_snapshots: HashMap<SnapshotId, UiSnapshot>,
    virtual_states: HashMap<WindowId, StateId>,
    /// Forecast placeholder per window, destination of statically declared
    /// edges.
    predicted_states: HashMap<WindowId, StateId>,
    /// Bumped per window on rebuild so replacement virtual states get
    /// fresh identities instead of overwriting the invalidated one.
    virtual_generation: HashMap<WindowId, u32>,
    special_pool: HashMap<(u8, Rotation), StateId>,
    /// Method ids seen in recent coverage updates; evidence for dialog
    /// window matching.
    recent_methods: HashSet<u64>,
    batch_counter: u64,
}

impl StateRegistry {
    pub fn new(config: ModelConfig, static_map: WindowTransitionMap) -> Self {
        Self {
            config,
            static_map,
            windows: Vec::new(),
            granularity: GranularityTable::new(),
            states: HashMap::new(),
            snapshot_cache: HashMap::new(),
            held_snapshots: HashMap::new(),
            virtual_states: HashMap::new(),
            predicted_states: HashMap::new(),
            virtual_generation: HashMap::new(),
            special_pool: HashMap::new(),
            recent_methods: HashSet::new(),
            batch_counter: 0,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Feed recently executed method ids (window-match evidence).
    pub fn note_recent_methods(&mut self, methods: impl IntoIterator<Item = u64>) {
        self.recent_methods.clear();
        self.recent_methods.extend(methods);
    }

    pub fn begin_batch(&mut self) {
        self.batch_counter += 1;
    }

    // ---- state access -----------------------------------------------------

    pub fn state(&self, id: StateId) -> Result<&AbstractState, RegistryError> {
        self.states.get(&id).ok_or(RegistryError::UnknownState(id))
    }

    pub fn state_mut(&mut self, id: StateId) -> Result<&mut AbstractState, RegistryError> {
        self.states
            .get_mut(&id)
            .ok_or(RegistryError::UnknownState(id))
    }

    pub fn states(&self) -> impl Iterator<Item = &AbstractState> {
        self.states.values()
    }

    pub fn state_for_snapshot(&self, snapshot: SnapshotId) -> Option<StateId> {
        self.snapshot_cache.get(&snapshot).copied()
    }

    pub fn virtual_state(&self, window: WindowId) -> Option<StateId> {
        self.virtual_states.get(&window).copied()
    }

    pub fn predicted_state(&self, window: WindowId) -> Option<StateId> {
        self.predicted_states.get(&window).copied()
    }

    pub fn window(&self, id: WindowId) -> Option<&WindowRecord> {
        self.windows.get(id.0 as usize).map(|e| &e.record)
    }

    pub fn windows(&self) -> impl Iterator<Item = &WindowRecord> {
        self.windows.iter().map(|e| &e.record)
    }

    pub fn arena(&self, window: WindowId) -> Result<&SignatureArena, RegistryError> {
        self.windows
            .get(window.0 as usize)
            .map(|e| &e.arena)
            .ok_or(RegistryError::UnknownWindow(window))
    }

    pub fn actions(&self, window: WindowId) -> Result<&ActionTable, RegistryError> {
        self.windows
            .get(window.0 as usize)
            .map(|e| &e.actions)
            .ok_or(RegistryError::UnknownWindow(window))
    }

    pub fn actions_mut(&mut self, window: WindowId) -> Result<&mut ActionTable, RegistryError> {
        self.windows
            .get_mut(window.0 as usize)
            .map(|e| &mut e.actions)
            .ok_or(RegistryError::UnknownWindow(window))
    }

    pub fn static_map(&self) -> &WindowTransitionMap {
        &self.static_map
    }

    pub fn granularity(&self) -> &GranularityTable {
        &self.granularity
    }

    /// Escalate granularity for (window, class). Monotonic, ceiling-bounded.
    pub fn escalate_granularity(&mut self, window: WindowId, class_name: &str) -> bool {
        self.granularity
            .escalate(window, class_name, self.config.granularity_ceiling)
    }

    // ---- get_or_create ----------------------------------------------------

    /// Match or create the abstract state for a concrete snapshot.
    pub fn get_or_create(&mut self, snapshot: &UiSnapshot) -> Result<StateId, RegistryError> {
        if let Some(&id) = self.snapshot_cache.get(&snapshot.id) {
            return Ok(id);
        }
        self.get_or_create_uncached(snapshot)
    }

    fn get_or_create_uncached(&mut self, snapshot: &UiSnapshot) -> Result<StateId, RegistryError> {
        let class = classify(snapshot);
        let id = match class {
            Classification::Normal => self.create_normal(snapshot)?,
            special => self.create_special(snapshot, special),
        };
        self.snapshot_cache.insert(snapshot.id, id);
        self.held_snapshots.insert(snapshot.id, snapshot.clone());
        Ok(id)
    }

    /// Special classifications keep at most one state per (class, rotation).
    fn create_special(&mut self, snapshot: &UiSnapshot, class: Classification) -> StateId {
        let key = (class as u8, snapshot.rotation);
        if let Some(&id) = self.special_pool.get(&key) {
            if let Some(state) = self.states.get_mut(&id) {
                state.attach_snapshot(snapshot.id);
            }
            return id;
        }

        let (name, kind, flags) = match class {
            Classification::Home => (
                "home".to_string(),
                WindowKind::HomeScreen,
                StateFlags {
                    home_screen: true,
                    ..StateFlags::default()
                },
            ),
            Classification::Permission => (
                "permission_dialog".to_string(),
                WindowKind::Dialog,
                StateFlags {
                    permission_dialog: true,
                    ..StateFlags::default()
                },
            ),
            Classification::Crashed => (
                "crashed_dialog".to_string(),
                WindowKind::Dialog,
                StateFlags {
                    crashed_dialog: true,
                    ..StateFlags::default()
                },
            ),
            Classification::Normal => unreachable!("normal states use create_normal"),
        };
        let window = self.ensure_window(&name, kind);
        let id = special_state_id(window, snapshot.rotation, class as u8);
        let mut state = AbstractState {
            id,
            kind: StateKind::Concrete,
            origin: ModelOrigin::Running,
            window,
            rotation: snapshot.rotation,
            flags,
            signatures: Vec::new(),
            signature_of: HashMap::new(),
            snapshots: vec![snapshot.id],
            actions: Vec::new(),
            inputs: HashMap::new(),
            obsolete: false,
        };
        state.actions = self.seed_window_actions(window);
        self.states.insert(id, state);
        self.special_pool.insert(key, id);
        tracing::debug!(?id, class = ?class_name(class), "special state created");
        id
    }

    fn create_normal(&mut self, snapshot: &UiSnapshot) -> Result<StateId, RegistryError> {
        let window = self.match_window(snapshot);
        self.windows[window.0 as usize].record.last_visited = self.batch_counter;

        let entry = &mut self.windows[window.0 as usize];
        let reduction =
            StateReducer::reduce(snapshot, window, &mut entry.arena, &self.granularity);
        let pairs = reduction.identity_pairs(&entry.arena);
        let id = compute_state_id(&pairs, window, snapshot.rotation, snapshot.keyboard_open);

        if let Some(state) = self.states.get_mut(&id) {
            if !state.obsolete {
                state.attach_snapshot(snapshot.id);
                refresh_widget_map(state, &reduction);
                return Ok(id);
            }
        }

        let flags = StateFlags {
            keyboard_open: snapshot.keyboard_open,
            menu_open: self.windows[window.0 as usize].record.kind == WindowKind::Menu,
            out_of_app: self.windows[window.0 as usize].record.kind == WindowKind::OutOfApp,
            ..StateFlags::default()
        };
        let mut signatures: Vec<_> = reduction
            .cardinality
            .iter()
            .map(|(&h, &c)| (h, c))
            .collect();
        signatures.sort_unstable_by_key(|&(h, _)| h);

        let (actions, inputs) = self.seed_actions(window, &signatures);
        let mut state = AbstractState {
            id,
            kind: StateKind::Concrete,
            origin: ModelOrigin::Running,
            window,
            rotation: snapshot.rotation,
            flags,
            signatures,
            signature_of: HashMap::new(),
            snapshots: vec![snapshot.id],
            actions,
            inputs,
            obsolete: false,
        };
        refresh_widget_map(&mut state, &reduction);
        tracing::debug!(?id, window = window.0, "abstract state created");
        self.states.insert(id, state);
        Ok(id)
    }

    /// Adopt a state imported from a prior-version model. The state keeps
    /// its `Base` origin and joins matching as-is; existing states win on
    /// id collision (the running model is fresher).
    pub fn import_state(&mut self, mut state: AbstractState) {
        state.origin = ModelOrigin::Base;
        self.states.entry(state.id).or_insert(state);
    }

    /// Every window with its interning tables, for model export.
    pub fn export_windows(&self) -> Vec<WindowDump> {
        self.windows
            .iter()
            .map(|e| WindowDump {
                record: e.record.clone(),
                arena: e.arena.clone(),
                actions: e.actions.clone(),
            })
            .collect()
    }

    /// Adopt a window exported from a prior-version model, so imported
    /// states keep resolving their signature and action handles. Window ids
    /// are table indices; adoption only succeeds while the slot is still
    /// vacant and the name is unclaimed. Returns false when skipped.
    pub fn import_window(&mut self, dump: WindowDump) -> bool {
        let id = dump.record.id;
        if id.0 as usize != self.windows.len()
            || self.windows.iter().any(|e| e.record.name == dump.record.name)
        {
            tracing::warn!(window = id.0, name = %dump.record.name, "window import skipped");
            return false;
        }
        self.windows.push(WindowEntry {
            record: dump.record,
            arena: dump.arena,
            actions: dump.actions,
        });
        self.create_virtual_state(id);
        true
    }

    // ---- window matching --------------------------------------------------

    /// Score-based window matching; synthesizes a window when no candidate
    /// reaches the floor. Never fails.
    fn match_window(&mut self, snapshot: &UiSnapshot) -> WindowId {
        let hint = snapshot.window_hint.as_deref();
        // Static dimensions are declared portrait; compare against the
        // snapshot's orientation-corrected root.
        let root_dims = snapshot
            .widgets
            .iter()
            .find(|w| w.parent.is_none())
            .map(|w| (w.bounds.width, w.bounds.height))
            .map(|(w, h)| {
                if snapshot.rotation.is_landscape() {
                    (h, w)
                } else {
                    (w, h)
                }
            });

        let mut best: Option<(f64, WindowId)> = None;
        for entry in &self.windows {
            if !matches!(
                entry.record.kind,
                WindowKind::Activity | WindowKind::Dialog | WindowKind::Menu
            ) {
                continue;
            }
            let mut score = 0.0;
            if hint == Some(entry.record.name.as_str()) {
                score += 2.0;
            }
            if root_dims.is_some() && entry.record.dimensions == root_dims {
                score += 1.0;
            }
            if let Some(stat) = self.static_map.by_name(&entry.record.name) {
                if !stat.constructor_methods.is_disjoint(&self.recent_methods) {
                    score += 2.0;
                }
                if inventory_overlaps(stat, snapshot) {
                    score += 1.0;
                }
            }
            let better = match best {
                None => score > 0.0,
                Some((s, b)) => {
                    score > s
                        || (score == s
                            && entry.record.last_visited
                                > self.windows[b.0 as usize].record.last_visited)
                }
            };
            if better {
                best = Some((score, entry.record.id));
            }
        }

        if let Some((score, id)) = best {
            if score >= self.config.window_match_floor {
                return id;
            }
        }

        // No usable candidate: pull a static window in, or synthesize.
        if let Some(hint) = hint {
            let kind = self
                .static_map
                .by_name(hint)
                .map(|w| w.kind)
                .unwrap_or(WindowKind::Activity);
            let id = self.ensure_window(hint, kind);
            if let Some(stat) = self.static_map.by_name(hint) {
                self.windows[id.0 as usize].record.dimensions = stat.dimensions;
            }
            id
        } else if snapshot.widgets.is_empty() {
            self.ensure_window("out_of_app", WindowKind::OutOfApp)
        } else {
            // An unvisited static window can claim the snapshot through its
            // layout inventory.
            let claimed = self
                .static_map
                .candidates(hint)
                .into_iter()
                .find(|stat| inventory_overlaps(stat, snapshot))
                .map(|stat| (stat.name.clone(), stat.kind, stat.dimensions));
            if let Some((name, kind, dims)) = claimed {
                let id = self.ensure_window(&name, kind);
                self.windows[id.0 as usize].record.dimensions = dims;
                id
            } else {
                let name = format!("unknown_{}", self.windows.len());
                self.ensure_window(&name, WindowKind::Unknown)
            }
        }
    }

    /// Get or create the window record (with arena, action table, and a
    /// virtual placeholder state) for `name`.
    pub fn ensure_window(&mut self, name: &str, kind: WindowKind) -> WindowId {
        if let Some(entry) = self.windows.iter().find(|e| e.record.name == name) {
            return entry.record.id;
        }
        let id = WindowId(self.windows.len() as u32);
        self.windows.push(WindowEntry {
            record: WindowRecord {
                id,
                name: name.to_string(),
                kind,
                dimensions: None,
                last_visited: self.batch_counter,
            },
            arena: SignatureArena::new(id),
            actions: ActionTable::new(id),
        });
        self.create_virtual_state(id);
        tracing::debug!(window = id.0, name, ?kind, "window registered");
        id
    }

    fn create_virtual_state(&mut self, window: WindowId) {
        let generation = *self.virtual_generation.entry(window).or_insert(0);
        let id = virtual_state_id(window, generation);
        let actions = self.seed_window_actions(window);
        self.states.insert(
            id,
            AbstractState {
                id,
                kind: StateKind::Virtual,
                origin: ModelOrigin::Running,
                window,
                rotation: Rotation::Deg0,
                flags: StateFlags::default(),
                signatures: Vec::new(),
                signature_of: HashMap::new(),
                snapshots: Vec::new(),
                actions,
                inputs: HashMap::new(),
                obsolete: false,
            },
        );
        self.virtual_states.insert(window, id);
    }

    /// Get or create the forecast placeholder for a window — the
    /// destination of a statically declared edge before any visit.
    pub fn ensure_predicted_state(&mut self, window: WindowId) -> StateId {
        if let Some(&id) = self.predicted_states.get(&window) {
            return id;
        }
        let id = predicted_state_id(window);
        let actions = self.seed_window_actions(window);
        self.states.insert(
            id,
            AbstractState {
                id,
                kind: StateKind::Predicted,
                origin: ModelOrigin::Running,
                window,
                rotation: Rotation::Deg0,
                flags: StateFlags::default(),
                signatures: Vec::new(),
                signature_of: HashMap::new(),
                snapshots: Vec::new(),
                actions,
                inputs: HashMap::new(),
                obsolete: false,
            },
        );
        self.predicted_states.insert(window, id);
        id
    }

    // ---- action seeding ---------------------------------------------------

    /// Window-level actions available in every state of the window.
    fn seed_window_actions(&mut self, window: WindowId) -> Vec<ActionHandle> {
        let score = self.config.initial_meaningfulness;
        let table = &mut self.windows[window.0 as usize].actions;
        vec![
            table.get_or_create(ActionKind::PressBack, None, None, score),
            table.get_or_create(ActionKind::PressMenu, None, None, score),
            table.get_or_create(ActionKind::RotateClockwise, None, None, score),
        ]
    }

    /// Widget-level actions derived from the signature set.
    fn seed_actions(
        &mut self,
        window: WindowId,
        signatures: &[(SignatureHandle, crate::reducer::Cardinality)],
    ) -> (Vec<ActionHandle>, HashMap<ActionHandle, BTreeSet<String>>) {
        let score = self.config.initial_meaningfulness;
        let mut handles = self.seed_window_actions(window);
        let mut inputs: HashMap<ActionHandle, BTreeSet<String>> = HashMap::new();

        let entry = &mut self.windows[window.0 as usize];
        for &(sig, _) in signatures {
            let local = &entry.arena.get(sig).local;
            if !local.enabled {
                continue;
            }
            if local.clickable {
                handles.push(entry.actions.get_or_create(
                    ActionKind::Click,
                    Some(sig),
                    None,
                    score,
                ));
            }
            if local.long_clickable {
                handles.push(entry.actions.get_or_create(
                    ActionKind::LongClick,
                    Some(sig),
                    None,
                    score,
                ));
            }
            if local.checkable {
                handles.push(entry.actions.get_or_create(
                    ActionKind::Tick,
                    Some(sig),
                    None,
                    score,
                ));
            }
            if local.editable {
                let h = entry
                    .actions
                    .get_or_create(ActionKind::TextInsert, Some(sig), None, score);
                handles.push(h);
                inputs.entry(h).or_default();
            }
            if local.scrollable {
                for dir in [
                    SwipeDirection::Up,
                    SwipeDirection::Down,
                    SwipeDirection::Left,
                    SwipeDirection::Right,
                ] {
                    handles.push(entry.actions.get_or_create(
                        ActionKind::Swipe(dir),
                        Some(sig),
                        None,
                        score,
                    ));
                }
            }
        }
        handles.sort_unstable();
        handles.dedup();
        (handles, inputs)
    }

    // ---- rebuild ----------------------------------------------------------

    /// Invalidate and recompute every state of `window` affected by a
    /// granularity escalation of `affected`.
    ///
    /// Affected states are those whose signature set contains `affected` or
    /// any editable-text signature. Each of their held snapshots replays
    /// through state creation, forcing new identities at the finer level.
    pub fn rebuild_model(
        &mut self,
        window: WindowId,
        affected: SignatureHandle,
    ) -> Result<RebuildReport, RegistryError> {
        let mut report = RebuildReport::default();

        // Virtual states for the window are stale after escalation.
        if let Some(vid) = self.virtual_states.remove(&window) {
            if let Some(v) = self.states.get_mut(&vid) {
                v.obsolete = true;
            }
            report.invalidated_virtuals.push(vid);
        }
        *self.virtual_generation.entry(window).or_insert(0) += 1;
        self.create_virtual_state(window);

        let editable: HashSet<SignatureHandle> = {
            let arena = &self.windows[window.0 as usize].arena;
            (0..arena.len() as u32)
                .map(SignatureHandle)
                .filter(|&h| arena.get(h).local.editable)
                .collect()
        };

        let obsolete: Vec<StateId> = self
            .states
            .values()
            .filter(|s| {
                s.window == window
                    && s.is_concrete()
                    && !s.obsolete
                    && (s.has_signature(affected)
                        || s.signatures.iter().any(|(h, _)| editable.contains(h)))
            })
            .map(|s| s.id)
            .collect();

        for old_id in obsolete {
            let snapshots = {
                let state = self.state_mut(old_id)?;
                state.obsolete = true;
                state.snapshots.clone()
            };
            for snap_id in snapshots {
                let snapshot = self
                    .held_snapshots
                    .get(&snap_id)
                    .cloned()
                    .ok_or(RegistryError::SnapshotNotHeld(snap_id))?;
                self.snapshot_cache.remove(&snap_id);
                let new_id = self.get_or_create_uncached(&snapshot)?;
                report.remapped.entry(old_id).or_insert(new_id);
            }
        }
        tracing::debug!(
            window = window.0,
            remapped = report.remapped.len(),
            "model rebuilt after escalation"
        );
        Ok(report)
    }
}

fn refresh_widget_map(state: &mut AbstractState, reduction: &Reduction) {
    for (widget, &sig) in &reduction.by_widget {
        state.signature_of.insert(widget.clone(), sig);
    }
}

/// A snapshot claims a static window when any of its resource ids appears
/// in the window's declared layout inventory.
fn inventory_overlaps(stat: &StaticWindow, snapshot: &UiSnapshot) -> bool {
    !stat.widget_inventory.is_empty()
        && snapshot
            .widgets
            .iter()
            .any(|w| !w.resource_id.is_empty() && stat.widget_inventory.contains(&w.resource_id))
}

fn classify(snapshot: &UiSnapshot) -> Classification {
    if snapshot.is_home_screen {
        Classification::Home
    } else if snapshot.is_crashed_dialog {
        Classification::Crashed
    } else if snapshot.is_permission_dialog {
        Classification::Permission
    } else {
        Classification::Normal
    }
}

fn class_name(class: Classification) -> &'static str {
    match class {
        Classification::Home => "home",
        Classification::Permission => "permission",
        Classification::Crashed => "crashed",
        Classification::Normal => "normal",
    }
}

fn special_state_id(window: WindowId, rotation: Rotation, class: u8) -> StateId {
    let mut hasher = DefaultHasher::new();
    "special".hash(&mut hasher);
    window.hash(&mut hasher);
    (rotation as u8).hash(&mut hasher);
    class.hash(&mut hasher);
    StateId(hasher.finish())
}

fn virtual_state_id(window: WindowId, generation: u32) -> StateId {
    let mut hasher = DefaultHasher::new();
    "virtual".hash(&mut hasher);
    window.hash(&mut hasher);
    generation.hash(&mut hasher);
    StateId(hasher.finish())
}

fn predicted_state_id(window: WindowId) -> StateId {
    let mut hasher = DefaultHasher::new();
    "predicted".hash(&mut hasher);
    window.hash(&mut hasher);
    StateId(hasher.finish())
}
