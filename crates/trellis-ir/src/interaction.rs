use serde::{Deserialize, Serialize};

use crate::snapshot::{SnapshotId, WidgetId};

/// Swipe direction on a scrollable widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    /// The swipe that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            SwipeDirection::Up => SwipeDirection::Down,
            SwipeDirection::Down => SwipeDirection::Up,
            SwipeDirection::Left => SwipeDirection::Right,
            SwipeDirection::Right => SwipeDirection::Left,
        }
    }
}

/// Kind of an action the driver can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    LongClick,
    /// Click on a list/recycler item, addressed through the item container.
    ItemClick,
    ItemLongClick,
    /// Toggle a checkable widget.
    Tick,
    TextInsert,
    Swipe(SwipeDirection),
    RotateClockwise,
    RotateCounterClockwise,
    PressBack,
    PressMenu,
    CloseKeyboard,
    LaunchApp,
    ResetApp,
    /// Inter-window navigation declared by the static pre-analysis; the
    /// concrete trigger is unknown until observed.
    Intent,
}

impl ActionKind {
    /// Actions that navigate back toward a previously visited window.
    pub fn is_back_like(self) -> bool {
        matches!(self, ActionKind::PressBack)
    }

    /// Actions with a well-defined inverse that the engine can infer.
    pub fn inverse(self) -> Option<ActionKind> {
        match self {
            ActionKind::Swipe(d) => Some(ActionKind::Swipe(d.inverse())),
            ActionKind::RotateClockwise => Some(ActionKind::RotateCounterClockwise),
            ActionKind::RotateCounterClockwise => Some(ActionKind::RotateClockwise),
            _ => None,
        }
    }

    /// Actions that require a target widget.
    pub fn is_targeted(self) -> bool {
        !matches!(
            self,
            ActionKind::PressBack
                | ActionKind::PressMenu
                | ActionKind::CloseKeyboard
                | ActionKind::RotateClockwise
                | ActionKind::RotateCounterClockwise
                | ActionKind::LaunchApp
                | ActionKind::ResetApp
                | ActionKind::Intent
        )
    }
}

/// Position of an interaction in the exploration trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TracePosition {
    pub trace_id: u64,
    pub index: usize,
}

/// One concrete interaction as recorded by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub kind: ActionKind,
    pub target: Option<WidgetId>,
    /// Free-form payload — entered text, swipe distance, etc.
    pub payload: Option<String>,
    pub prev_snapshot: SnapshotId,
    pub result_snapshot: SnapshotId,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub position: TracePosition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swipe_inverse_is_involutive() {
        for d in [
            SwipeDirection::Up,
            SwipeDirection::Down,
            SwipeDirection::Left,
            SwipeDirection::Right,
        ] {
            assert_eq!(d.inverse().inverse(), d);
        }
    }

    #[test]
    fn rotation_actions_are_mutual_inverses() {
        assert_eq!(
            ActionKind::RotateClockwise.inverse(),
            Some(ActionKind::RotateCounterClockwise)
        );
        assert_eq!(
            ActionKind::RotateCounterClockwise.inverse(),
            Some(ActionKind::RotateClockwise)
        );
        assert_eq!(ActionKind::Click.inverse(), None);
    }

    #[test]
    fn untargeted_actions() {
        assert!(!ActionKind::PressBack.is_targeted());
        assert!(!ActionKind::Intent.is_targeted());
        assert!(ActionKind::Swipe(SwipeDirection::Up).is_targeted());
        assert!(ActionKind::Click.is_targeted());
    }
}
