//! Edge kinds, lifecycle states and the transition table.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EdgeKind {
    /// Draft edge with a source and a free endpoint.
    #[default]
    Preview,
    /// Committed edge between two ports.
    Connection,
    /// Drag-in-progress visual, never stored by the manager.
    Temporary,
}

/// Lifecycle state of an edge. The first six states belong to previews (and temporary edges),
/// the last four to connections.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EdgeState {
    #[default]
    Interactive,
    Dragging,
    Connected,
    Hover,
    Pending,
    Invalid,

    Active,
    Inactive,
    Broken,
    Validating,
}

impl EdgeState {
    pub fn is_preview_state(self) -> bool {
        matches!(
            self,
            EdgeState::Interactive | EdgeState::Dragging | EdgeState::Connected | EdgeState::Hover | EdgeState::Pending | EdgeState::Invalid
        )
    }

    pub fn is_connection_state(self) -> bool {
        !self.is_preview_state()
    }

    /// States reachable in one step. `Connected -> Active` is the preview to connection handoff.
    pub fn successors(self) -> &'static [EdgeState] {
        use EdgeState::*;
        match self {
            Interactive => &[Dragging, Hover, Invalid],
            Dragging => &[Connected, Interactive, Invalid],
            Connected => &[Active],
            Hover => &[Interactive, Dragging],
            Pending => &[Interactive, Invalid],
            Invalid => &[],
            Active => &[Inactive, Broken],
            Inactive => &[Active, Broken],
            Broken => &[Active],
            Validating => &[Active, Broken],
        }
    }

    pub fn can_transition_to(
        self,
        to: EdgeState,
    ) -> bool {
        self.successors().contains(&to)
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    /// The legal steps from a preview state to `Connected`, or `None` when unreachable.
    pub fn path_to_connected(self) -> Option<&'static [EdgeState]> {
        use EdgeState::*;
        match self {
            Connected => Some(&[]),
            Dragging => Some(&[Connected]),
            Interactive | Hover => Some(&[Dragging, Connected]),
            Pending => Some(&[Interactive, Dragging, Connected]),
            _ => None,
        }
    }

    /// Default state for a freshly created edge of `kind`.
    pub fn initial_for(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Connection => EdgeState::Active,
            EdgeKind::Preview | EdgeKind::Temporary => EdgeState::Interactive,
        }
    }

    pub fn belongs_to(
        self,
        kind: EdgeKind,
    ) -> bool {
        match kind {
            EdgeKind::Connection => self.is_connection_state(),
            EdgeKind::Preview | EdgeKind::Temporary => self.is_preview_state(),
        }
    }
}

/// One recorded state change.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: EdgeState,
    pub to: EdgeState,
    pub at: i64,
}
