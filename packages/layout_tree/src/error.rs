use bench_core::{PanelId, SessionId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LayoutError {
    #[error("panel not found: {0}")]
    PanelNotFound(PanelId),

    #[error("panel is not a leaf: {0}")]
    NotALeaf(PanelId),

    #[error("panel is not a split: {0}")]
    NotASplit(PanelId),

    #[error("session {session} is not a tab of panel {panel}")]
    TabNotInPanel { panel: PanelId, session: SessionId },

    #[error("expected {expected} sizes, got {got}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("sizes must be finite and positive")]
    InvalidSize,

    #[error("divider {index} out of range for panel {panel}")]
    DividerOutOfRange { panel: PanelId, index: usize },

    #[error("layout is empty")]
    Empty,
}
