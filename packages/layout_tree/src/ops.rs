use bench_core::{PanelId, SessionId};

use crate::{Direction, LayoutError, Leaf, PanelNode, Split};

/// No pane may be dragged below this share of its split's total ratio.
pub const MIN_PANE_FRACTION: f64 = 0.05;

impl PanelNode {
    /// Clone the tree with the node `target` replaced by `f(node)`.
    fn replace_node<F>(&self, target: &PanelId, f: F) -> Result<PanelNode, LayoutError>
    where
        F: FnOnce(&PanelNode) -> Result<PanelNode, LayoutError>,
    {
        let mut f = Some(f);
        self.replace_inner(target, &mut f)?
            .ok_or_else(|| LayoutError::PanelNotFound(target.clone()))
    }

    fn replace_inner<F>(
        &self,
        target: &PanelId,
        f: &mut Option<F>,
    ) -> Result<Option<PanelNode>, LayoutError>
    where
        F: FnOnce(&PanelNode) -> Result<PanelNode, LayoutError>,
    {
        if self.id() == target {
            return match f.take() {
                Some(f) => f(self).map(Some),
                None => Ok(None),
            };
        }
        let PanelNode::Split(split) = self else {
            return Ok(None);
        };
        for (i, child) in split.children.iter().enumerate() {
            if let Some(replaced) = child.replace_inner(target, f)? {
                let mut split = split.clone();
                split.children[i] = replaced;
                return Ok(Some(PanelNode::Split(split)));
            }
        }
        Ok(None)
    }

    fn replace_leaf<F>(&self, target: &PanelId, f: F) -> Result<PanelNode, LayoutError>
    where
        F: FnOnce(&Leaf) -> Result<PanelNode, LayoutError>,
    {
        self.replace_node(target, |node| match node {
            PanelNode::Leaf(leaf) => f(leaf),
            PanelNode::Split(_) => Err(LayoutError::NotALeaf(target.clone())),
        })
    }

    fn replace_split<F>(&self, target: &PanelId, f: F) -> Result<PanelNode, LayoutError>
    where
        F: FnOnce(&Split) -> Result<PanelNode, LayoutError>,
    {
        self.replace_node(target, |node| match node {
            PanelNode::Split(split) => f(split),
            PanelNode::Leaf(_) => Err(LayoutError::NotASplit(target.clone())),
        })
    }

    /// Append `session` as the active tab of `panel`, or of the first leaf
    /// when no panel is given.
    pub fn with_tab(
        &self,
        panel: Option<&PanelId>,
        session: SessionId,
    ) -> Result<PanelNode, LayoutError> {
        let target = match panel {
            Some(id) => id.clone(),
            None => self.first_leaf().ok_or(LayoutError::Empty)?.id.clone(),
        };
        self.replace_leaf(&target, |leaf| {
            let mut leaf = leaf.clone();
            if !leaf.tabs.contains(&session) {
                leaf.tabs.push(session.clone());
            }
            leaf.active_tab = Some(session);
            Ok(PanelNode::Leaf(leaf))
        })
    }

    /// Turn leaf `panel` into a split of its old contents and a new leaf
    /// holding only `session`. The split keeps the panel's id.
    pub fn split(
        &self,
        panel: &PanelId,
        direction: Direction,
        session: SessionId,
    ) -> Result<PanelNode, LayoutError> {
        self.replace_leaf(panel, |leaf| {
            let existing = Leaf {
                id: PanelId::generate(),
                ..leaf.clone()
            };
            Ok(PanelNode::Split(Split {
                id: leaf.id.clone(),
                direction,
                children: vec![PanelNode::Leaf(existing), PanelNode::single(session)],
                sizes: vec![1.0, 1.0],
            }))
        })
    }

    /// Remove `session` everywhere. Empty leaves are pruned and splits left
    /// with one child collapse into it; `None` when nothing remains.
    pub fn without_session(&self, session: &SessionId) -> Option<PanelNode> {
        match self {
            PanelNode::Leaf(leaf) => {
                let tabs: Vec<_> = leaf.tabs.iter().filter(|t| *t != session).cloned().collect();
                if tabs.is_empty() {
                    return None;
                }
                let active_tab = match &leaf.active_tab {
                    Some(active) if active == session => tabs.first().cloned(),
                    other => other.clone(),
                };
                Some(PanelNode::Leaf(Leaf {
                    id: leaf.id.clone(),
                    tabs,
                    active_tab,
                }))
            }
            PanelNode::Split(split) => {
                let mut children = Vec::with_capacity(split.children.len());
                let mut sizes = Vec::with_capacity(split.children.len());
                for (i, child) in split.children.iter().enumerate() {
                    if let Some(child) = child.without_session(session) {
                        children.push(child);
                        sizes.push(split.sizes.get(i).copied().unwrap_or(1.0));
                    }
                }
                match children.len() {
                    0 => None,
                    1 => children.pop(),
                    _ => Some(PanelNode::Split(Split {
                        id: split.id.clone(),
                        direction: split.direction,
                        children,
                        sizes,
                    })),
                }
            }
        }
    }

    pub fn activate(&self, panel: &PanelId, session: &SessionId) -> Result<PanelNode, LayoutError> {
        self.replace_leaf(panel, |leaf| {
            if !leaf.tabs.contains(session) {
                return Err(LayoutError::TabNotInPanel {
                    panel: leaf.id.clone(),
                    session: session.clone(),
                });
            }
            Ok(PanelNode::Leaf(Leaf {
                active_tab: Some(session.clone()),
                ..leaf.clone()
            }))
        })
    }

    pub fn with_sizes(&self, panel: &PanelId, sizes: Vec<f64>) -> Result<PanelNode, LayoutError> {
        if sizes.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(LayoutError::InvalidSize);
        }
        self.replace_split(panel, |split| {
            if sizes.len() != split.children.len() {
                return Err(LayoutError::SizeMismatch {
                    expected: split.children.len(),
                    got: sizes.len(),
                });
            }
            Ok(PanelNode::Split(Split {
                sizes,
                ..split.clone()
            }))
        })
    }

    /// Move divider `index` (between children `index` and `index + 1`) by
    /// `ratio_delta`. The move is clamped so neither neighbour drops below
    /// [`MIN_PANE_FRACTION`] of the total; the total never changes.
    pub fn drag_divider(
        &self,
        panel: &PanelId,
        index: usize,
        ratio_delta: f64,
    ) -> Result<PanelNode, LayoutError> {
        self.replace_split(panel, |split| {
            if index + 1 >= split.sizes.len() || index + 1 >= split.children.len() {
                return Err(LayoutError::DividerOutOfRange {
                    panel: split.id.clone(),
                    index,
                });
            }
            let mut sizes = split.sizes.clone();
            let total: f64 = sizes.iter().sum();
            let min = MIN_PANE_FRACTION * total;
            let (a, b) = (sizes[index], sizes[index + 1]);

            let lo = min - a;
            let hi = b - min;
            let delta = if !ratio_delta.is_finite() || lo > hi {
                0.0
            } else {
                ratio_delta.clamp(lo, hi)
            };
            sizes[index] = a + delta;
            // keeps a + b exact under rounding
            sizes[index + 1] = (a + b) - sizes[index];

            Ok(PanelNode::Split(Split {
                sizes,
                ..split.clone()
            }))
        })
    }
}

/// Convert a pointer movement in pixels into a ratio delta for a split whose
/// ratios sum to `total_ratio` across `container_extent` pixels.
pub fn pixel_delta_to_ratio(pixel_delta: f64, container_extent: f64, total_ratio: f64) -> f64 {
    if container_extent <= 0.0 || !container_extent.is_finite() {
        return 0.0;
    }
    pixel_delta / container_extent * total_ratio
}
