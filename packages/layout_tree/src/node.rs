use bench_core::{PanelId, SessionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Horizontal,
    Vertical,
}

/// Serialized as `{"id", "type": "leaf"|"split", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PanelNode {
    Leaf(Leaf),
    Split(Split),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaf {
    pub id: PanelId,
    #[serde(default)]
    pub tabs: Vec<SessionId>,
    #[serde(default)]
    pub active_tab: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub id: PanelId,
    pub direction: Direction,
    #[serde(default)]
    pub children: Vec<PanelNode>,
    /// Relative weights parallel to `children`.
    #[serde(default)]
    pub sizes: Vec<f64>,
}

impl Leaf {
    /// A fresh single-tab leaf with that tab active.
    pub fn single(session: SessionId) -> Self {
        Self {
            id: PanelId::generate(),
            tabs: vec![session.clone()],
            active_tab: Some(session),
        }
    }
}

impl PanelNode {
    pub fn single(session: SessionId) -> Self {
        PanelNode::Leaf(Leaf::single(session))
    }

    pub fn id(&self) -> &PanelId {
        match self {
            PanelNode::Leaf(leaf) => &leaf.id,
            PanelNode::Split(split) => &split.id,
        }
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            PanelNode::Leaf(leaf) => Some(leaf),
            PanelNode::Split(_) => None,
        }
    }

    /// First leaf in pre-order.
    pub fn first_leaf(&self) -> Option<&Leaf> {
        match self {
            PanelNode::Leaf(leaf) => Some(leaf),
            PanelNode::Split(split) => split.children.iter().find_map(PanelNode::first_leaf),
        }
    }

    pub fn find(&self, id: &PanelId) -> Option<&PanelNode> {
        if self.id() == id {
            return Some(self);
        }
        match self {
            PanelNode::Leaf(_) => None,
            PanelNode::Split(split) => split.children.iter().find_map(|c| c.find(id)),
        }
    }

    pub fn leaves(&self) -> Vec<&Leaf> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Leaf>) {
        match self {
            PanelNode::Leaf(leaf) => out.push(leaf),
            PanelNode::Split(split) => {
                for child in &split.children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    /// Every tab in pre-order, duplicates included.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.leaves()
            .into_iter()
            .flat_map(|leaf| leaf.tabs.iter().cloned())
            .collect()
    }

    pub fn contains_session(&self, session: &SessionId) -> bool {
        self.leaves().iter().any(|leaf| leaf.tabs.contains(session))
    }

    /// The leaf that holds `session` as a tab.
    pub fn leaf_of(&self, session: &SessionId) -> Option<&Leaf> {
        self.leaves()
            .into_iter()
            .find(|leaf| leaf.tabs.contains(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_persisted_layout() {
        let json = r#"{
            "id": "panel-root",
            "type": "split",
            "direction": "horizontal",
            "children": [
                {"id": "panel-a", "type": "leaf", "tabs": ["s1", "s2"], "activeTab": "s2"},
                {"id": "panel-b", "type": "leaf", "tabs": ["s3"], "activeTab": null}
            ],
            "sizes": [2, 1]
        }"#;
        let tree: PanelNode = serde_json::from_str(json).unwrap();

        let PanelNode::Split(split) = &tree else {
            panic!("expected split");
        };
        assert_eq!(split.direction, Direction::Horizontal);
        assert_eq!(split.sizes, vec![2.0, 1.0]);
        assert_eq!(tree.session_ids(), vec!["s1".into(), "s2".into(), "s3".into()]);
        assert_eq!(tree.first_leaf().unwrap().active_tab, Some("s2".into()));
        assert!(tree.find(&PanelId::new("panel-b")).is_some());
    }

    #[test]
    fn serializes_camel_case_with_type_tag() {
        let leaf = PanelNode::Leaf(Leaf {
            id: PanelId::new("panel-x"),
            tabs: vec!["s1".into()],
            active_tab: Some("s1".into()),
        });
        let v = serde_json::to_value(&leaf).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"id": "panel-x", "type": "leaf", "tabs": ["s1"], "activeTab": "s1"})
        );
    }

    #[test]
    fn leaf_of_finds_owner() {
        let tree = PanelNode::Split(Split {
            id: PanelId::new("root"),
            direction: Direction::Vertical,
            children: vec![
                PanelNode::Leaf(Leaf {
                    id: PanelId::new("top"),
                    tabs: vec!["a".into()],
                    active_tab: None,
                }),
                PanelNode::Leaf(Leaf {
                    id: PanelId::new("bottom"),
                    tabs: vec!["b".into()],
                    active_tab: None,
                }),
            ],
            sizes: vec![1.0, 1.0],
        });
        assert_eq!(tree.leaf_of(&"b".into()).unwrap().id, PanelId::new("bottom"));
        assert!(tree.leaf_of(&"c".into()).is_none());
    }
}
