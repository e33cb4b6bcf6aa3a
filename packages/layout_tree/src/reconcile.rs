use bench_core::{PanelId, SessionId};
use std::collections::HashSet;
use tracing::debug;

use crate::{Leaf, PanelNode, Split};

/// Bring a persisted tree in line with the live session set.
///
/// Dead and duplicate tabs are removed, emptied panels pruned, malformed
/// sizes and active tabs repaired. Live sessions missing from the tree are
/// appended to the first leaf in pre-order, or become a fresh leaf if nothing
/// survived. `None` only when there are no live sessions.
pub fn reconcile(persisted: Option<&PanelNode>, live: &[SessionId]) -> Option<PanelNode> {
    let live_set: HashSet<&SessionId> = live.iter().collect();
    let mut pass = Pass {
        live: &live_set,
        placed: HashSet::new(),
        panel_ids: HashSet::new(),
    };
    let pruned = persisted.and_then(|tree| pass.prune(tree));

    let mut orphans = Vec::new();
    for id in live {
        if !pass.placed.contains(id) && !orphans.contains(id) {
            orphans.push(id.clone());
        }
    }
    if !orphans.is_empty() {
        debug!(count = orphans.len(), "placing sessions missing from layout");
    }

    match pruned {
        Some(tree) if orphans.is_empty() => Some(tree),
        Some(tree) => Some(append_to_first_leaf(&tree, orphans)),
        None if orphans.is_empty() => None,
        None => {
            let active_tab = orphans.first().cloned();
            Some(PanelNode::Leaf(Leaf {
                id: PanelId::generate(),
                tabs: orphans,
                active_tab,
            }))
        }
    }
}

struct Pass<'a> {
    live: &'a HashSet<&'a SessionId>,
    placed: HashSet<SessionId>,
    panel_ids: HashSet<PanelId>,
}

impl Pass<'_> {
    /// Duplicate panel ids get a fresh one so later lookups stay unambiguous.
    fn claim_id(&mut self, id: &PanelId) -> PanelId {
        if self.panel_ids.insert(id.clone()) {
            id.clone()
        } else {
            let fresh = PanelId::generate();
            self.panel_ids.insert(fresh.clone());
            fresh
        }
    }

    fn prune(&mut self, node: &PanelNode) -> Option<PanelNode> {
        match node {
            PanelNode::Leaf(leaf) => {
                let mut tabs = Vec::with_capacity(leaf.tabs.len());
                for tab in &leaf.tabs {
                    if self.live.contains(tab) && self.placed.insert(tab.clone()) {
                        tabs.push(tab.clone());
                    }
                }
                if tabs.is_empty() {
                    return None;
                }
                let active_tab = match &leaf.active_tab {
                    Some(active) if tabs.contains(active) => Some(active.clone()),
                    Some(_) => tabs.first().cloned(),
                    None => None,
                };
                Some(PanelNode::Leaf(Leaf {
                    id: self.claim_id(&leaf.id),
                    tabs,
                    active_tab,
                }))
            }
            PanelNode::Split(split) => {
                let id = self.claim_id(&split.id);
                let mut children = Vec::with_capacity(split.children.len());
                let mut sizes = Vec::with_capacity(split.children.len());
                for (i, child) in split.children.iter().enumerate() {
                    if let Some(child) = self.prune(child) {
                        children.push(child);
                        sizes.push(repair_size(split.sizes.get(i).copied()));
                    }
                }
                match children.len() {
                    0 => None,
                    1 => children.pop(),
                    _ => Some(PanelNode::Split(Split {
                        id,
                        direction: split.direction,
                        children,
                        sizes,
                    })),
                }
            }
        }
    }
}

fn repair_size(size: Option<f64>) -> f64 {
    match size {
        Some(s) if s.is_finite() && s > 0.0 => s,
        _ => 1.0,
    }
}

fn append_to_first_leaf(node: &PanelNode, orphans: Vec<SessionId>) -> PanelNode {
    match node {
        PanelNode::Leaf(leaf) => {
            let mut leaf = leaf.clone();
            if leaf.active_tab.is_none() {
                leaf.active_tab = orphans.first().cloned();
            }
            leaf.tabs.extend(orphans);
            PanelNode::Leaf(leaf)
        }
        PanelNode::Split(split) => {
            let mut split = split.clone();
            if let Some(first) = split.children.first_mut() {
                *first = append_to_first_leaf(first, orphans);
            }
            PanelNode::Split(split)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Direction;

    fn ids(list: &[&str]) -> Vec<SessionId> {
        list.iter().map(|s| SessionId::new(*s)).collect()
    }

    fn leaf(id: &str, tabs: &[&str], active: Option<&str>) -> PanelNode {
        PanelNode::Leaf(Leaf {
            id: PanelId::new(id),
            tabs: ids(tabs),
            active_tab: active.map(SessionId::new),
        })
    }

    #[test]
    fn dead_active_tab_is_reassigned() {
        let tree = leaf("main", &["A", "B", "C"], Some("B"));
        let out = reconcile(Some(&tree), &ids(&["A", "C"])).unwrap();
        assert_eq!(out, leaf("main", &["A", "C"], Some("A")));
    }

    #[test]
    fn orphans_join_first_leaf() {
        let tree = PanelNode::Split(Split {
            id: PanelId::new("root"),
            direction: Direction::Horizontal,
            children: vec![leaf("l", &["A"], None), leaf("r", &["B"], Some("B"))],
            sizes: vec![1.0, 1.0],
        });
        let out = reconcile(Some(&tree), &ids(&["A", "B", "C", "D"])).unwrap();
        let first = out.first_leaf().unwrap();
        assert_eq!(first.tabs, ids(&["A", "C", "D"]));
        // leaf had no active tab, so the first orphan takes it
        assert_eq!(first.active_tab, Some("C".into()));
    }

    #[test]
    fn orphans_do_not_steal_focus() {
        let tree = leaf("main", &["A"], Some("A"));
        let out = reconcile(Some(&tree), &ids(&["A", "B"])).unwrap();
        assert_eq!(out, leaf("main", &["A", "B"], Some("A")));
    }

    #[test]
    fn empty_tree_synthesizes_leaf() {
        let out = reconcile(None, &ids(&["A", "B"])).unwrap();
        assert_eq!(out.first_leaf().unwrap().tabs, ids(&["A", "B"]));
        assert_eq!(out.first_leaf().unwrap().active_tab, Some("A".into()));

        assert_eq!(reconcile(None, &[]), None);
        let dead = leaf("main", &["X"], Some("X"));
        assert_eq!(reconcile(Some(&dead), &[]), None);
    }

    #[test]
    fn malformed_splits_are_repaired() {
        let tree = PanelNode::Split(Split {
            id: PanelId::new("root"),
            direction: Direction::Vertical,
            children: vec![
                leaf("a", &["A", "A"], Some("A")),
                leaf("b", &["B", "A"], None),
                leaf("c", &["C"], Some("gone")),
            ],
            sizes: vec![-1.0],
        });
        let out = reconcile(Some(&tree), &ids(&["A", "B", "C"])).unwrap();
        let PanelNode::Split(split) = &out else {
            panic!("expected split");
        };
        assert_eq!(split.sizes, vec![1.0, 1.0, 1.0]);
        assert_eq!(out.session_ids(), ids(&["A", "B", "C"]));
        assert_eq!(out.leaf_of(&"C".into()).unwrap().active_tab, Some("C".into()));
    }

    #[test]
    fn single_child_split_collapses() {
        let tree = PanelNode::Split(Split {
            id: PanelId::new("root"),
            direction: Direction::Vertical,
            children: vec![leaf("a", &["A"], Some("A")), leaf("b", &["B"], Some("B"))],
            sizes: vec![1.0, 1.0],
        });
        let out = reconcile(Some(&tree), &ids(&["B"])).unwrap();
        assert_eq!(out, leaf("b", &["B"], Some("B")));
    }

    #[test]
    fn duplicate_panel_ids_are_rekeyed() {
        let tree = PanelNode::Split(Split {
            id: PanelId::new("dup"),
            direction: Direction::Vertical,
            children: vec![leaf("dup", &["A"], Some("A")), leaf("x", &["B"], Some("B"))],
            sizes: vec![1.0, 1.0],
        });
        let out = reconcile(Some(&tree), &ids(&["A", "B"])).unwrap();
        let PanelNode::Split(split) = &out else {
            panic!("expected split");
        };
        assert_eq!(split.id, PanelId::new("dup"));
        assert_ne!(split.children[0].id(), &PanelId::new("dup"));
    }
}
