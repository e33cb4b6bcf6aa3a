use proptest::prelude::*;
use std::collections::HashSet;

use bench_core::{PanelId, SessionId};
use layout_tree::{Direction, Leaf, MIN_PANE_FRACTION, PanelNode, Split, reconcile};

// --- Generators ---

fn arb_session() -> impl Strategy<Value = SessionId> {
    (0u8..10).prop_map(|n| SessionId::new(format!("s{n}")))
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Horizontal), Just(Direction::Vertical)]
}

/// Persisted trees as they might come off disk: dead ids, duplicate tabs,
/// empty leaves, one-child splits, bad sizes and stale active tabs.
fn arb_tree() -> impl Strategy<Value = PanelNode> {
    let leaf = (
        prop::collection::vec(arb_session(), 0..4),
        prop::option::of(arb_session()),
    )
        .prop_map(|(tabs, active_tab)| {
            PanelNode::Leaf(Leaf {
                id: PanelId::generate(),
                tabs,
                active_tab,
            })
        });
    leaf.prop_recursive(3, 24, 4, |inner| {
        (
            arb_direction(),
            prop::collection::vec(inner, 0..4),
            prop::collection::vec(-1.0f64..4.0, 0..5),
        )
            .prop_map(|(direction, children, sizes)| {
                PanelNode::Split(Split {
                    id: PanelId::generate(),
                    direction,
                    children,
                    sizes,
                })
            })
    })
}

fn arb_live() -> impl Strategy<Value = Vec<SessionId>> {
    prop::collection::vec(arb_session(), 0..8)
}

fn unique(ids: &[SessionId]) -> HashSet<SessionId> {
    ids.iter().cloned().collect()
}

/// Structural fingerprint ignoring panel ids.
fn shape(node: &PanelNode) -> String {
    match node {
        PanelNode::Leaf(leaf) => format!("leaf{:?}@{:?}", leaf.tabs, leaf.active_tab),
        PanelNode::Split(split) => {
            let children: Vec<_> = split.children.iter().map(shape).collect();
            format!("{:?}{:?}[{}]", split.direction, split.sizes, children.join(","))
        }
    }
}

fn well_formed(node: &PanelNode) -> bool {
    match node {
        PanelNode::Leaf(leaf) => {
            !leaf.tabs.is_empty()
                && leaf
                    .active_tab
                    .as_ref()
                    .is_none_or(|active| leaf.tabs.contains(active))
        }
        PanelNode::Split(split) => {
            split.children.len() >= 2
                && split.sizes.len() == split.children.len()
                && split.sizes.iter().all(|s| s.is_finite() && *s > 0.0)
                && split.children.iter().all(well_formed)
        }
    }
}

// --- Reconciliation ---

proptest! {
    #[test]
    fn reconcile_idempotent(tree in prop::option::of(arb_tree()), live in arb_live()) {
        let once = reconcile(tree.as_ref(), &live);
        let twice = reconcile(once.as_ref(), &live);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn reconcile_places_every_live_session_exactly_once(
        tree in prop::option::of(arb_tree()),
        live in arb_live(),
    ) {
        let out = reconcile(tree.as_ref(), &live);
        let placed = out.as_ref().map(PanelNode::session_ids).unwrap_or_default();

        let placed_set: HashSet<_> = placed.iter().cloned().collect();
        prop_assert_eq!(placed.len(), placed_set.len());
        prop_assert_eq!(placed_set, unique(&live));
    }

    #[test]
    fn reconcile_output_is_well_formed(tree in arb_tree(), live in arb_live()) {
        if let Some(out) = reconcile(Some(&tree), &live) {
            prop_assert!(well_formed(&out));
        }
    }

    #[test]
    fn reconcile_keeps_surviving_order(tree in arb_tree(), live in arb_live()) {
        let live_set = unique(&live);
        let mut expected = Vec::new();
        for id in tree.session_ids() {
            if live_set.contains(&id) && !expected.contains(&id) {
                expected.push(id);
            }
        }
        let out = reconcile(Some(&tree), &live).map(|t| t.session_ids()).unwrap_or_default();
        let survivors: Vec<_> = out.into_iter().filter(|id| expected.contains(id)).collect();
        prop_assert_eq!(survivors, expected);
    }
}

// --- Structural edits ---

proptest! {
    #[test]
    fn split_then_close_restores_shape(
        tree in arb_tree(),
        live in arb_live(),
        pick in any::<prop::sample::Index>(),
        direction in arb_direction(),
    ) {
        let Some(base) = reconcile(Some(&tree), &live) else {
            return Ok(());
        };
        let leaves = base.leaves();
        let target = leaves[pick.index(leaves.len())].id.clone();

        let fresh = SessionId::new("fresh");
        let split = base.split(&target, direction, fresh.clone()).unwrap();
        prop_assert_eq!(split.session_ids().len(), base.session_ids().len() + 1);
        prop_assert!(well_formed(&split));

        let closed = split.without_session(&fresh).unwrap();
        prop_assert_eq!(shape(&closed), shape(&base));
    }

    #[test]
    fn close_never_leaves_dangling_tabs(tree in arb_tree(), live in arb_live(), victim in arb_session()) {
        let Some(base) = reconcile(Some(&tree), &live) else {
            return Ok(());
        };
        match base.without_session(&victim) {
            Some(out) => {
                prop_assert!(!out.contains_session(&victim));
                prop_assert!(well_formed(&out));
                prop_assert_eq!(out.session_ids().len(), base.session_ids().len() - usize::from(base.contains_session(&victim)));
            }
            None => prop_assert_eq!(base.session_ids(), vec![victim]),
        }
    }

    #[test]
    fn divider_drag_preserves_total_and_minimum(
        sizes in prop::collection::vec(0.1f64..4.0, 2..5),
        pick in any::<prop::sample::Index>(),
        delta in -10.0f64..10.0,
    ) {
        let children = (0..sizes.len())
            .map(|i| PanelNode::single(SessionId::new(format!("s{i}"))))
            .collect();
        let tree = PanelNode::Split(Split {
            id: PanelId::new("root"),
            direction: Direction::Horizontal,
            children,
            sizes: sizes.clone(),
        });
        let index = pick.index(sizes.len() - 1);
        let PanelNode::Split(out) = tree.drag_divider(&PanelId::new("root"), index, delta).unwrap() else {
            panic!("expected split");
        };

        let before: f64 = sizes.iter().sum();
        let after: f64 = out.sizes.iter().sum();
        prop_assert!((before - after).abs() < 1e-9);

        let min = MIN_PANE_FRACTION * before;
        for i in [index, index + 1] {
            let was_ok = sizes[i] >= min;
            if was_ok {
                prop_assert!(out.sizes[i] >= min - 1e-9);
            }
        }
    }
}

// --- Scenarios ---

#[test]
fn two_pane_drag_stays_above_five_percent() {
    let tree = PanelNode::Split(Split {
        id: PanelId::new("root"),
        direction: Direction::Horizontal,
        children: vec![
            PanelNode::single(SessionId::new("a")),
            PanelNode::single(SessionId::new("b")),
        ],
        sizes: vec![1.0, 1.0],
    });
    for delta in [-3.0, -0.95, -0.5, 0.0, 0.5, 0.95, 3.0] {
        let PanelNode::Split(out) = tree.drag_divider(&PanelId::new("root"), 0, delta).unwrap() else {
            panic!("expected split");
        };
        let total: f64 = out.sizes.iter().sum();
        assert!((total - 2.0).abs() < 1e-9, "delta {delta}: total {total}");
        assert!(out.sizes.iter().all(|s| *s >= 0.1 - 1e-9), "delta {delta}: {:?}", out.sizes);
    }
}
