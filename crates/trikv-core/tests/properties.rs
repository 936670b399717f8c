//! Property tests: the trie against a flat map model.
//!
//! Short keys drawn from a small alphabet make shallow tables collide often,
//! so terminal nodes routinely hold several entries and pruning has to stop
//! at shared ancestors.

use std::collections::HashMap;

use proptest::prelude::*;

use trikv_core::{Hashtable, NodeLocator, Subtree};

#[derive(Debug, Clone)]
enum Op {
    Set(String, String),
    Remove(String),
}

fn key() -> impl Strategy<Value = String> {
    "[a-d]{1,3}"
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (key(), "[a-z]{0,4}").prop_map(|(k, v)| Op::Set(k, v)),
        2 => key().prop_map(Op::Remove),
    ]
}

fn apply(tree: &mut Hashtable, model: &mut HashMap<String, String>, op: &Op) {
    match op {
        Op::Set(k, v) => {
            tree.set(k.clone(), v.clone());
            model.insert(k.clone(), v.clone());
        }
        Op::Remove(k) => {
            assert_eq!(tree.remove(k), model.remove(k));
        }
    }
}

proptest! {

    #[test]
    fn no_empty_nodes_after_any_sequence(path_length in 1u8..=4, ops in proptest::collection::vec(op(), 0..64)) {
        let mut tree = Hashtable::with_path_length(path_length).unwrap();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut tree, &mut model, op);
            prop_assert_eq!(tree.empty_nodes(), 0);
        }
    }

    #[test]
    fn matches_flat_map(path_length in 1u8..=4, ops in proptest::collection::vec(op(), 0..64)) {
        let mut tree = Hashtable::with_path_length(path_length).unwrap();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut tree, &mut model, op);
        }
        prop_assert_eq!(tree.len(), model.len());
        for (k, v) in &model {
            prop_assert_eq!(tree.get(k), Some(v.as_str()));
        }
        let mut stored: Vec<(String, String)> = tree.entries().map(|e| (e.key.clone(), e.value.clone())).collect();
        stored.sort();
        let mut expected: Vec<(String, String)> = model.into_iter().collect();
        expected.sort();
        prop_assert_eq!(stored, expected);
    }

    #[test]
    fn removing_everything_leaves_only_root(ops in proptest::collection::vec(op(), 0..64)) {
        let mut tree = Hashtable::new();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut tree, &mut model, op);
        }
        let keys: Vec<String> = model.keys().cloned().collect();
        for k in keys {
            tree.remove(&k);
        }
        prop_assert!(tree.is_empty());
        prop_assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn take_then_set_node_restores_tree(ops in proptest::collection::vec(op(), 1..48), anchor in key(), depth in 0u8..=4) {
        let mut tree = Hashtable::new();
        let mut model = HashMap::new();
        for op in &ops {
            apply(&mut tree, &mut model, op);
        }
        let locator = NodeLocator::for_key_at(&anchor, depth).unwrap();
        let before = tree.export_node(NodeLocator::for_key_at(&anchor, 0).unwrap());

        let taken = tree.remove_node(locator).unwrap_or_default();
        prop_assert_eq!(tree.empty_nodes(), 0);
        prop_assert_eq!(tree.len() + taken.len(), model.len());

        tree.set_node(locator, taken).unwrap();
        prop_assert_eq!(tree.export_node(NodeLocator::for_key_at(&anchor, 0).unwrap()), before);
        prop_assert_eq!(tree.empty_nodes(), 0);
    }
}

#[test]
fn empty_subtree_transplant_is_removal() {
    let mut tree = Hashtable::new();
    tree.set("solo", "1");
    let locator = tree.locate("solo");
    tree.set_node(locator, Subtree::new()).unwrap();
    assert_eq!(tree.get("solo"), None);
    assert_eq!(tree.node_count(), 1);
}
