use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

fn validate_tree<K, V, C: Comparator<K>>(t: &OrderedTree<K, V, C>) {
    if t.root.is_null() {
        assert_eq!(t.len, 0, "empty tree must have zero length");
        assert_eq!(t.nodes.live(), 0, "empty tree must hold no nodes");
        return;
    }

    assert!(
        t.nodes[t.root].parent.is_null(),
        "root must not have a parent"
    );

    let height = t.height();
    let cmp = &t.comparator;
    let mut entry_count = 0usize;
    let mut node_count = 0usize;

    // (node, depth, exclusive lower bound, exclusive upper bound)
    let mut stack: Vec<(NodeId, usize, Option<&K>, Option<&K>)> = vec![(t.root, 1, None, None)];
    while let Some((id, depth, lo, hi)) = stack.pop() {
        let node = &t.nodes[id];
        node_count += 1;
        entry_count += node.entries.len();

        assert!(
            node.entries.len() < t.branching_factor,
            "node holds {} entries, limit is {}",
            node.entries.len(),
            t.branching_factor - 1
        );

        for pair in node.entries.windows(2) {
            assert_eq!(
                cmp.compare(&pair[0].key, &pair[1].key),
                Ordering::Less,
                "entries must be strictly ascending"
            );
        }
        for entry in &node.entries {
            if let Some(lo) = lo {
                assert_eq!(cmp.compare(lo, &entry.key), Ordering::Less, "key below subtree bound");
            }
            if let Some(hi) = hi {
                assert_eq!(cmp.compare(&entry.key, hi), Ordering::Less, "key above subtree bound");
            }
        }

        if node.is_leaf() {
            assert_eq!(depth, height, "all leaves must share one depth");
            continue;
        }

        assert_eq!(
            node.children.len(),
            node.entries.len() + 1,
            "internal node must have one more child than entries"
        );
        for (i, &child) in node.children.iter().enumerate() {
            assert_eq!(t.nodes[child].parent, id, "child has a stale parent link");
            let child_lo = if i == 0 { lo } else { Some(&node.entries[i - 1].key) };
            let child_hi = node.entries.get(i).map(|e| &e.key).or(hi);
            stack.push((child, depth + 1, child_lo, child_hi));
        }
    }

    assert_eq!(entry_count, t.len, "reachable entries must match OrderedTree::len");
    assert_eq!(node_count, t.nodes.live(), "every live arena slot must be reachable");
}

fn dump_keys(t: &OrderedTree<u16, u64>) -> Vec<u16> {
    t.to_string()
        .lines()
        .map(|line| line.trim_start().parse().unwrap())
        .collect()
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 60)]
    Insert(#[proptest(strategy = "0u16..512")] u16, u64),
    #[proptest(weight = 37)]
    Get(#[proptest(strategy = "0u16..512")] u16),
    #[proptest(weight = 2)]
    Compact,
    #[proptest(weight = 1)]
    Clear,
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(
        branching_factor in 3usize..=8,
        ops in prop::collection::vec(any::<Op>(), 0..=2000),
    ) {
        let mut t: OrderedTree<u16, u64> = OrderedTree::new(branching_factor);
        let mut m: BTreeMap<u16, u64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let old_t = t.insert(key, value);
                    let old_m = m.insert(key, value);
                    prop_assert_eq!(old_t, old_m);
                }
                Op::Get(key) => {
                    prop_assert_eq!(t.get(&key), m.get(&key));
                    prop_assert_eq!(t.contains_key(&key), m.contains_key(&key));
                }
                Op::Compact => {
                    prop_assert_eq!(t.compact(), t.node_count());
                }
                Op::Clear => {
                    t.clear();
                    m.clear();
                }
            }

            prop_assert_eq!(t.len(), m.len());
            prop_assert_eq!(t.is_empty(), m.is_empty());
        }

        validate_tree(&t);
        let expected: Vec<u16> = m.keys().copied().collect();
        prop_assert_eq!(dump_keys(&t), expected);
        for (key, value) in &m {
            prop_assert_eq!(t.get(key), Some(value));
        }
    }

    #[test]
    fn prop_dump_indentation_tracks_depth(
        branching_factor in 3usize..=8,
        keys in prop::collection::vec(any::<i32>(), 0..=500),
    ) {
        let mut t: OrderedTree<i32, ()> = OrderedTree::new(branching_factor);
        for &k in &keys {
            t.insert(k, ());
        }
        validate_tree(&t);

        let height = t.height();
        let dump = t.to_string();
        let mut got = Vec::new();
        for line in dump.lines() {
            let key = line.trim_start();
            let indent = line.len() - key.len();
            prop_assert_eq!(indent % INDENT.len(), 0);
            prop_assert!(indent / INDENT.len() < height);
            got.push(key.parse::<i32>().unwrap());
        }

        let mut expected = keys;
        expected.sort_unstable();
        expected.dedup();
        prop_assert_eq!(got, expected);
    }
}

/// Calls `visit` once per ordering of `keys`, swapping in place (Heap's algorithm).
fn for_each_ordering(mut keys: Vec<u16>, mut visit: impl FnMut(&[u16])) {
    let mut swaps = vec![0usize; keys.len()];
    visit(&keys);

    let mut i = 1;
    while i < keys.len() {
        if swaps[i] < i {
            let j = if i % 2 == 0 { 0 } else { swaps[i] };
            keys.swap(j, i);
            visit(&keys);
            swaps[i] += 1;
            i = 1;
        } else {
            swaps[i] = 0;
            i += 1;
        }
    }
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<u16> = vec![10, 20, 30, 40, 50, 60, 70];

    for branching_factor in 2..=5 {
        let mut orderings = 0usize;
        for_each_ordering(keys.clone(), |order| {
            orderings += 1;
            let mut t: OrderedTree<u16, u64> = OrderedTree::new(branching_factor);
            let mut m: BTreeMap<u16, u64> = BTreeMap::new();

            for (i, &k) in order.iter().enumerate() {
                let v = i as u64;
                assert_eq!(t.insert(k, v), m.insert(k, v));
                validate_tree(&t);
            }

            assert_eq!(dump_keys(&t), keys);
            for (k, v) in &m {
                assert_eq!(t.get(k), Some(v));
            }
        });
        assert_eq!(orderings, 5040, "7 keys have 7! orderings");
    }
}

#[test]
fn overwrites_never_change_shape() {
    let mut t: OrderedTree<u16, u64> = OrderedTree::new(4);
    for k in 0..100 {
        t.insert(k, 0);
    }
    let shape = t.to_string();
    let nodes = t.node_count();

    for k in (0..100).rev() {
        assert_eq!(t.insert(k, u64::from(k)), Some(0));
    }
    validate_tree(&t);
    assert_eq!(t.len(), 100);
    assert_eq!(t.to_string(), shape);
    assert_eq!(t.node_count(), nodes);
}
