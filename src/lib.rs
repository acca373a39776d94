//! # ordtree
//!
//! An in-memory ordered map built as a multiway search tree with classic
//! B-tree insertion: a node that overflows splits around its middle entry and
//! promotes it into the parent, cascading toward the root, so every leaf stays
//! at the same depth.
//!
//! Nodes live in an index-based arena; parent links are indices, never owning
//! pointers. There is no removal, so nodes are never merged.
//!
//! ## Example
//!
//! ```rust
//! use ordtree::OrderedTree;
//!
//! let mut tree: OrderedTree<u32, &str> = OrderedTree::new(5);
//! tree.insert(1, "a");
//! tree.insert(2, "b");
//!
//! assert_eq!(tree.get(&1), Some(&"a"));
//! assert_eq!(tree.get(&3), None);
//! assert_eq!(tree.len(), 2);
//! assert_eq!(tree.height(), 1);
//! ```

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::ops::{Index, IndexMut};

use eyre::{ensure, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Smallest branching factor for which the split arithmetic is defined.
pub const MIN_BRANCHING_FACTOR: usize = 2;

pub const DEFAULT_BRANCHING_FACTOR: usize = 16;

const DEFAULT_INITIAL_CAPACITY: usize = 16;

/// Written once per level in front of every key by [`OrderedTree::print`].
const INDENT: &str = "  ";

/// Construction parameters for an [`OrderedTree`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of children of an internal node. Every node holds at
    /// most `branching_factor - 1` entries.
    pub branching_factor: usize,
    /// Number of node slots reserved up front.
    pub initial_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            branching_factor: DEFAULT_BRANCHING_FACTOR,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.branching_factor >= MIN_BRANCHING_FACTOR,
            "branching factor must be at least {}, got {}",
            MIN_BRANCHING_FACTOR,
            self.branching_factor
        );
        Ok(())
    }
}

// =============================================================================
// Key ordering
// =============================================================================

/// Three-way ordering of keys.
///
/// Must be a total order. `Ordering::Equal` means both arguments denote the
/// same key; an inconsistent comparator leaves the tree's shape unspecified.
pub trait Comparator<K: ?Sized> {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

impl<K: ?Sized, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}

// =============================================================================
// Capability interface
// =============================================================================

/// Introspection shared by tree containers.
pub trait Tree {
    fn is_empty(&self) -> bool;

    /// Number of distinct keys.
    fn len(&self) -> usize;

    /// Number of levels; 0 for an empty tree.
    fn height(&self) -> usize;

    /// Writes every key in ascending order, one per line, indented by depth.
    fn print(&self, out: &mut dyn io::Write) -> io::Result<()>;
}

// =============================================================================
// Node id
// =============================================================================

/// Index of a node slot in the arena.
///
/// `NULL` stands for "no node": the root of an empty tree and the parent of
/// the root.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct NodeId(u32);

impl NodeId {
    const NULL: NodeId = NodeId(u32::MAX);

    #[inline]
    fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// `None` once `index` no longer fits below `NULL`.
    #[inline]
    fn from_index(index: usize) -> Option<NodeId> {
        u32::try_from(index)
            .ok()
            .map(NodeId)
            .filter(|id| !id.is_null())
    }

    #[inline]
    fn index(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
}

#[derive(Clone)]
struct Node<K, V> {
    parent: NodeId,
    /// Strictly ascending by the tree's comparator.
    entries: Vec<Entry<K, V>>,
    /// Empty for leaves, `entries.len() + 1` ids otherwise.
    children: Vec<NodeId>,
}

impl<K, V> Node<K, V> {
    fn new(parent: NodeId, entries: Vec<Entry<K, V>>, children: Vec<NodeId>) -> Self {
        debug_assert!(children.is_empty() || children.len() == entries.len() + 1);
        Self {
            parent,
            entries,
            children,
        }
    }

    #[inline]
    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

impl<K, V> Default for Node<K, V> {
    fn default() -> Self {
        Self {
            parent: NodeId::NULL,
            entries: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Node storage with a free list of released slots.
#[derive(Clone)]
struct NodeArena<K, V> {
    nodes: Vec<Node<K, V>>,
    /// Slots left behind by split nodes, reused before the arena grows.
    free: Vec<NodeId>,
}

impl<K, V> NodeArena<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
        }
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(id) = self.free.pop() {
            self[id] = node;
            return id;
        }
        let Some(id) = NodeId::from_index(self.nodes.len()) else {
            panic!("node arena is full: at most {} nodes", NodeId::NULL.0);
        };
        self.nodes.push(node);
        id
    }

    /// Moves the node out of its slot and queues the slot for reuse.
    fn release(&mut self, id: NodeId) -> Node<K, V> {
        let node = self.take(id);
        self.free.push(id);
        node
    }

    fn take(&mut self, id: NodeId) -> Node<K, V> {
        std::mem::take(&mut self[id])
    }

    #[inline]
    fn live(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }

    fn capacity(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<Node<K, V>>()
            + self.free.capacity() * std::mem::size_of::<NodeId>()
            + self
                .nodes
                .iter()
                .map(|n| {
                    n.entries.capacity() * std::mem::size_of::<Entry<K, V>>()
                        + n.children.capacity() * std::mem::size_of::<NodeId>()
                })
                .sum::<usize>()
    }

    fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
        self.free.shrink_to_fit();
        for n in &mut self.nodes {
            n.entries.shrink_to_fit();
            n.children.shrink_to_fit();
        }
    }
}

impl<K, V> Index<NodeId> for NodeArena<K, V> {
    type Output = Node<K, V>;

    #[inline]
    fn index(&self, id: NodeId) -> &Node<K, V> {
        &self.nodes[id.index()]
    }
}

impl<K, V> IndexMut<NodeId> for NodeArena<K, V> {
    #[inline]
    fn index_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        &mut self.nodes[id.index()]
    }
}

// =============================================================================
// OrderedTree
// =============================================================================

/// An ordered map stored as a height-balanced multiway tree.
///
/// Each node holds up to `branching_factor - 1` entries. Insertion adds to a
/// leaf and splits any node that overflows, so the tree only grows at the
/// root and all leaves share one depth.
///
/// Not internally synchronized: mutation takes `&mut self`, and sharing
/// across threads needs an external lock around the whole tree.
///
/// Node ids are 32-bit, so a tree holds at most `u32::MAX - 1` nodes; an
/// insert that needs one more node panics.
#[derive(Clone)]
pub struct OrderedTree<K, V, C = NaturalOrder> {
    nodes: NodeArena<K, V>,
    root: NodeId,
    len: usize,
    branching_factor: usize,
    comparator: C,
}

impl<K: Ord, V> OrderedTree<K, V> {
    /// Creates an empty tree ordered by `K`'s [`Ord`] implementation.
    ///
    /// `branching_factor` must be at least [`MIN_BRANCHING_FACTOR`]. This is
    /// only checked in debug builds; use [`OrderedTree::with_config`] for a
    /// checked constructor.
    pub fn new(branching_factor: usize) -> Self {
        Self::with_comparator(branching_factor, NaturalOrder)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        Self::with_config_and_comparator(config, NaturalOrder)
    }
}

impl<K, V, C: Comparator<K>> OrderedTree<K, V, C> {
    /// Creates an empty tree ordered by `comparator`.
    pub fn with_comparator(branching_factor: usize, comparator: C) -> Self {
        debug_assert!(
            branching_factor >= MIN_BRANCHING_FACTOR,
            "branching factor {branching_factor} is below {MIN_BRANCHING_FACTOR}"
        );
        Self::build(branching_factor, 0, comparator)
    }

    pub fn with_config_and_comparator(config: Config, comparator: C) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(
            config.branching_factor,
            config.initial_capacity,
            comparator,
        ))
    }

    fn build(branching_factor: usize, initial_capacity: usize, comparator: C) -> Self {
        Self {
            nodes: NodeArena::with_capacity(initial_capacity),
            root: NodeId::NULL,
            len: 0,
            branching_factor,
            comparator,
        }
    }
}

impl<K, V, C> OrderedTree<K, V, C> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    /// Number of levels, counted down the leftmost spine.
    ///
    /// Every leaf sits at the same depth, so the leftmost path is as long as
    /// any other.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut current = self.root;
        while !current.is_null() {
            height += 1;
            current = self.nodes[current]
                .children
                .first()
                .copied()
                .unwrap_or(NodeId::NULL);
        }
        height
    }

    /// Drops every entry. Arena capacity is kept for reuse.
    pub fn clear(&mut self) {
        tracing::debug!(len = self.len, nodes = self.nodes.live(), "clearing tree");
        self.nodes.clear();
        self.root = NodeId::NULL;
        self.len = 0;
    }

    pub fn root(&self) -> Option<NodeRef<'_, K, V, C>> {
        (!self.root.is_null()).then(|| NodeRef {
            tree: self,
            id: self.root,
        })
    }

    /// Number of nodes reachable from the root.
    pub fn node_count(&self) -> usize {
        self.root().map_or(0, |root| root.node_count())
    }

    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    /// Rebuild live nodes into a fresh arena, level by level.
    ///
    /// Splits allocate halves wherever a slot is free, so after many inserts
    /// siblings end up scattered across the arena. Compaction stores the root
    /// first and each level contiguously. Keys, values and tree shape are
    /// unchanged. Returns the number of nodes rewritten.
    pub fn compact(&mut self) -> usize {
        if self.root.is_null() {
            return 0;
        }

        let live = self.nodes.live();
        let mut old = std::mem::replace(&mut self.nodes, NodeArena::with_capacity(live));
        let root = self.nodes.alloc(old.take(self.root));
        let mut queue = VecDeque::from([root]);

        while let Some(id) = queue.pop_front() {
            for i in 0..self.nodes[id].children.len() {
                let mut child = old.take(self.nodes[id].children[i]);
                child.parent = id;
                let child_id = self.nodes.alloc(child);
                self.nodes[id].children[i] = child_id;
                queue.push_back(child_id);
            }
        }

        self.root = root;
        let rewritten = self.nodes.live();
        tracing::debug!(nodes = rewritten, "compacted node arena");
        rewritten
    }

    /// Writes the sorted key dump (see [`Tree::print`]) to `out`.
    pub fn print<W: io::Write>(&self, mut out: W) -> io::Result<()>
    where
        K: fmt::Display,
    {
        write!(out, "{self}")
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result
    where
        K: fmt::Display,
    {
        let node = &self.nodes[id];
        for e in 0..=node.entries.len() {
            if let Some(&child) = node.children.get(e) {
                self.fmt_node(f, child, depth + 1)?;
            }
            if let Some(entry) = node.entries.get(e) {
                for _ in 0..depth {
                    f.write_str(INDENT)?;
                }
                writeln!(f, "{}", entry.key)?;
            }
        }
        Ok(())
    }

    fn for_each_in_order<'a>(&'a self, id: NodeId, visit: &mut impl FnMut(&'a K, &'a V)) {
        if id.is_null() {
            return;
        }
        let node = &self.nodes[id];
        for e in 0..=node.entries.len() {
            if let Some(&child) = node.children.get(e) {
                self.for_each_in_order(child, visit);
            }
            if let Some(entry) = node.entries.get(e) {
                visit(&entry.key, &entry.value);
            }
        }
    }
}

impl<K, V, C: Comparator<K>> OrderedTree<K, V, C> {
    pub fn get(&self, key: &K) -> Option<&V> {
        let (id, idx) = self.locate(key)?;
        Some(&self.nodes[id].entries[idx].value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.locate(key).is_some()
    }

    /// Returns the node holding `key`, which may be internal.
    pub fn get_node(&self, key: &K) -> Option<NodeRef<'_, K, V, C>> {
        let (id, _) = self.locate(key)?;
        Some(NodeRef { tree: self, id })
    }

    /// Inserts `key`, or replaces the value of an existing equal key.
    ///
    /// Returns the previous value when the key was already present; the
    /// stored key is kept in that case.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if self.root.is_null() {
            let entries = vec![Entry { key, value }];
            self.root = self
                .nodes
                .alloc(Node::new(NodeId::NULL, entries, Vec::new()));
            self.len += 1;
            return None;
        }

        let mut current = self.root;
        loop {
            match self.search(current, &key) {
                Ok(idx) => {
                    let slot = &mut self.nodes[current].entries[idx].value;
                    return Some(std::mem::replace(slot, value));
                }
                Err(idx) if self.nodes[current].is_leaf() => {
                    self.nodes[current]
                        .entries
                        .insert(idx, Entry { key, value });
                    self.len += 1;
                    self.split_if_overflowing(current);
                    return None;
                }
                Err(idx) => current = self.nodes[current].children[idx],
            }
        }
    }

    /// Binary search over one node's entries.
    ///
    /// `Err(i)` is the insertion position, which for an internal node is also
    /// the index of the child whose subtree must contain `key`.
    fn search(&self, id: NodeId, key: &K) -> std::result::Result<usize, usize> {
        self.nodes[id]
            .entries
            .binary_search_by(|entry| self.comparator.compare(&entry.key, key))
    }

    fn locate(&self, key: &K) -> Option<(NodeId, usize)> {
        if self.root.is_null() {
            return None;
        }

        let mut current = self.root;
        loop {
            match self.search(current, key) {
                Ok(idx) => return Some((current, idx)),
                Err(_) if self.nodes[current].is_leaf() => return None,
                Err(idx) => current = self.nodes[current].children[idx],
            }
        }
    }

    #[inline]
    fn max_entries(&self) -> usize {
        self.branching_factor - 1
    }

    /// Splits `id` if it overflowed, then each ancestor the promotion
    /// overflows in turn.
    fn split_if_overflowing(&mut self, mut id: NodeId) {
        while self.nodes[id].entries.len() > self.max_entries() {
            if id == self.root {
                self.split_root();
                return;
            }
            id = self.split_non_root(id);
        }
    }

    /// Replaces `id` with two halves around its middle entry.
    ///
    /// Returns `id`'s parent, the promoted middle entry, and the left and
    /// right halves. Moved children are reparented; the halves keep `id`'s
    /// parent and `id`'s slot is released.
    fn split_node(&mut self, id: NodeId) -> (NodeId, Entry<K, V>, NodeId, NodeId) {
        let mid = (self.branching_factor - 1) / 2;
        let Node {
            parent,
            mut entries,
            mut children,
        } = self.nodes.release(id);

        let right_entries = entries.split_off(mid + 1);
        let promoted = entries.remove(mid);
        let right_children = if children.is_empty() {
            Vec::new()
        } else {
            children.split_off(mid + 1)
        };

        let left = self.nodes.alloc(Node::new(parent, entries, children));
        let right = self
            .nodes
            .alloc(Node::new(parent, right_entries, right_children));
        self.adopt_children(left);
        self.adopt_children(right);
        (parent, promoted, left, right)
    }

    fn adopt_children(&mut self, id: NodeId) {
        for i in 0..self.nodes[id].children.len() {
            let child = self.nodes[id].children[i];
            self.nodes[child].parent = id;
        }
    }

    /// The only operation that adds a level.
    fn split_root(&mut self) {
        let (_, promoted, left, right) = self.split_node(self.root);

        let root = self
            .nodes
            .alloc(Node::new(NodeId::NULL, vec![promoted], vec![left, right]));
        self.nodes[left].parent = root;
        self.nodes[right].parent = root;
        self.root = root;

        tracing::debug!(height = self.height(), len = self.len, "split root");
    }

    /// Splits a non-root node into its parent and returns the parent, which
    /// may now be overflowing.
    fn split_non_root(&mut self, id: NodeId) -> NodeId {
        let (parent, promoted, left, right) = self.split_node(id);

        // The promoted key sorts exactly where the split node hung.
        let (Ok(pos) | Err(pos)) = self.search(parent, &promoted.key);
        let node = &mut self.nodes[parent];
        node.entries.insert(pos, promoted);
        node.children[pos] = left;
        node.children.insert(pos + 1, right);

        tracing::trace!(parent = parent.0, pos, "split node");
        parent
    }
}

impl<K: Ord, V> Default for OrderedTree<K, V> {
    fn default() -> Self {
        Self::build(
            DEFAULT_BRANCHING_FACTOR,
            DEFAULT_INITIAL_CAPACITY,
            NaturalOrder,
        )
    }
}

impl<K, V, C: Comparator<K>> Extend<(K, V)> for OrderedTree<K, V, C> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K: fmt::Display, V, C> Tree for OrderedTree<K, V, C> {
    fn is_empty(&self) -> bool {
        OrderedTree::is_empty(self)
    }

    fn len(&self) -> usize {
        OrderedTree::len(self)
    }

    fn height(&self) -> usize {
        OrderedTree::height(self)
    }

    fn print(&self, out: &mut dyn io::Write) -> io::Result<()> {
        OrderedTree::print(self, out)
    }
}

/// The sorted key dump: keys ascending, one per line, two spaces of
/// indentation per level below the root.
impl<K: fmt::Display, V, C> fmt::Display for OrderedTree<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.root.is_null() {
            return Ok(());
        }
        self.fmt_node(f, self.root, 0)
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for OrderedTree<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        self.for_each_in_order(self.root, &mut |key, value| {
            map.entry(key, value);
        });
        map.finish()
    }
}

// =============================================================================
// Node views
// =============================================================================

/// Read-only view of one node.
pub struct NodeRef<'a, K, V, C = NaturalOrder> {
    tree: &'a OrderedTree<K, V, C>,
    id: NodeId,
}

impl<K, V, C> Clone for NodeRef<'_, K, V, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V, C> Copy for NodeRef<'_, K, V, C> {}

impl<'a, K, V, C> NodeRef<'a, K, V, C> {
    #[inline]
    fn node(&self) -> &'a Node<K, V> {
        &self.tree.nodes[self.id]
    }

    /// Number of entries in this node.
    pub fn len(&self) -> usize {
        self.node().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node().entries.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.node().is_leaf()
    }

    pub fn is_root(&self) -> bool {
        self.id == self.tree.root
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a K> + 'a {
        self.node().entries.iter().map(|e| &e.key)
    }

    pub fn values(&self) -> impl Iterator<Item = &'a V> + 'a {
        self.node().entries.iter().map(|e| &e.value)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&'a K, &'a V)> + 'a {
        self.node().entries.iter().map(|e| (&e.key, &e.value))
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a, K, V, C>> + 'a {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&id| NodeRef { tree, id })
    }

    pub fn parent(&self) -> Option<NodeRef<'a, K, V, C>> {
        let parent = self.node().parent;
        (!parent.is_null()).then_some(NodeRef {
            tree: self.tree,
            id: parent,
        })
    }

    /// Number of nodes in the subtree rooted here, this node included.
    pub fn node_count(&self) -> usize {
        1 + self.children().map(|c| c.node_count()).sum::<usize>()
    }
}

impl<K: fmt::Debug, V, C> fmt::Debug for NodeRef<'_, K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .field("leaf", &self.is_leaf())
            .finish()
    }
}


#[cfg(test)]
mod proptests;
