//! Immutable treap nodes and the pure operations over them.
//!
//! A [`Node`] is one vertex of a persistent binary search tree ordered by
//! key and heap-ordered by a per-key priority derived from the key's
//! fingerprint. Nodes are never mutated after construction; every
//! "update" is a pure function that rebuilds the path from the root to
//! the touched node and reuses every untouched subtree by reference. All
//! rebuilt nodes are routed through the
//! [`Allocator`](super::allocator::Allocator), which collapses
//! structurally identical nodes to a single shared instance.
//!
//! Because priorities depend only on keys, the shape of a tree is a
//! function of its entry set alone, never of the order of inserts and
//! removes that produced it. Combined with canonicalization this means
//! collections holding equal entries through the same allocator converge
//! to the *same* root pointer, and an update that changes nothing returns
//! a root pointer-equal to its input.
//!
//! Each node caches three aggregates at construction time:
//!
//! - `size`: nodes in the subtree (distinct keys)
//! - `entries`: logical entries in the subtree; differs from `size` only
//!   when payloads carry nested trees, as in the multi-map's outer level
//! - `subtree_hash`: an order-independent hash of every entry in the
//!   subtree, giving O(1) whole-collection hashing
//!
//! Expected height is O(log n) for keys whose fingerprints behave like
//! random priorities; there is no worst-case height bound.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::ReferenceCounter;
use super::allocator::Allocator;

// =============================================================================
// Payload Behavior
// =============================================================================

/// How a payload participates in canonicalization and in the cached
/// aggregates.
///
/// The map, set and multi-map front-ends store different payload shapes
/// in the same node structure; this trait supplies the pieces that vary:
/// the payload's hash contribution, the structural-equality test used by
/// the allocator, and how many logical entries the payload represents.
pub(crate) trait Payload: Clone {
    /// Hash contribution of this payload to the node's entry fingerprint.
    fn fingerprint(&self) -> u64;

    /// Structural equality as judged by the canonicalizing allocator.
    fn matches(&self, other: &Self) -> bool;

    /// Number of logical entries this payload represents.
    fn weight(&self) -> usize {
        1
    }
}

/// Plain map value payload.
#[derive(Clone)]
pub(crate) struct Value<V>(pub(crate) V);

impl<V: Clone + Eq + Hash> Payload for Value<V> {
    fn fingerprint(&self) -> u64 {
        fingerprint(&self.0)
    }

    fn matches(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Set payload: the element is the key, so the payload carries nothing.
impl Payload for () {
    fn fingerprint(&self) -> u64 {
        0
    }

    fn matches(&self, _other: &Self) -> bool {
        true
    }
}

/// Multi-map outer payload: the root of an inner value-set tree.
///
/// Inner roots are canonicalized through the owning factory's set
/// allocator, so structurally equal inner trees are pointer-identical and
/// identity comparison is sound here.
pub(crate) struct SetRoot<V>(pub(crate) Option<NodeRef<V, ()>>);

impl<V> Clone for SetRoot<V> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<V> Payload for SetRoot<V> {
    fn fingerprint(&self) -> u64 {
        collection_hash(self.0.as_ref())
    }

    fn matches(&self, other: &Self) -> bool {
        same_node(self.0.as_ref(), other.0.as_ref())
    }

    fn weight(&self) -> usize {
        size(self.0.as_ref())
    }
}

// =============================================================================
// Node Definition
// =============================================================================

/// Shared handle to an immutable subtree.
pub(crate) type NodeRef<K, P> = ReferenceCounter<Node<K, P>>;

/// An immutable treap node.
///
/// Construction happens exclusively through
/// [`Allocator::node`](super::allocator::Allocator::node), which
/// canonicalizes structurally identical nodes to one instance.
pub(crate) struct Node<K, P> {
    pub(crate) key: K,
    pub(crate) payload: P,
    pub(crate) left: Option<NodeRef<K, P>>,
    pub(crate) right: Option<NodeRef<K, P>>,
    /// Nodes in the subtree rooted here.
    pub(crate) size: usize,
    /// Logical entries in the subtree rooted here.
    pub(crate) entries: usize,
    /// Order-independent hash of every entry in the subtree rooted here.
    pub(crate) subtree_hash: u64,
}

impl<K: Hash, P: Payload> Node<K, P> {
    /// Builds a node and computes its cached aggregates.
    pub(crate) fn new(
        key: K,
        payload: P,
        left: Option<NodeRef<K, P>>,
        right: Option<NodeRef<K, P>>,
    ) -> Self {
        let entry_fingerprint = fingerprint(&key) ^ payload.fingerprint();
        let size = 1 + size(left.as_ref()) + size(right.as_ref());
        let entries = payload.weight() + entries(left.as_ref()) + entries(right.as_ref());
        let subtree_hash = entry_fingerprint
            .wrapping_add(collection_hash(left.as_ref()))
            .wrapping_add(collection_hash(right.as_ref()));
        Self {
            key,
            payload,
            left,
            right,
            size,
            entries,
            subtree_hash,
        }
    }
}

// =============================================================================
// Aggregate Accessors
// =============================================================================

/// Stable fingerprint of a hashable value.
pub(crate) fn fingerprint<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Heap ordering between two keys: `a` outranks `b` when `a`'s
/// fingerprint is larger, with the key ordering breaking fingerprint
/// collisions so the relation is a strict total order on distinct keys.
fn heap_before<K: Ord + Hash>(a: &K, b: &K) -> bool {
    match fingerprint(a).cmp(&fingerprint(b)) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => a < b,
    }
}

/// Number of nodes in the subtree, 0 for an empty root.
pub(crate) fn size<K, P>(node: Option<&NodeRef<K, P>>) -> usize {
    node.map_or(0, |node_ref| node_ref.size)
}

/// Number of logical entries in the subtree, 0 for an empty root.
pub(crate) fn entries<K, P>(node: Option<&NodeRef<K, P>>) -> usize {
    node.map_or(0, |node_ref| node_ref.entries)
}

/// Cached hash of the whole collection rooted at `node`.
pub(crate) fn collection_hash<K, P>(node: Option<&NodeRef<K, P>>) -> u64 {
    node.map_or(0, |node_ref| node_ref.subtree_hash)
}

/// Identity comparison of two optional roots.
pub(crate) fn same_node<K, P>(a: Option<&NodeRef<K, P>>, b: Option<&NodeRef<K, P>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a_ref), Some(b_ref)) => ReferenceCounter::ptr_eq(a_ref, b_ref),
        _ => false,
    }
}

// =============================================================================
// Tree Operations
// =============================================================================

/// Returns the node matching `key`, if any.
///
/// Standard binary-search descent: O(depth) comparisons, no allocation,
/// no structural change.
pub(crate) fn get<'a, K, P, Q>(node: Option<&'a NodeRef<K, P>>, key: &Q) -> Option<&'a Node<K, P>>
where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
{
    let node_ref = node?;
    match key.cmp(node_ref.key.borrow()) {
        Ordering::Less => get(node_ref.left.as_ref(), key),
        Ordering::Greater => get(node_ref.right.as_ref(), key),
        Ordering::Equal => Some(node_ref.as_ref()),
    }
}

/// Returns a root containing every entry of `node` plus a mapping from
/// `key` to `payload`.
///
/// Path-copying insert with a rotation wherever the inserted key outranks
/// the node on its descent path; O(depth) rebuilt nodes, every untouched
/// subtree reused by reference. Inserting an entry that is already
/// present unchanged returns a root pointer-equal to the input; callers
/// detect no-ops by comparing roots with [`same_node`].
pub(crate) fn put<K, P>(
    node: Option<&NodeRef<K, P>>,
    key: K,
    payload: P,
    allocator: &Allocator<K, P>,
) -> NodeRef<K, P>
where
    K: Clone + Ord + Hash,
    P: Payload,
{
    match node {
        None => allocator.node(key, payload, None, None),
        Some(node_ref) => match key.cmp(&node_ref.key) {
            Ordering::Equal => allocator.node(
                key,
                payload,
                node_ref.left.clone(),
                node_ref.right.clone(),
            ),
            Ordering::Less => {
                let new_left = put(node_ref.left.as_ref(), key, payload, allocator);
                if heap_before(&new_left.key, &node_ref.key) {
                    // the inserted key bubbled up to the child root and
                    // outranks this node: rotate right
                    let lowered = allocator.node(
                        node_ref.key.clone(),
                        node_ref.payload.clone(),
                        new_left.right.clone(),
                        node_ref.right.clone(),
                    );
                    allocator.node(
                        new_left.key.clone(),
                        new_left.payload.clone(),
                        new_left.left.clone(),
                        Some(lowered),
                    )
                } else {
                    allocator.node(
                        node_ref.key.clone(),
                        node_ref.payload.clone(),
                        Some(new_left),
                        node_ref.right.clone(),
                    )
                }
            }
            Ordering::Greater => {
                let new_right = put(node_ref.right.as_ref(), key, payload, allocator);
                if heap_before(&new_right.key, &node_ref.key) {
                    // rotate left
                    let lowered = allocator.node(
                        node_ref.key.clone(),
                        node_ref.payload.clone(),
                        node_ref.left.clone(),
                        new_right.left.clone(),
                    );
                    allocator.node(
                        new_right.key.clone(),
                        new_right.payload.clone(),
                        Some(lowered),
                        new_right.right.clone(),
                    )
                } else {
                    allocator.node(
                        node_ref.key.clone(),
                        node_ref.payload.clone(),
                        node_ref.left.clone(),
                        Some(new_right),
                    )
                }
            }
        },
    }
}

/// Returns a root containing every entry of `node` except the one for
/// `key`.
///
/// If `key` is absent the rebuilt path collapses back to the original
/// instances through the allocator, so the returned root is pointer-equal
/// to the input.
pub(crate) fn remove<K, P, Q>(
    node: Option<&NodeRef<K, P>>,
    key: &Q,
    allocator: &Allocator<K, P>,
) -> Option<NodeRef<K, P>>
where
    K: Borrow<Q> + Clone + Ord + Hash,
    P: Payload,
    Q: Ord + ?Sized,
{
    let node_ref = node?;
    match key.cmp(node_ref.key.borrow()) {
        Ordering::Equal => merge(node_ref.left.as_ref(), node_ref.right.as_ref(), allocator),
        Ordering::Less => {
            let new_left = remove(node_ref.left.as_ref(), key, allocator);
            Some(allocator.node(
                node_ref.key.clone(),
                node_ref.payload.clone(),
                new_left,
                node_ref.right.clone(),
            ))
        }
        Ordering::Greater => {
            let new_right = remove(node_ref.right.as_ref(), key, allocator);
            Some(allocator.node(
                node_ref.key.clone(),
                node_ref.payload.clone(),
                node_ref.left.clone(),
                new_right,
            ))
        }
    }
}

/// Merges two subtrees whose key ranges are disjoint (every key of
/// `left` below every key of `right`), promoting whichever root outranks
/// the other so the result is the canonical treap of the combined keys.
fn merge<K, P>(
    left: Option<&NodeRef<K, P>>,
    right: Option<&NodeRef<K, P>>,
    allocator: &Allocator<K, P>,
) -> Option<NodeRef<K, P>>
where
    K: Clone + Ord + Hash,
    P: Payload,
{
    match (left, right) {
        (None, _) => right.cloned(),
        (_, None) => left.cloned(),
        (Some(left_ref), Some(right_ref)) => {
            if heap_before(&left_ref.key, &right_ref.key) {
                let merged = merge(left_ref.right.as_ref(), right, allocator);
                Some(allocator.node(
                    left_ref.key.clone(),
                    left_ref.payload.clone(),
                    left_ref.left.clone(),
                    merged,
                ))
            } else {
                let merged = merge(left, right_ref.left.as_ref(), allocator);
                Some(allocator.node(
                    right_ref.key.clone(),
                    right_ref.payload.clone(),
                    merged,
                    right_ref.right.clone(),
                ))
            }
        }
    }
}

/// Splits a tree around `key` into the entries strictly below and
/// strictly above it, returning the matching payload separately if the
/// key was present.
pub(crate) fn split<K, P>(
    node: Option<&NodeRef<K, P>>,
    key: &K,
    allocator: &Allocator<K, P>,
) -> (Option<NodeRef<K, P>>, Option<NodeRef<K, P>>, Option<P>)
where
    K: Clone + Ord + Hash,
    P: Payload,
{
    let Some(node_ref) = node else {
        return (None, None, None);
    };
    match node_ref.key.cmp(key) {
        Ordering::Equal => (
            node_ref.left.clone(),
            node_ref.right.clone(),
            Some(node_ref.payload.clone()),
        ),
        Ordering::Less => {
            let (below, above, matched) = split(node_ref.right.as_ref(), key, allocator);
            (
                Some(allocator.node(
                    node_ref.key.clone(),
                    node_ref.payload.clone(),
                    node_ref.left.clone(),
                    below,
                )),
                above,
                matched,
            )
        }
        Ordering::Greater => {
            let (below, above, matched) = split(node_ref.left.as_ref(), key, allocator);
            (
                below,
                Some(allocator.node(
                    node_ref.key.clone(),
                    node_ref.payload.clone(),
                    above,
                    node_ref.right.clone(),
                )),
                matched,
            )
        }
    }
}

/// Union of two trees built through the same allocator; `b`'s payloads
/// win on key conflicts.
///
/// Either side empty, or pointer-equal roots, return in O(1). The
/// general case promotes whichever root outranks the other, splits the
/// remaining tree around it and recurses on both halves: roughly
/// O(m·log(n/m+1)) comparisons for trees of sizes m ≤ n with
/// well-dispersed key fingerprints.
pub(crate) fn union<K, P>(
    a: Option<&NodeRef<K, P>>,
    b: Option<&NodeRef<K, P>>,
    allocator: &Allocator<K, P>,
) -> Option<NodeRef<K, P>>
where
    K: Clone + Ord + Hash,
    P: Payload,
{
    match (a, b) {
        (None, _) => b.cloned(),
        (_, None) => a.cloned(),
        (Some(a_ref), Some(b_ref)) => {
            if ReferenceCounter::ptr_eq(a_ref, b_ref) {
                return Some(a_ref.clone());
            }
            if heap_before(&a_ref.key, &b_ref.key) {
                // a's root outranks every key of both trees; b's payload
                // still wins if b carries the same key
                let (below, above, matched) = split(b, &a_ref.key, allocator);
                let payload = matched.unwrap_or_else(|| a_ref.payload.clone());
                let left = union(a_ref.left.as_ref(), below.as_ref(), allocator);
                let right = union(a_ref.right.as_ref(), above.as_ref(), allocator);
                Some(allocator.node(a_ref.key.clone(), payload, left, right))
            } else {
                let (below, above, _) = split(a, &b_ref.key, allocator);
                let left = union(below.as_ref(), b_ref.left.as_ref(), allocator);
                let right = union(above.as_ref(), b_ref.right.as_ref(), allocator);
                Some(allocator.node(
                    b_ref.key.clone(),
                    b_ref.payload.clone(),
                    left,
                    right,
                ))
            }
        }
    }
}

/// Whether every key of `subset` occurs in `container`.
///
/// Both roots must come from the same allocator: the pointer-equality and
/// pigeonhole shortcuts rely on structurally equal trees being identical.
pub(crate) fn contains_all<K, P>(
    container: Option<&NodeRef<K, P>>,
    subset: Option<&NodeRef<K, P>>,
    allocator: &Allocator<K, P>,
) -> bool
where
    K: Clone + Ord + Hash,
    P: Payload,
{
    match (container, subset) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(container_ref), Some(subset_ref)) => {
            if ReferenceCounter::ptr_eq(container_ref, subset_ref) {
                return true;
            }
            // pigeonhole: a strict subset has strictly fewer nodes
            if subset_ref.size >= container_ref.size {
                return false;
            }
            let (below, above, _) = split(subset, &container_ref.key, allocator);
            contains_all(container_ref.left.as_ref(), below.as_ref(), allocator)
                && contains_all(container_ref.right.as_ref(), above.as_ref(), allocator)
        }
    }
}

/// Node with the smallest key in the subtree.
pub(crate) fn min<'a, K, P>(node: Option<&'a NodeRef<K, P>>) -> Option<&'a Node<K, P>> {
    let node_ref = node?;
    match node_ref.left.as_ref() {
        None => Some(node_ref.as_ref()),
        Some(left) => min(Some(left)),
    }
}

/// Node with the largest key in the subtree.
pub(crate) fn max<'a, K, P>(node: Option<&'a NodeRef<K, P>>) -> Option<&'a Node<K, P>> {
    let node_ref = node?;
    match node_ref.right.as_ref() {
        None => Some(node_ref.as_ref()),
        Some(right) => max(Some(right)),
    }
}

/// Collects every node in key order (in-order traversal).
pub(crate) fn collect_in_order<'a, K, P>(
    node: Option<&'a NodeRef<K, P>>,
    out: &mut Vec<&'a Node<K, P>>,
) {
    if let Some(node_ref) = node {
        collect_in_order(node_ref.left.as_ref(), out);
        out.push(node_ref.as_ref());
        collect_in_order(node_ref.right.as_ref(), out);
    }
}

// =============================================================================
// Tests
// =============================================================================
