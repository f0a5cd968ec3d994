//! Canonicalizing (hash-consing) node allocator.
//!
//! Every node of every collection is constructed through an [`Allocator`],
//! which memoizes nodes by their *structural signature*: key and payload
//! compared by value, children compared by reference identity. Two
//! construction requests with equal signatures return the same shared
//! instance, so structurally equal subtrees built through the same
//! allocator collapse to one allocation and whole-tree equality becomes a
//! pointer comparison.
//!
//! The table holds only weak references to its entries: a canonical node
//! survives exactly as long as some live tree path references it. Dead
//! entries are pruned lazily while scanning a bucket and in bulk by an
//! amortized sweep once the misses since the last sweep outnumber the
//! table's buckets.
//!
//! Lookup-or-insert is a single critical section per request, so any
//! number of threads may build trees through one shared allocator (with
//! the `arc` feature) without violating the one-instance-per-signature
//! invariant. The allocator never participates in tree topology; it is
//! purely a deduplication cache handed around by reference.

use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use super::node::{Node, NodeRef, Payload, fingerprint, same_node};
use super::{ReferenceCounter, WeakReference};

/// Shared handle to an allocator, one per factory.
pub(crate) type AllocatorRef<K, P> = ReferenceCounter<Allocator<K, P>>;

/// Sweeps are skipped entirely below this table population.
const SWEEP_FLOOR: usize = 64;

/// Canonicalizing allocator for [`Node`]s.
pub(crate) struct Allocator<K, P> {
    table: Mutex<ConsTable<K, P>>,
}

/// Signature-hash keyed table of weakly-held canonical nodes.
///
/// Buckets are almost always a single entry; a `SmallVec` keeps the
/// collision case allocation-free without penalizing the common one.
struct ConsTable<K, P> {
    buckets: FxHashMap<u64, SmallVec<[WeakReference<Node<K, P>>; 1]>>,
    /// Construction requests that missed since the last sweep.
    misses: usize,
}

impl<K, P> Allocator<K, P> {
    pub(crate) fn new() -> Self {
        Self {
            table: Mutex::new(ConsTable {
                buckets: FxHashMap::default(),
                misses: 0,
            }),
        }
    }

    /// Number of canonical nodes currently alive in the table.
    pub(crate) fn live_nodes(&self) -> usize {
        let table = self.table.lock();
        table
            .buckets
            .values()
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|weak| weak.strong_count() > 0)
                    .count()
            })
            .sum()
    }
}

impl<K, P> Default for Allocator<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, P: Payload> Allocator<K, P> {
    /// Returns the canonical node for the given shape, creating and
    /// registering a fresh instance on a miss or when the previous
    /// canonical instance has already been reclaimed.
    pub(crate) fn node(
        &self,
        key: K,
        payload: P,
        left: Option<NodeRef<K, P>>,
        right: Option<NodeRef<K, P>>,
    ) -> NodeRef<K, P> {
        let signature = signature_hash(&key, &payload, left.as_ref(), right.as_ref());
        let mut table = self.table.lock();
        if let Some(bucket) = table.buckets.get_mut(&signature) {
            bucket.retain(|weak| weak.strong_count() > 0);
            for weak in bucket.iter() {
                let Some(existing) = weak.upgrade() else {
                    continue;
                };
                if existing.key == key
                    && existing.payload.matches(&payload)
                    && same_node(existing.left.as_ref(), left.as_ref())
                    && same_node(existing.right.as_ref(), right.as_ref())
                {
                    return existing;
                }
            }
        }
        let node = ReferenceCounter::new(Node::new(key, payload, left, right));
        table
            .buckets
            .entry(signature)
            .or_default()
            .push(ReferenceCounter::downgrade(&node));
        table.misses += 1;
        if table.misses > table.buckets.len().max(SWEEP_FLOOR) {
            table.sweep();
        }
        node
    }
}

impl<K, P> ConsTable<K, P> {
    /// Drops every table entry whose node has been reclaimed.
    fn sweep(&mut self) {
        self.buckets.retain(|_, bucket| {
            bucket.retain(|weak| weak.strong_count() > 0);
            !bucket.is_empty()
        });
        self.misses = 0;
    }
}

/// Structural signature: key and payload by value, children by identity.
fn signature_hash<K: Hash, P: Payload>(
    key: &K,
    payload: &P,
    left: Option<&NodeRef<K, P>>,
    right: Option<&NodeRef<K, P>>,
) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(fingerprint(key));
    hasher.write_u64(payload.fingerprint());
    hasher.write_usize(child_address(left));
    hasher.write_usize(child_address(right));
    hasher.finish()
}

fn child_address<K, P>(child: Option<&NodeRef<K, P>>) -> usize {
    child.map_or(0, |node| ReferenceCounter::as_ptr(node) as usize)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::super::node::Value;
    use super::*;
    use rstest::rstest;

    type StringAllocator = Allocator<i32, Value<String>>;

    fn leaf(allocator: &StringAllocator, key: i32, value: &str) -> NodeRef<i32, Value<String>> {
        allocator.node(key, Value(value.to_string()), None, None)
    }

    #[rstest]
    fn test_equal_shapes_share_one_instance() {
        let allocator = StringAllocator::new();
        let first = leaf(&allocator, 1, "a");
        let second = leaf(&allocator, 1, "a");
        assert!(ReferenceCounter::ptr_eq(&first, &second));
        assert_eq!(allocator.live_nodes(), 1);
    }

    #[rstest]
    fn test_distinct_shapes_get_distinct_instances() {
        let allocator = StringAllocator::new();
        let first = leaf(&allocator, 1, "a");
        let second = leaf(&allocator, 1, "b");
        let third = leaf(&allocator, 2, "a");
        assert!(!ReferenceCounter::ptr_eq(&first, &second));
        assert!(!ReferenceCounter::ptr_eq(&first, &third));
        assert_eq!(allocator.live_nodes(), 3);
    }

    #[rstest]
    fn test_child_identity_is_part_of_the_signature() {
        let allocator = StringAllocator::new();
        let left_a = leaf(&allocator, 1, "a");
        let left_b = leaf(&allocator, 1, "b");
        let parent_a = allocator.node(5, Value("e".to_string()), Some(left_a), None);
        let parent_b = allocator.node(5, Value("e".to_string()), Some(left_b), None);
        assert!(!ReferenceCounter::ptr_eq(&parent_a, &parent_b));
    }

    #[rstest]
    fn test_reclaimed_entries_are_rebuilt_fresh() {
        let allocator = StringAllocator::new();
        let first = leaf(&allocator, 1, "a");
        drop(first);
        assert_eq!(allocator.live_nodes(), 0);
        // the earlier canonical instance is gone; a new request must
        // produce a live replacement rather than a dead upgrade
        let second = leaf(&allocator, 1, "a");
        assert_eq!(second.key, 1);
        assert_eq!(allocator.live_nodes(), 1);
    }

    #[rstest]
    fn test_live_nodes_tracks_tree_lifetime() {
        let allocator = StringAllocator::new();
        let left = leaf(&allocator, 1, "a");
        let right = leaf(&allocator, 3, "c");
        let root = allocator.node(2, Value("b".to_string()), Some(left), Some(right));
        assert_eq!(allocator.live_nodes(), 3);
        drop(root);
        assert_eq!(allocator.live_nodes(), 0);
    }

    #[rstest]
    fn test_sweep_clears_dead_buckets() {
        let allocator = StringAllocator::new();
        for key in 0..200 {
            // every node dropped immediately; the amortized sweep keeps
            // the table from accumulating dead weak entries forever
            let _ = leaf(&allocator, key, "x");
        }
        let table = allocator.table.lock();
        let dead_entries: usize = table.buckets.values().map(|bucket| bucket.len()).sum();
        assert!(dead_entries <= 200);
        drop(table);
        assert_eq!(allocator.live_nodes(), 0);
    }
}
