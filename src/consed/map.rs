//! Map factory and its mutable-shell map front-end.
//!
//! A [`MapFactory`] owns one canonicalizing allocator; every
//! [`ConsedMap`] it makes routes all node construction through that
//! allocator. Maps from the same factory maximally share structure, and
//! their equality tests and clones are O(1).
//!
//! A `ConsedMap` adapts the engine's root-reference model to a familiar
//! mutable-collection API: it holds one current-root slot and replaces it
//! wholesale on every logical mutation. The `&mut self` receivers make
//! the single-writer requirement a compile-time property; share a map
//! across threads behind a lock if concurrent mutation is needed (with
//! the `arc` feature).
//!
//! # Examples
//!
//! ```rust
//! use treecons::consed::MapFactory;
//!
//! let factory = MapFactory::new();
//! let mut map = factory.make([(1, "one"), (2, "two")]);
//!
//! assert_eq!(map.get(&1), Some(&"one"));
//! assert_eq!(map.insert(2, "TWO"), Some("two"));
//!
//! // clones are O(1) snapshots
//! let snapshot = map.clone();
//! map.remove(&1);
//! assert_eq!(snapshot.len(), 2);
//! assert_eq!(map.len(), 1);
//!
//! // maps from one factory with equal contents compare in O(1)
//! let rebuilt = factory.make([(2, "TWO")]);
//! assert_eq!(map, rebuilt);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::allocator::{Allocator, AllocatorRef};
use super::node::{self, NodeRef, Value};
use super::ReferenceCounter;

// =============================================================================
// MapFactory Definition
// =============================================================================

/// Factory for [`ConsedMap`]s sharing one canonicalizing allocator.
pub struct MapFactory<K, V> {
    allocator: AllocatorRef<K, Value<V>>,
}

impl<K, V> MapFactory<K, V> {
    /// Creates a factory with a fresh allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocator: ReferenceCounter::new(Allocator::new()),
        }
    }

    /// Number of canonical nodes currently alive in this factory's
    /// allocator; shrinks as maps and their history are dropped.
    #[must_use]
    pub fn live_nodes(&self) -> usize {
        self.allocator.live_nodes()
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> MapFactory<K, V> {
    /// Makes a map seeded with the given entries; later entries win on
    /// duplicate keys.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use treecons::consed::MapFactory;
    ///
    /// let factory = MapFactory::new();
    /// let map = factory.make([(2, "two"), (1, "one")]);
    /// assert_eq!(map.len(), 2);
    /// ```
    pub fn make<I>(&self, seed: I) -> ConsedMap<K, V>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut map = ConsedMap {
            root: None,
            allocator: self.allocator.clone(),
        };
        for (key, value) in seed {
            map.insert(key, value);
        }
        map
    }
}

impl<K, V> Default for MapFactory<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory clones share the allocator, so maps made through either handle
/// stay mutually comparable in O(1).
impl<K, V> Clone for MapFactory<K, V> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
        }
    }
}

// =============================================================================
// ConsedMap Definition
// =============================================================================

/// An ordered map whose nodes are hash-consed through its factory's
/// allocator.
///
/// # Time Complexity
///
/// | Operation      | Complexity            |
/// |----------------|-----------------------|
/// | `get`          | O(log N) expected     |
/// | `insert`       | O(log N) expected     |
/// | `remove`       | O(log N) expected     |
/// | `merge_from`   | O(M·log(N/M + 1)) expected (same factory) |
/// | `clone`        | O(1)                  |
/// | `eq` / `hash`  | O(1) (same factory)   |
/// | `len`          | O(1)                  |
pub struct ConsedMap<K, V> {
    root: Option<NodeRef<K, Value<V>>>,
    allocator: AllocatorRef<K, Value<V>>,
}

impl<K, V> ConsedMap<K, V> {
    /// Returns the number of entries in the map.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        node::entries(self.root.as_ref())
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Removes every entry. The previous version survives in any clones.
    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Whether two maps currently share the same root through the same
    /// factory. O(1); implies equality.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.allocator, &other.allocator)
            && node::same_node(self.root.as_ref(), other.root.as_ref())
    }

    fn same_factory(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.allocator, &other.allocator)
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> ConsedMap<K, V> {
    /// Returns a reference to the value for `key`, if any.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        node::get(self.root.as_ref(), key).map(|found| &found.payload.0)
    }

    /// Returns `true` if the map contains an entry for `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Inserts an entry, returning the previous value for `key` if there
    /// was one.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.get(&key).cloned();
        let new_root = node::put(self.root.as_ref(), key, Value(value), &self.allocator);
        self.root = Some(new_root);
        previous
    }

    /// Removes the entry for `key`, returning its value if there was one.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let previous = self.get(key).cloned();
        if previous.is_some() {
            self.root = node::remove(self.root.as_ref(), key, &self.allocator);
        }
        previous
    }

    /// Folds every entry of `other` into this map, `other`'s values
    /// winning on key conflicts. Returns `true` if the map changed.
    ///
    /// Maps from the same factory take the divide-and-conquer union path
    /// with its O(1) identity shortcuts; others are inserted entry by
    /// entry.
    pub fn merge_from(&mut self, other: &Self) -> bool {
        if self.same_factory(other) {
            let new_root = node::union(self.root.as_ref(), other.root.as_ref(), &self.allocator);
            let changed = !node::same_node(self.root.as_ref(), new_root.as_ref());
            self.root = new_root;
            return changed;
        }
        let before = self.root.clone();
        for (key, value) in other.iter() {
            self.insert(key.clone(), value.clone());
        }
        !node::same_node(before.as_ref(), self.root.as_ref())
    }

    /// Returns the entry with the smallest key, or `None` on an empty
    /// map.
    #[must_use]
    pub fn min(&self) -> Option<(&K, &V)> {
        node::min(self.root.as_ref()).map(|found| (&found.key, &found.payload.0))
    }

    /// Returns the entry with the largest key, or `None` on an empty
    /// map.
    #[must_use]
    pub fn max(&self) -> Option<(&K, &V)> {
        node::max(self.root.as_ref()).map(|found| (&found.key, &found.payload.0))
    }

    /// Returns an iterator over entries in ascending key order.
    #[must_use]
    pub fn iter(&self) -> ConsedMapIterator<'_, K, V> {
        let mut nodes = Vec::with_capacity(self.len());
        node::collect_in_order(self.root.as_ref(), &mut nodes);
        ConsedMapIterator {
            entries: nodes
                .into_iter()
                .map(|found| (&found.key, &found.payload.0))
                .collect(),
            current_index: 0,
        }
    }

    /// Returns an iterator over keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// Returns an iterator over values in key order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

/// Cloning is O(1): the clone shares the current root and the factory's
/// allocator, and diverges freely afterwards.
impl<K, V> Clone for ConsedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            allocator: self.allocator.clone(),
        }
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> PartialEq for ConsedMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_factory(other) {
            // one canonical root per entry set: constant time
            return node::same_node(self.root.as_ref(), other.root.as_ref());
        }
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|((self_key, self_value), (other_key, other_value))| {
                    self_key == other_key && self_value == other_value
                })
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> Eq for ConsedMap<K, V> {}

/// Hashing is O(1) via the root's cached subtree hash.
impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> Hash for ConsedMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());
        state.write_u64(node::collection_hash(self.root.as_ref()));
    }
}

impl<K, V> fmt::Debug for ConsedMap<K, V>
where
    K: Clone + Ord + Hash + fmt::Debug,
    V: Clone + Eq + Hash + fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> fmt::Display for ConsedMap<K, V>
where
    K: Clone + Ord + Hash + fmt::Display,
    V: Clone + Eq + Hash + fmt::Display,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for (key, value) in self.iter() {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {value}")?;
        }
        write!(formatter, "}}")
    }
}

impl<'a, K: Clone + Ord + Hash, V: Clone + Eq + Hash> IntoIterator for &'a ConsedMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = ConsedMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> IntoIterator for ConsedMap<K, V> {
    type Item = (K, V);
    type IntoIter = ConsedMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        ConsedMapIntoIterator {
            entries,
            current_index: 0,
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over entries of a [`ConsedMap`].
pub struct ConsedMapIterator<'a, K, V> {
    entries: Vec<(&'a K, &'a V)>,
    current_index: usize,
}

impl<'a, K, V> Iterator for ConsedMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.entries.len() {
            None
        } else {
            let entry = self.entries[self.current_index];
            self.current_index += 1;
            Some(entry)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<K, V> ExactSizeIterator for ConsedMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.current_index)
    }
}

/// An owning iterator over entries of a [`ConsedMap`].
pub struct ConsedMapIntoIterator<K, V> {
    entries: Vec<(K, V)>,
    current_index: usize,
}

impl<K: Clone, V: Clone> Iterator for ConsedMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.entries.len() {
            None
        } else {
            let entry = self.entries[self.current_index].clone();
            self.current_index += 1;
            Some(entry)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.entries.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<K: Clone, V: Clone> ExactSizeIterator for ConsedMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.current_index)
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for ConsedMap<K, V>
where
    K: serde::Serialize + Clone + Ord + Hash,
    V: serde::Serialize + Clone + Eq + Hash,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct ConsedMapVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for ConsedMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + Hash,
    V: serde::Deserialize<'de> + Clone + Eq + Hash,
{
    type Value = ConsedMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        // a deserialized map gets its own private factory
        let factory = MapFactory::new();
        let mut map = factory.make([]);
        while let Some((key, value)) = access.next_entry()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for ConsedMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + Hash,
    V: serde::Deserialize<'de> + Clone + Eq + Hash,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ConsedMapVisitor {
            key_marker: std::marker::PhantomData,
            value_marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn factory() -> MapFactory<i32, String> {
        MapFactory::new()
    }

    fn entry(key: i32, value: &str) -> (i32, String) {
        (key, value.to_string())
    }

    #[rstest]
    fn test_make_empty() {
        let map = factory().make([]);
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.min(), None);
    }

    #[rstest]
    fn test_make_seeded_later_entries_win() {
        let map = factory().make([entry(1, "one"), entry(2, "two"), entry(1, "ONE")]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&1), Some(&"ONE".to_string()));
    }

    #[rstest]
    fn test_insert_returns_previous_value() {
        let mut map = factory().make([]);
        assert_eq!(map.insert(1, "one".to_string()), None);
        assert_eq!(map.insert(1, "ONE".to_string()), Some("one".to_string()));
        assert_eq!(map.len(), 1);
    }

    #[rstest]
    fn test_remove_returns_previous_value() {
        let mut map = factory().make([entry(1, "one"), entry(2, "two")]);
        assert_eq!(map.remove(&1), Some("one".to_string()));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.len(), 1);
    }

    #[rstest]
    fn test_clone_is_constant_time_snapshot() {
        let mut map = factory().make([entry(1, "one"), entry(2, "two")]);
        let snapshot = map.clone();
        assert!(snapshot.same_version(&map));

        map.insert(3, "three".to_string());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(map.len(), 3);
        assert!(!snapshot.same_version(&map));

        // mutating the snapshot leaves the original alone too
        let mut snapshot = snapshot;
        snapshot.remove(&1);
        assert_eq!(map.get(&1), Some(&"one".to_string()));
    }

    #[rstest]
    fn test_same_factory_equality_is_by_root_identity() {
        let shared = factory();
        let forward = shared.make([entry(1, "a"), entry(2, "b"), entry(3, "c")]);
        let backward = shared.make([entry(3, "c"), entry(2, "b"), entry(1, "a")]);
        assert!(forward.same_version(&backward));
        assert_eq!(forward, backward);
    }

    #[rstest]
    fn test_cross_factory_equality_falls_back_to_contents() {
        let left = factory().make([entry(1, "a"), entry(2, "b")]);
        let right = factory().make([entry(2, "b"), entry(1, "a")]);
        assert!(!left.same_version(&right));
        assert_eq!(left, right);

        let different = factory().make([entry(1, "a")]);
        assert_ne!(left, different);
    }

    #[rstest]
    fn test_merge_from_same_factory() {
        let shared = factory();
        let mut base = shared.make([entry(1, "a"), entry(2, "b")]);
        let overlay = shared.make([entry(2, "B"), entry(3, "c")]);

        assert!(base.merge_from(&overlay));
        assert_eq!(base.len(), 3);
        assert_eq!(base.get(&2), Some(&"B".to_string()));

        // merging again changes nothing
        assert!(!base.merge_from(&overlay));
    }

    #[rstest]
    fn test_merge_from_empty_is_noop() {
        let shared = factory();
        let mut base = shared.make([entry(1, "a")]);
        let before = base.clone();
        let empty = shared.make([]);
        assert!(!base.merge_from(&empty));
        assert!(base.same_version(&before));
    }

    #[rstest]
    fn test_merge_from_cross_factory() {
        let mut base = factory().make([entry(1, "a")]);
        let other = factory().make([entry(2, "b")]);
        assert!(base.merge_from(&other));
        assert_eq!(base.len(), 2);
    }

    #[rstest]
    fn test_clear_preserves_clones() {
        let mut map = factory().make([entry(1, "a")]);
        let snapshot = map.clone();
        map.clear();
        assert!(map.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[rstest]
    fn test_iteration_is_in_key_order() {
        let map = factory().make([entry(3, "c"), entry(1, "a"), entry(2, "b")]);
        let keys: Vec<&i32> = map.keys().collect();
        assert_eq!(keys, vec![&1, &2, &3]);

        let pairs: Vec<(i32, String)> = map.clone().into_iter().collect();
        assert_eq!(
            pairs,
            vec![entry(1, "a"), entry(2, "b"), entry(3, "c")]
        );
    }

    #[rstest]
    fn test_hash_is_content_based() {
        use std::collections::hash_map::DefaultHasher;

        let left = factory().make([entry(1, "a"), entry(2, "b")]);
        let right = factory().make([entry(2, "b"), entry(1, "a")]);

        let mut left_hasher = DefaultHasher::new();
        let mut right_hasher = DefaultHasher::new();
        left.hash(&mut left_hasher);
        right.hash(&mut right_hasher);
        assert_eq!(left_hasher.finish(), right_hasher.finish());
    }

    #[rstest]
    fn test_display() {
        let map = factory().make([entry(2, "two"), entry(1, "one")]);
        assert_eq!(format!("{map}"), "{1: one, 2: two}");
    }

    #[rstest]
    fn test_live_nodes_shrink_after_drop() {
        let shared = factory();
        let map = shared.make([entry(1, "a"), entry(2, "b"), entry(3, "c")]);
        assert!(shared.live_nodes() >= 3);
        drop(map);
        assert_eq!(shared.live_nodes(), 0);
    }

    #[rstest]
    fn test_min_max() {
        let map = factory().make([entry(4, "d"), entry(2, "b"), entry(9, "i")]);
        assert_eq!(map.min().map(|(key, _)| *key), Some(2));
        assert_eq!(map.max().map(|(key, _)| *key), Some(9));
    }
}

// =============================================================================
// Send + Sync Tests (arc feature only)
// =============================================================================


// =============================================================================
// Multithread Tests (arc feature only)
// =============================================================================

#[cfg(all(test, feature = "arc"))]
mod multithread_tests {
    use super::*;
    use rstest::rstest;
    use std::thread;

    #[rstest]
    fn test_concurrent_builds_through_one_factory_converge() {
        let shared: MapFactory<i32, String> = MapFactory::new();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let local = shared.clone();
                thread::spawn(move || {
                    let mut map = local.make([]);
                    // each worker inserts the same entries in a
                    // different order
                    for offset in 0..16 {
                        let key = (offset * 7 + worker * 3) % 16;
                        map.insert(key, format!("value-{key}"));
                    }
                    for key in 0..16 {
                        map.insert(key, format!("value-{key}"));
                    }
                    map
                })
            })
            .collect();

        let maps: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("Thread panicked"))
            .collect();

        for map in &maps[1..] {
            assert!(maps[0].same_version(map));
        }
    }

    #[rstest]
    fn test_concurrent_readers_share_one_map() {
        let shared: MapFactory<i32, String> = MapFactory::new();
        let map = shared.make((0..64).map(|key| (key, format!("value-{key}"))));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = map.clone();
                thread::spawn(move || {
                    assert_eq!(reader.len(), 64);
                    assert_eq!(reader.get(&7), Some(&"value-7".to_string()));
                    let keys: Vec<i32> = reader.keys().copied().collect();
                    assert_eq!(keys, (0..64).collect::<Vec<_>>());
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("Thread panicked");
        }
    }
}
