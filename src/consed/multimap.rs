//! Multi-map factory and its mutable-shell front-end.
//!
//! A [`ConsedMultiMap`] maps keys to *sets* of values: an outer tree
//! keyed by `K` whose payloads are the roots of inner value-set trees.
//! Duplicate (key, value) pairs are never stored. Every single-pair
//! operation is a composed two-level persistent update: locate the outer
//! node, update its inner tree, then re-insert the changed inner root
//! into the outer tree.
//!
//! Each [`MultiMapFactory`] owns two allocators, one for outer map nodes
//! and one for inner set nodes, shared by every multi-map it makes. The
//! outer nodes' cached entry count aggregates the inner tree sizes, so
//! the total number of distinct pairs is O(1).
//!
//! An outer node always holds a non-empty inner tree: removing the last
//! value for a key removes the key itself.
//!
//! # Examples
//!
//! ```rust
//! use treecons::consed::MultiMapFactory;
//!
//! let factory = MultiMapFactory::new();
//! let mut mm = factory.make([(1, "a"), (1, "b"), (2, "c")]);
//!
//! assert_eq!(mm.len(), 3);     // distinct pairs
//! assert_eq!(mm.key_len(), 2); // distinct keys
//! assert!(mm.contains(&1, &"b"));
//!
//! mm.remove(&2, &"c");
//! assert!(!mm.contains_key(&2));
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::allocator::{Allocator, AllocatorRef};
use super::node::{self, NodeRef, SetRoot};
use super::ReferenceCounter;

// =============================================================================
// MultiMapFactory Definition
// =============================================================================

/// Factory for [`ConsedMultiMap`]s sharing one pair of canonicalizing
/// allocators.
pub struct MultiMapFactory<K, V> {
    map_allocator: AllocatorRef<K, SetRoot<V>>,
    set_allocator: AllocatorRef<V, ()>,
}

impl<K, V> MultiMapFactory<K, V> {
    /// Creates a factory with fresh allocators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map_allocator: ReferenceCounter::new(Allocator::new()),
            set_allocator: ReferenceCounter::new(Allocator::new()),
        }
    }

    /// Number of canonical nodes currently alive across this factory's
    /// outer and inner allocators.
    #[must_use]
    pub fn live_nodes(&self) -> usize {
        self.map_allocator.live_nodes() + self.set_allocator.live_nodes()
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Ord + Hash> MultiMapFactory<K, V> {
    /// Makes a multi-map seeded with the given pairs; duplicates collapse.
    pub fn make<I>(&self, seed: I) -> ConsedMultiMap<K, V>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let mut multimap = ConsedMultiMap {
            root: None,
            map_allocator: self.map_allocator.clone(),
            set_allocator: self.set_allocator.clone(),
        };
        for (key, value) in seed {
            multimap.insert(key, value);
        }
        multimap
    }
}

impl<K, V> Default for MultiMapFactory<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory clones share both allocators.
impl<K, V> Clone for MultiMapFactory<K, V> {
    fn clone(&self) -> Self {
        Self {
            map_allocator: self.map_allocator.clone(),
            set_allocator: self.set_allocator.clone(),
        }
    }
}

// =============================================================================
// ConsedMultiMap Definition
// =============================================================================

/// An ordered multi-map whose nodes are hash-consed through its factory's
/// allocators.
///
/// # Time Complexity
///
/// | Operation      | Complexity            |
/// |----------------|-----------------------|
/// | `contains`     | O(log N) expected     |
/// | `insert`       | O(log N) expected     |
/// | `remove`       | O(log N) expected     |
/// | `len`          | O(1)                  |
/// | `clone`        | O(1)                  |
/// | `eq` / `hash`  | O(1) (same factory)   |
pub struct ConsedMultiMap<K, V> {
    root: Option<NodeRef<K, SetRoot<V>>>,
    map_allocator: AllocatorRef<K, SetRoot<V>>,
    set_allocator: AllocatorRef<V, ()>,
}

impl<K, V> ConsedMultiMap<K, V> {
    /// Returns the number of distinct (key, value) pairs.
    ///
    /// O(1): outer nodes aggregate their inner tree sizes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        node::entries(self.root.as_ref())
    }

    /// Returns the number of distinct keys.
    #[inline]
    #[must_use]
    pub fn key_len(&self) -> usize {
        node::size(self.root.as_ref())
    }

    /// Returns `true` if the multi-map contains no pairs.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Removes every pair. The previous version survives in any clones.
    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Whether two multi-maps currently share the same root through the
    /// same factory. O(1); implies equality.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.map_allocator, &other.map_allocator)
            && node::same_node(self.root.as_ref(), other.root.as_ref())
    }

    fn same_factory(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.map_allocator, &other.map_allocator)
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Ord + Hash> ConsedMultiMap<K, V> {
    /// Returns `true` if any value is mapped under `key`.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        // outer nodes always hold a non-empty inner tree
        node::get(self.root.as_ref(), key).is_some()
    }

    /// Returns `true` if the pair (`key`, `value`) is present.
    #[must_use]
    pub fn contains<Q, R>(&self, key: &Q, value: &R) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        V: Borrow<R>,
        R: Ord + ?Sized,
    {
        node::get(self.root.as_ref(), key)
            .is_some_and(|outer| node::get(outer.payload.0.as_ref(), value).is_some())
    }

    /// Returns the smallest value mapped under `key`, if any.
    #[must_use]
    pub fn first_value<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let outer = node::get(self.root.as_ref(), key)?;
        node::min(outer.payload.0.as_ref()).map(|found| &found.key)
    }

    /// Adds the pair (`key`, `value`), returning `true` if the multi-map
    /// changed.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let inner = node::get(self.root.as_ref(), &key)
            .map_or(SetRoot(None), |outer| outer.payload.clone());
        let new_inner = node::put(inner.0.as_ref(), value, (), &self.set_allocator);
        if node::same_node(inner.0.as_ref(), Some(&new_inner)) {
            return false;
        }
        let new_root = node::put(
            self.root.as_ref(),
            key,
            SetRoot(Some(new_inner)),
            &self.map_allocator,
        );
        self.root = Some(new_root);
        true
    }

    /// Removes the pair (`key`, `value`), returning `true` if the
    /// multi-map changed. Removing the last value for a key removes the
    /// key itself.
    pub fn remove<Q, R>(&mut self, key: &Q, value: &R) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        V: Borrow<R>,
        R: Ord + ?Sized,
    {
        let Some(outer) = node::get(self.root.as_ref(), key) else {
            return false;
        };
        let outer_key = outer.key.clone();
        let inner = outer.payload.clone();
        let new_inner = node::remove(inner.0.as_ref(), value, &self.set_allocator);
        if node::same_node(inner.0.as_ref(), new_inner.as_ref()) {
            return false;
        }
        self.root = match new_inner {
            None => node::remove(self.root.as_ref(), key, &self.map_allocator),
            Some(inner_root) => Some(node::put(
                self.root.as_ref(),
                outer_key,
                SetRoot(Some(inner_root)),
                &self.map_allocator,
            )),
        };
        true
    }

    /// Removes every value mapped under `key`, returning `true` if the
    /// multi-map changed.
    pub fn remove_key<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let new_root = node::remove(self.root.as_ref(), key, &self.map_allocator);
        let changed = !node::same_node(self.root.as_ref(), new_root.as_ref());
        self.root = new_root;
        changed
    }

    /// Returns an iterator over the values mapped under `key`, in
    /// ascending order. Empty if the key is absent.
    #[must_use]
    pub fn values_of<Q>(&self, key: &Q) -> ConsedMultiMapValues<'_, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut nodes = Vec::new();
        if let Some(outer) = node::get(self.root.as_ref(), key) {
            node::collect_in_order(outer.payload.0.as_ref(), &mut nodes);
        }
        ConsedMultiMapValues {
            values: nodes.into_iter().map(|found| &found.key).collect(),
            current_index: 0,
        }
    }

    /// Returns an iterator over all (key, value) pairs, keyed ascending
    /// and values ascending within each key.
    #[must_use]
    pub fn iter(&self) -> ConsedMultiMapIterator<'_, K, V> {
        let mut pairs = Vec::with_capacity(self.len());
        let mut outer_nodes = Vec::with_capacity(self.key_len());
        node::collect_in_order(self.root.as_ref(), &mut outer_nodes);
        for outer in outer_nodes {
            let mut inner_nodes = Vec::new();
            node::collect_in_order(outer.payload.0.as_ref(), &mut inner_nodes);
            for inner in inner_nodes {
                pairs.push((&outer.key, &inner.key));
            }
        }
        ConsedMultiMapIterator {
            pairs,
            current_index: 0,
        }
    }

    /// Returns an iterator over distinct keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        let mut outer_nodes = Vec::with_capacity(self.key_len());
        node::collect_in_order(self.root.as_ref(), &mut outer_nodes);
        outer_nodes.into_iter().map(|found| &found.key)
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

/// Cloning is O(1): the clone shares the current root and the factory's
/// allocators, and diverges freely afterwards.
impl<K, V> Clone for ConsedMultiMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            map_allocator: self.map_allocator.clone(),
            set_allocator: self.set_allocator.clone(),
        }
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Ord + Hash> PartialEq for ConsedMultiMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_factory(other) {
            // one canonical root per pair set: constant time
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

impl<K: Clone + Ord + Hash, V: Clone + Ord + Hash> Eq for ConsedMultiMap<K, V> {}

/// Hashing is O(1) via the outer root's cached subtree hash, which folds
/// in every inner tree's hash.
impl<K: Clone + Ord + Hash, V: Clone + Ord + Hash> Hash for ConsedMultiMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());
        state.write_u64(node::collection_hash(self.root.as_ref()));
    }
}

impl<K, V> fmt::Debug for ConsedMultiMap<K, V>
where
    K: Clone + Ord + Hash + fmt::Debug,
    V: Clone + Ord + Hash + fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = formatter.debug_map();
        for key in self.keys() {
            let values: Vec<&V> = self.values_of(key).collect();
            map.entry(&key, &values);
        }
        map.finish()
    }
}

impl<K, V> fmt::Display for ConsedMultiMap<K, V>
where
    K: Clone + Ord + Hash + fmt::Display,
    V: Clone + Ord + Hash + fmt::Display,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first_key = true;
        for key in self.keys() {
            if first_key {
                first_key = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{key}: {{")?;
            let mut first_value = true;
            for value in self.values_of(key) {
                if first_value {
                    first_value = false;
                } else {
                    write!(formatter, ", ")?;
                }
                write!(formatter, "{value}")?;
            }
            write!(formatter, "}}")?;
        }
        write!(formatter, "}}")
    }
}

impl<'a, K: Clone + Ord + Hash, V: Clone + Ord + Hash> IntoIterator for &'a ConsedMultiMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = ConsedMultiMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over (key, value) pairs of a [`ConsedMultiMap`].
pub struct ConsedMultiMapIterator<'a, K, V> {
    pairs: Vec<(&'a K, &'a V)>,
    current_index: usize,
}

impl<'a, K, V> Iterator for ConsedMultiMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.pairs.len() {
            None
        } else {
            let pair = self.pairs[self.current_index];
            self.current_index += 1;
            Some(pair)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.pairs.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<K, V> ExactSizeIterator for ConsedMultiMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.pairs.len().saturating_sub(self.current_index)
    }
}

/// An iterator over the values mapped under one key of a
/// [`ConsedMultiMap`].
pub struct ConsedMultiMapValues<'a, V> {
    values: Vec<&'a V>,
    current_index: usize,
}

impl<'a, V> Iterator for ConsedMultiMapValues<'a, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.values.len() {
            None
        } else {
            let value = self.values[self.current_index];
            self.current_index += 1;
            Some(value)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.values.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<V> ExactSizeIterator for ConsedMultiMapValues<'_, V> {
    fn len(&self) -> usize {
        self.values.len().saturating_sub(self.current_index)
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for ConsedMultiMap<K, V>
where
    K: serde::Serialize + Clone + Ord + Hash,
    V: serde::Serialize + Clone + Ord + Hash,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.key_len()))?;
        for key in self.keys() {
            let values: Vec<&V> = self.values_of(key).collect();
            map.serialize_entry(key, &values)?;
        }
        map.end()
    }
}

#[cfg(feature = "serde")]
struct ConsedMultiMapVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for ConsedMultiMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + Hash,
    V: serde::Deserialize<'de> + Clone + Ord + Hash,
{
    type Value = ConsedMultiMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a map from keys to sequences of values")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let factory = MultiMapFactory::new();
        let mut multimap = factory.make([]);
        while let Some((key, values)) = access.next_entry::<K, Vec<V>>()? {
            for value in values {
                multimap.insert(key.clone(), value);
            }
        }
        Ok(multimap)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for ConsedMultiMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + Hash,
    V: serde::Deserialize<'de> + Clone + Ord + Hash,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(ConsedMultiMapVisitor {
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

    fn factory() -> MultiMapFactory<i32, String> {
        MultiMapFactory::new()
    }

    fn pair(key: i32, value: &str) -> (i32, String) {
        (key, value.to_string())
    }

    #[rstest]
    fn test_make_collapses_duplicates() {
        let mm = factory().make([pair(1, "a"), pair(1, "a"), pair(1, "b")]);
        assert_eq!(mm.len(), 2);
        assert_eq!(mm.key_len(), 1);
    }

    #[rstest]
    fn test_insert_then_contains() {
        let mut mm = factory().make([]);
        assert!(mm.insert(1, "a".to_string()));
        assert!(mm.contains(&1, &"a".to_string()));
        assert!(mm.contains_key(&1));
        assert!(!mm.contains(&1, &"b".to_string()));
        assert!(!mm.contains_key(&2));
    }

    #[rstest]
    fn test_insert_duplicate_pair_is_noop() {
        let mut mm = factory().make([pair(1, "a")]);
        let before = mm.clone();
        assert!(!mm.insert(1, "a".to_string()));
        assert!(mm.same_version(&before));
    }

    #[rstest]
    fn test_len_counts_pairs_key_len_counts_keys() {
        let mm = factory().make([pair(1, "a"), pair(1, "b"), pair(2, "c")]);
        assert_eq!(mm.len(), 3);
        assert_eq!(mm.key_len(), 2);
    }

    #[rstest]
    fn test_remove_pair_keeps_remaining_values() {
        let mut mm = factory().make([pair(1, "a"), pair(1, "b")]);
        assert!(mm.remove(&1, &"a".to_string()));
        assert!(!mm.contains(&1, &"a".to_string()));
        assert!(mm.contains(&1, &"b".to_string()));
        assert!(mm.contains_key(&1));
        assert_eq!(mm.len(), 1);
    }

    #[rstest]
    fn test_removing_last_value_removes_the_key() {
        let mut mm = factory().make([pair(1, "a"), pair(2, "b")]);
        assert!(mm.remove(&1, &"a".to_string()));
        assert!(!mm.contains_key(&1));
        assert_eq!(mm.key_len(), 1);
        assert_eq!(mm.len(), 1);
    }

    #[rstest]
    fn test_remove_absent_pair_is_noop() {
        let mut mm = factory().make([pair(1, "a")]);
        let before = mm.clone();
        assert!(!mm.remove(&1, &"z".to_string()));
        assert!(!mm.remove(&9, &"a".to_string()));
        assert!(mm.same_version(&before));
    }

    #[rstest]
    fn test_remove_key_drops_all_values() {
        let mut mm = factory().make([pair(1, "a"), pair(1, "b"), pair(2, "c")]);
        assert!(mm.remove_key(&1));
        assert!(!mm.remove_key(&1));
        assert_eq!(mm.len(), 1);
        assert!(mm.contains(&2, &"c".to_string()));
    }

    #[rstest]
    fn test_first_value_and_values_of() {
        let mm = factory().make([pair(1, "b"), pair(1, "a"), pair(1, "c")]);
        assert_eq!(mm.first_value(&1), Some(&"a".to_string()));
        assert_eq!(mm.first_value(&9), None);

        let values: Vec<&String> = mm.values_of(&1).collect();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], &"a".to_string());
        assert_eq!(values[2], &"c".to_string());

        assert_eq!(mm.values_of(&9).count(), 0);
    }

    #[rstest]
    fn test_iter_flattens_pairs_in_order() {
        let mm = factory().make([pair(2, "c"), pair(1, "b"), pair(1, "a")]);
        let pairs: Vec<(i32, String)> = mm
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect();
        assert_eq!(pairs, vec![pair(1, "a"), pair(1, "b"), pair(2, "c")]);
    }

    #[rstest]
    fn test_same_factory_equality_by_identity() {
        let shared = factory();
        let forward = shared.make([pair(1, "a"), pair(1, "b"), pair(2, "c")]);
        let backward = shared.make([pair(2, "c"), pair(1, "b"), pair(1, "a")]);
        assert!(forward.same_version(&backward));
        assert_eq!(forward, backward);
    }

    #[rstest]
    fn test_cross_factory_equality_falls_back_to_contents() {
        let left = factory().make([pair(1, "a"), pair(2, "b")]);
        let right = factory().make([pair(2, "b"), pair(1, "a")]);
        assert!(!left.same_version(&right));
        assert_eq!(left, right);

        let different = factory().make([pair(1, "a")]);
        assert_ne!(left, different);
    }

    #[rstest]
    fn test_clone_is_independent_snapshot() {
        let mut mm = factory().make([pair(1, "a")]);
        let snapshot = mm.clone();
        mm.insert(1, "b".to_string());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(mm.len(), 2);
    }

    #[rstest]
    fn test_two_level_consistency_after_updates() {
        let mut mm = factory().make([]);
        mm.insert(1, "x".to_string());
        mm.insert(1, "y".to_string());
        mm.insert(2, "x".to_string());

        // inner membership agrees with the flattened view
        assert!(mm.contains(&1, &"y".to_string()));
        let flattened: Vec<(i32, String)> = mm
            .iter()
            .map(|(key, value)| (*key, value.clone()))
            .collect();
        assert_eq!(
            flattened,
            vec![pair(1, "x"), pair(1, "y"), pair(2, "x")]
        );

        mm.remove(&1, &"x".to_string());
        mm.remove(&1, &"y".to_string());
        assert!(!mm.contains_key(&1));
        assert_eq!(mm.len(), 1);
    }

    #[rstest]
    fn test_display() {
        let mm = factory().make([pair(1, "b"), pair(1, "a"), pair(2, "c")]);
        assert_eq!(format!("{mm}"), "{1: {a, b}, 2: {c}}");
    }
}

// =============================================================================
// Send + Sync Tests (arc feature only)
// =============================================================================

#[cfg(all(test, feature = "arc"))]
mod send_sync_tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(MultiMapFactory<i32, String>: Send, Sync);
    assert_impl_all!(ConsedMultiMap<i32, String>: Send, Sync);
}
