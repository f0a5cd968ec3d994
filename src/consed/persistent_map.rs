//! Functional persistent map surface.
//!
//! [`PersistentMap`] exposes the engine's functional operations directly:
//! every update returns a new map value while the original stays valid
//! and unchanged. Contrast with [`ConsedMap`](super::ConsedMap), which
//! wraps the same engine in a mutable-collection API.
//!
//! Each root map owns an allocator that is threaded through its whole
//! update history, so all versions derived from one starting map share
//! structure maximally and compare by pointer in O(1).
//!
//! # Examples
//!
//! ```rust
//! use treecons::consed::PersistentMap;
//!
//! let m0 = PersistentMap::new();
//! let m1 = m0.put(1, "a");
//! let m2 = m1.put(2, "b");
//! let m3 = m2.put(3, "c");
//!
//! // every version remains a valid snapshot
//! assert_eq!(m1.get(&1), Some(&"a"));
//! assert_eq!(m1.get(&2), None);
//! assert_eq!(m3.get(&2), Some(&"b"));
//! assert_eq!(m3.len(), 3);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

use super::allocator::{Allocator, AllocatorRef};
use super::node::{self, NodeRef, Value};
use super::ReferenceCounter;

// =============================================================================
// PersistentMap Definition
// =============================================================================

/// A persistent map over a hash-consed treap.
///
/// `put`, `remove` and `put_all` are pure: they return a new map and
/// never touch the receiver. Updates that change nothing return a map
/// sharing the receiver's root, detectable in O(1) with
/// [`same_version`](Self::same_version).
///
/// # Time Complexity
///
/// | Operation      | Complexity          |
/// |----------------|---------------------|
/// | `new`          | O(1)                |
/// | `get`          | O(log N) expected   |
/// | `put`          | O(log N) expected   |
/// | `remove`       | O(log N) expected   |
/// | `put_all`      | O(M·log(N/M + 1)) expected |
/// | `clone`        | O(1)                |
/// | `len`          | O(1)                |
/// | `same_version` | O(1)                |
pub struct PersistentMap<K, V> {
    root: Option<NodeRef<K, Value<V>>>,
    allocator: AllocatorRef<K, Value<V>>,
}

impl<K, V> PersistentMap<K, V> {
    /// Creates an empty map with a fresh allocator.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use treecons::consed::PersistentMap;
    ///
    /// let map: PersistentMap<i32, String> = PersistentMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: None,
            allocator: ReferenceCounter::new(Allocator::new()),
        }
    }

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

    /// Returns an empty map that keeps this map's allocator, so versions
    /// built from it still deduplicate against surviving history.
    #[must_use]
    pub fn remove_all(&self) -> Self {
        Self {
            root: None,
            allocator: self.allocator.clone(),
        }
    }

    /// Whether two maps are the same version: derived through the same
    /// allocator and holding pointer-equal roots. O(1).
    ///
    /// Same-version maps are always equal; the converse holds for maps
    /// sharing an allocator, where equal contents converge to one root.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.allocator, &other.allocator)
            && node::same_node(self.root.as_ref(), other.root.as_ref())
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> PersistentMap<K, V> {
    /// Creates a map containing a single entry.
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().put(key, value)
    }

    /// Returns a reference to the value for `key`, if any.
    ///
    /// The key may be any borrowed form of the map's key type, with an
    /// ordering consistent with the key type's.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use treecons::consed::PersistentMap;
    ///
    /// let map = PersistentMap::new().put("hello".to_string(), 42);
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
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

    /// Returns a new map that also maps `key` to `value`.
    ///
    /// The receiver is unchanged. If the entry was already present
    /// unchanged, the result shares the receiver's root.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use treecons::consed::PersistentMap;
    ///
    /// let map1 = PersistentMap::new().put(1, "one");
    /// let map2 = map1.put(1, "ONE");
    ///
    /// assert_eq!(map1.get(&1), Some(&"one")); // original unchanged
    /// assert_eq!(map2.get(&1), Some(&"ONE")); // new version
    /// ```
    #[must_use]
    pub fn put(&self, key: K, value: V) -> Self {
        let new_root = node::put(self.root.as_ref(), key, Value(value), &self.allocator);
        Self {
            root: Some(new_root),
            allocator: self.allocator.clone(),
        }
    }

    /// Returns a new map without an entry for `key`.
    ///
    /// If `key` is absent the result shares the receiver's root.
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let new_root = node::remove(self.root.as_ref(), key, &self.allocator);
        Self {
            root: new_root,
            allocator: self.allocator.clone(),
        }
    }

    /// Returns a new map holding every entry of both maps, with `other`'s
    /// values winning on key conflicts.
    ///
    /// Maps sharing this map's allocator take the divide-and-conquer
    /// union path with its O(1) identity shortcuts; others are folded in
    /// entry by entry.
    #[must_use]
    pub fn put_all(&self, other: &Self) -> Self {
        if ReferenceCounter::ptr_eq(&self.allocator, &other.allocator) {
            let new_root = node::union(self.root.as_ref(), other.root.as_ref(), &self.allocator);
            return Self {
                root: new_root,
                allocator: self.allocator.clone(),
            };
        }
        let mut result = self.clone();
        for (key, value) in other.iter() {
            result = result.put(key.clone(), value.clone());
        }
        result
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
    pub fn iter(&self) -> PersistentMapIterator<'_, K, V> {
        let mut nodes = Vec::with_capacity(self.len());
        node::collect_in_order(self.root.as_ref(), &mut nodes);
        PersistentMapIterator {
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

/// Cloning is O(1): the clone shares the root and allocator.
impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            allocator: self.allocator.clone(),
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map = map.put(key, value);
        }
        map
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if ReferenceCounter::ptr_eq(&self.allocator, &other.allocator) {
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

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> Eq for PersistentMap<K, V> {}

/// Hashing is O(1) via the root's cached subtree hash, which depends only
/// on the entry set, never on the history that produced it.
impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> Hash for PersistentMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());
        state.write_u64(node::collection_hash(self.root.as_ref()));
    }
}

impl<K, V> fmt::Debug for PersistentMap<K, V>
where
    K: Clone + Ord + Hash + fmt::Debug,
    V: Clone + Eq + Hash + fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> fmt::Display for PersistentMap<K, V>
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

impl<'a, K: Clone + Ord + Hash, V: Clone + Eq + Hash> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentMapIterator<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> IntoIterator for PersistentMap<K, V> {
    type Item = (K, V);
    type IntoIter = PersistentMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let entries: Vec<(K, V)> = self
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        PersistentMapIntoIterator {
            entries,
            current_index: 0,
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over entries of a [`PersistentMap`].
pub struct PersistentMapIterator<'a, K, V> {
    entries: Vec<(&'a K, &'a V)>,
    current_index: usize,
}

impl<'a, K, V> Iterator for PersistentMapIterator<'a, K, V> {
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

impl<K, V> ExactSizeIterator for PersistentMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.current_index)
    }
}

/// An owning iterator over entries of a [`PersistentMap`].
pub struct PersistentMapIntoIterator<K, V> {
    entries: Vec<(K, V)>,
    current_index: usize,
}

impl<K: Clone, V: Clone> Iterator for PersistentMapIntoIterator<K, V> {
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

impl<K: Clone, V: Clone> ExactSizeIterator for PersistentMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.entries.len().saturating_sub(self.current_index)
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<K, V> serde::Serialize for PersistentMap<K, V>
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
struct PersistentMapVisitor<K, V> {
    key_marker: std::marker::PhantomData<K>,
    value_marker: std::marker::PhantomData<V>,
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::de::Visitor<'de> for PersistentMapVisitor<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + Hash,
    V: serde::Deserialize<'de> + Clone + Eq + Hash,
{
    type Value = PersistentMap<K, V>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a map")
    }

    fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut map = PersistentMap::new();
        while let Some((key, value)) = access.next_entry()? {
            map = map.put(key, value);
        }
        Ok(map)
    }
}

#[cfg(feature = "serde")]
impl<'de, K, V> serde::Deserialize<'de> for PersistentMap<K, V>
where
    K: serde::Deserialize<'de> + Clone + Ord + Hash,
    V: serde::Deserialize<'de> + Clone + Eq + Hash,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_map(PersistentMapVisitor {
            key_marker: std::marker::PhantomData,
            value_marker: std::marker::PhantomData,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================


#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_serialize_in_key_order() {
        let map = PersistentMap::new()
            .put("b".to_string(), 2)
            .put("a".to_string(), 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"a":1,"b":2}"#);
    }

    #[rstest]
    fn test_roundtrip() {
        let original = PersistentMap::new()
            .put("a".to_string(), 1)
            .put("b".to_string(), 2);
        let json = serde_json::to_string(&original).unwrap();
        let restored: PersistentMap<String, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(original, restored);
    }
}
