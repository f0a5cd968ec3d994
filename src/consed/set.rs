//! Set factory and its mutable-shell set front-end.
//!
//! A [`ConsedSet`] is the same engine as [`ConsedMap`](super::ConsedMap)
//! with the element as the key and an empty payload. Sets from one
//! [`SetFactory`] share structure maximally: equality, hashing and
//! cloning are O(1), and the subset test takes divide-and-conquer
//! shortcuts over shared subtrees.
//!
//! # Examples
//!
//! ```rust
//! use treecons::consed::SetFactory;
//!
//! let factory = SetFactory::new();
//! let mut set = factory.make([3, 1, 2]);
//!
//! assert!(set.contains(&2));
//! assert!(!set.insert(3)); // already present
//! assert!(set.remove(&1));
//!
//! let elements: Vec<&i32> = set.iter().collect();
//! assert_eq!(elements, vec![&2, &3]);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::allocator::{Allocator, AllocatorRef};
use super::node::{self, NodeRef};
use super::ReferenceCounter;

// =============================================================================
// SetFactory Definition
// =============================================================================

/// Factory for [`ConsedSet`]s sharing one canonicalizing allocator.
pub struct SetFactory<T> {
    allocator: AllocatorRef<T, ()>,
}

impl<T> SetFactory<T> {
    /// Creates a factory with a fresh allocator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocator: ReferenceCounter::new(Allocator::new()),
        }
    }

    /// Number of canonical nodes currently alive in this factory's
    /// allocator.
    #[must_use]
    pub fn live_nodes(&self) -> usize {
        self.allocator.live_nodes()
    }
}

impl<T: Clone + Ord + Hash> SetFactory<T> {
    /// Makes a set seeded with the given elements.
    pub fn make<I>(&self, seed: I) -> ConsedSet<T>
    where
        I: IntoIterator<Item = T>,
    {
        let mut set = ConsedSet {
            root: None,
            allocator: self.allocator.clone(),
        };
        for element in seed {
            set.insert(element);
        }
        set
    }
}

impl<T> Default for SetFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory clones share the allocator.
impl<T> Clone for SetFactory<T> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
        }
    }
}

// =============================================================================
// ConsedSet Definition
// =============================================================================

/// An ordered set whose nodes are hash-consed through its factory's
/// allocator.
///
/// # Time Complexity
///
/// | Operation      | Complexity            |
/// |----------------|-----------------------|
/// | `contains`     | O(log N) expected     |
/// | `insert`       | O(log N) expected     |
/// | `remove`       | O(log N) expected     |
/// | `union_with`   | O(M·log(N/M + 1)) expected (same factory) |
/// | `is_subset`    | O(M·log(N/M + 1)) expected (same factory) |
/// | `clone`        | O(1)                  |
/// | `eq` / `hash`  | O(1) (same factory)   |
/// | `len`          | O(1)                  |
pub struct ConsedSet<T> {
    root: Option<NodeRef<T, ()>>,
    allocator: AllocatorRef<T, ()>,
}

impl<T> ConsedSet<T> {
    /// Returns the number of elements in the set.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        node::size(self.root.as_ref())
    }

    /// Returns `true` if the set contains no elements.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Removes every element. The previous version survives in any
    /// clones.
    pub fn clear(&mut self) {
        self.root = None;
    }

    /// Whether two sets currently share the same root through the same
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

impl<T: Clone + Ord + Hash> ConsedSet<T> {
    /// Returns `true` if the set contains `element`.
    #[must_use]
    pub fn contains<Q>(&self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        node::get(self.root.as_ref(), element).is_some()
    }

    /// Adds an element, returning `true` if the set changed.
    pub fn insert(&mut self, element: T) -> bool {
        let new_root = node::put(self.root.as_ref(), element, (), &self.allocator);
        let changed = !node::same_node(self.root.as_ref(), Some(&new_root));
        self.root = Some(new_root);
        changed
    }

    /// Removes an element, returning `true` if the set changed.
    pub fn remove<Q>(&mut self, element: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let new_root = node::remove(self.root.as_ref(), element, &self.allocator);
        let changed = !node::same_node(self.root.as_ref(), new_root.as_ref());
        self.root = new_root;
        changed
    }

    /// Adds every element of `other`, returning `true` if the set
    /// changed.
    ///
    /// Sets from the same factory take the divide-and-conquer union path
    /// with its O(1) identity shortcuts; others are inserted element by
    /// element.
    pub fn union_with(&mut self, other: &Self) -> bool {
        if self.same_factory(other) {
            let new_root = node::union(self.root.as_ref(), other.root.as_ref(), &self.allocator);
            let changed = !node::same_node(self.root.as_ref(), new_root.as_ref());
            self.root = new_root;
            return changed;
        }
        let mut changed = false;
        for element in other.iter() {
            changed |= self.insert(element.clone());
        }
        changed
    }

    /// Whether every element of this set occurs in `other`.
    ///
    /// Same-factory sets use the engine's subset walk, which skips shared
    /// subtrees wholesale and rejects by the pigeonhole principle early;
    /// others are checked element by element.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        if self.same_factory(other) {
            return node::contains_all(other.root.as_ref(), self.root.as_ref(), &self.allocator);
        }
        self.len() <= other.len() && self.iter().all(|element| other.contains(element))
    }

    /// Whether every element of `other` occurs in this set.
    #[must_use]
    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }

    /// Returns the smallest element, or `None` on an empty set.
    #[must_use]
    pub fn min(&self) -> Option<&T> {
        node::min(self.root.as_ref()).map(|found| &found.key)
    }

    /// Returns the largest element, or `None` on an empty set.
    #[must_use]
    pub fn max(&self) -> Option<&T> {
        node::max(self.root.as_ref()).map(|found| &found.key)
    }

    /// Returns an iterator over elements in ascending order.
    #[must_use]
    pub fn iter(&self) -> ConsedSetIterator<'_, T> {
        let mut nodes = Vec::with_capacity(self.len());
        node::collect_in_order(self.root.as_ref(), &mut nodes);
        ConsedSetIterator {
            elements: nodes.into_iter().map(|found| &found.key).collect(),
            current_index: 0,
        }
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

/// Cloning is O(1): the clone shares the current root and the factory's
/// allocator, and diverges freely afterwards.
impl<T> Clone for ConsedSet<T> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            allocator: self.allocator.clone(),
        }
    }
}

impl<T: Clone + Ord + Hash> PartialEq for ConsedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_factory(other) {
            return node::same_node(self.root.as_ref(), other.root.as_ref());
        }
        self.len() == other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(self_element, other_element)| self_element == other_element)
    }
}

impl<T: Clone + Ord + Hash> Eq for ConsedSet<T> {}

/// Hashing is O(1) via the root's cached subtree hash.
impl<T: Clone + Ord + Hash> Hash for ConsedSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());
        state.write_u64(node::collection_hash(self.root.as_ref()));
    }
}

impl<T: Clone + Ord + Hash + fmt::Debug> fmt::Debug for ConsedSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Clone + Ord + Hash + fmt::Display> fmt::Display for ConsedSet<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{{")?;
        let mut first = true;
        for element in self.iter() {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{element}")?;
        }
        write!(formatter, "}}")
    }
}

impl<'a, T: Clone + Ord + Hash> IntoIterator for &'a ConsedSet<T> {
    type Item = &'a T;
    type IntoIter = ConsedSetIterator<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Clone + Ord + Hash> IntoIterator for ConsedSet<T> {
    type Item = T;
    type IntoIter = ConsedSetIntoIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        let elements: Vec<T> = self.iter().cloned().collect();
        ConsedSetIntoIterator {
            elements,
            current_index: 0,
        }
    }
}

// =============================================================================
// Iterator Implementation
// =============================================================================

/// An iterator over elements of a [`ConsedSet`].
pub struct ConsedSetIterator<'a, T> {
    elements: Vec<&'a T>,
    current_index: usize,
}

impl<'a, T> Iterator for ConsedSetIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.elements.len() {
            None
        } else {
            let element = self.elements[self.current_index];
            self.current_index += 1;
            Some(element)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.elements.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for ConsedSetIterator<'_, T> {
    fn len(&self) -> usize {
        self.elements.len().saturating_sub(self.current_index)
    }
}

/// An owning iterator over elements of a [`ConsedSet`].
pub struct ConsedSetIntoIterator<T> {
    elements: Vec<T>,
    current_index: usize,
}

impl<T: Clone> Iterator for ConsedSetIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_index >= self.elements.len() {
            None
        } else {
            let element = self.elements[self.current_index].clone();
            self.current_index += 1;
            Some(element)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.elements.len().saturating_sub(self.current_index);
        (remaining, Some(remaining))
    }
}

impl<T: Clone> ExactSizeIterator for ConsedSetIntoIterator<T> {
    fn len(&self) -> usize {
        self.elements.len().saturating_sub(self.current_index)
    }
}

// =============================================================================
// Serde Support
// =============================================================================

#[cfg(feature = "serde")]
impl<T> serde::Serialize for ConsedSet<T>
where
    T: serde::Serialize + Clone + Ord + Hash,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut sequence = serializer.serialize_seq(Some(self.len()))?;
        for element in self.iter() {
            sequence.serialize_element(element)?;
        }
        sequence.end()
    }
}

#[cfg(feature = "serde")]
struct ConsedSetVisitor<T> {
    element_marker: std::marker::PhantomData<T>,
}

#[cfg(feature = "serde")]
impl<'de, T> serde::de::Visitor<'de> for ConsedSetVisitor<T>
where
    T: serde::Deserialize<'de> + Clone + Ord + Hash,
{
    type Value = ConsedSet<T>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a sequence of elements")
    }

    fn visit_seq<A>(self, mut access: A) -> Result<Self::Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let factory = SetFactory::new();
        let mut set = factory.make([]);
        while let Some(element) = access.next_element()? {
            set.insert(element);
        }
        Ok(set)
    }
}

#[cfg(feature = "serde")]
impl<'de, T> serde::Deserialize<'de> for ConsedSet<T>
where
    T: serde::Deserialize<'de> + Clone + Ord + Hash,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_seq(ConsedSetVisitor {
            element_marker: std::marker::PhantomData,
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

    fn factory() -> SetFactory<i32> {
        SetFactory::new()
    }

    #[rstest]
    fn test_make_deduplicates() {
        let set = factory().make([1, 2, 2, 3, 1]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&1));
        assert!(set.contains(&2));
        assert!(set.contains(&3));
    }

    #[rstest]
    fn test_insert_reports_change() {
        let mut set = factory().make([]);
        assert!(set.insert(1));
        assert!(!set.insert(1));
        assert_eq!(set.len(), 1);
    }

    #[rstest]
    fn test_remove_reports_change() {
        let mut set = factory().make([1, 2]);
        assert!(set.remove(&1));
        assert!(!set.remove(&1));
        assert_eq!(set.len(), 1);
    }

    #[rstest]
    fn test_clone_is_independent_snapshot() {
        let mut set = factory().make([1, 2]);
        let snapshot = set.clone();
        set.insert(3);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(set.len(), 3);
    }

    #[rstest]
    fn test_same_factory_equality_by_identity() {
        let shared = factory();
        let forward = shared.make([1, 2, 3]);
        let backward = shared.make([3, 2, 1]);
        assert!(forward.same_version(&backward));
        assert_eq!(forward, backward);
    }

    #[rstest]
    fn test_union_with_same_factory() {
        let shared = factory();
        let mut evens = shared.make([2, 4, 6]);
        let odds = shared.make([1, 3, 5]);
        assert!(evens.union_with(&odds));
        let elements: Vec<&i32> = evens.iter().collect();
        assert_eq!(elements, vec![&1, &2, &3, &4, &5, &6]);

        // union with a subset changes nothing
        let subset = shared.make([2, 3]);
        assert!(!evens.union_with(&subset));
    }

    #[rstest]
    fn test_union_with_cross_factory() {
        let mut left = factory().make([1, 2]);
        let right = factory().make([2, 3]);
        assert!(left.union_with(&right));
        assert_eq!(left.len(), 3);
    }

    #[rstest]
    fn test_is_subset() {
        let shared = factory();
        let container = shared.make([1, 2, 3, 4, 5, 6]);
        let subset = shared.make([2, 4, 6]);
        let not_subset = shared.make([2, 7]);

        assert!(subset.is_subset(&container));
        assert!(container.is_superset(&subset));
        assert!(!not_subset.is_subset(&container));
        assert!(!container.is_subset(&subset));
        assert!(shared.make([]).is_subset(&container));
        assert!(container.is_subset(&container));
    }

    #[rstest]
    fn test_is_subset_cross_factory() {
        let small = factory().make([1, 2]);
        let large = factory().make([1, 2, 3]);
        assert!(small.is_subset(&large));
        assert!(!large.is_subset(&small));
    }

    #[rstest]
    fn test_iteration_sorted_and_min_max() {
        let set = factory().make([5, 1, 3]);
        let elements: Vec<&i32> = set.iter().collect();
        assert_eq!(elements, vec![&1, &3, &5]);
        assert_eq!(set.min(), Some(&1));
        assert_eq!(set.max(), Some(&5));
    }

    #[rstest]
    fn test_display() {
        let set = factory().make([2, 1]);
        assert_eq!(format!("{set}"), "{1, 2}");
    }
}

// =============================================================================
// Send + Sync Tests (arc feature only)
// =============================================================================

#[cfg(all(test, feature = "arc"))]
mod send_sync_tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(SetFactory<i32>: Send, Sync);
    assert_impl_all!(ConsedSet<i32>: Send, Sync);
}
