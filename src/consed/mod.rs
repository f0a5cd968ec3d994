//! Hash-consed persistent tree collections.
//!
//! This module provides ordered collections backed by a persistent binary
//! search tree whose nodes are *hash-consed*: structurally identical
//! subtrees built through the same factory collapse to a single shared
//! instance. That canonicalization turns whole-collection equality and
//! cloning into pointer operations:
//!
//! - [`MapFactory`] / [`ConsedMap`]: a single-valued ordered map
//! - [`SetFactory`] / [`ConsedSet`]: an ordered set
//! - [`MultiMapFactory`] / [`ConsedMultiMap`]: an ordered multi-map
//!   (a map from keys to sets of values)
//! - [`PersistentMap`]: the underlying functional map surface, where
//!   every update returns a new version and old versions stay valid
//! - [`PersistentEnvironment`]: a scoped environment with O(1) marks
//!   built on [`PersistentMap`]
//!
//! # Structural Sharing and Canonicalization
//!
//! Updates copy only the path from the root to the touched node; all
//! other subtrees are reused by reference. Every rebuilt node is routed
//! through a canonicalizing allocator shared by all collections from the
//! same factory, so collections that are structurally equal converge to
//! the same root pointer. Equality and hashing between same-factory
//! collections are therefore O(1), and cloning any collection is O(1).
//!
//! # Examples
//!
//! ## `ConsedMap`
//!
//! ```rust
//! use treecons::consed::MapFactory;
//!
//! let factory = MapFactory::new();
//! let mut map = factory.make([(2, "two"), (1, "one")]);
//! map.insert(3, "three");
//!
//! // Iteration is in key order, never insertion order
//! let keys: Vec<&i32> = map.keys().collect();
//! assert_eq!(keys, vec![&1, &2, &3]);
//!
//! // O(1) clone: both instances share the same root
//! let snapshot = map.clone();
//! map.remove(&1);
//! assert_eq!(snapshot.len(), 3);
//! assert_eq!(map.len(), 2);
//! ```
//!
//! ## `PersistentMap`
//!
//! ```rust
//! use treecons::consed::PersistentMap;
//!
//! let empty = PersistentMap::new();
//! let one = empty.put(1, "one");
//! let two = one.put(2, "two");
//!
//! // Every version remains valid
//! assert_eq!(empty.len(), 0);
//! assert_eq!(one.get(&2), None);
//! assert_eq!(two.get(&2), Some(&"two"));
//! ```
//!
//! ## `ConsedMultiMap`
//!
//! ```rust
//! use treecons::consed::MultiMapFactory;
//!
//! let factory = MultiMapFactory::new();
//! let mut mm = factory.make([(1, "a"), (1, "b"), (2, "c")]);
//! assert!(mm.contains(&1, &"b"));
//! assert_eq!(mm.len(), 3);
//!
//! mm.remove(&2, &"c");
//! assert!(!mm.contains_key(&2));
//! ```

// =============================================================================
// Reference Counter Type Aliases
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

/// Weak counterpart of [`ReferenceCounter`], used by the canonicalizing
/// allocator so that its table never keeps dead subtrees alive.
#[cfg(feature = "arc")]
pub(crate) type WeakReference<T> = std::sync::Weak<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type WeakReference<T> = std::rc::Weak<T>;

mod allocator;
mod environment;
mod map;
mod multimap;
mod node;
mod persistent_map;
mod set;

pub use environment::EnvironmentMark;
pub use environment::PersistentEnvironment;
pub use map::ConsedMap;
pub use map::ConsedMapIntoIterator;
pub use map::ConsedMapIterator;
pub use map::MapFactory;
pub use multimap::ConsedMultiMap;
pub use multimap::ConsedMultiMapIterator;
pub use multimap::ConsedMultiMapValues;
pub use multimap::MultiMapFactory;
pub use persistent_map::PersistentMap;
pub use persistent_map::PersistentMapIntoIterator;
pub use persistent_map::PersistentMapIterator;
pub use set::ConsedSet;
pub use set::ConsedSetIntoIterator;
pub use set::ConsedSetIterator;
pub use set::SetFactory;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::{ReferenceCounter, WeakReference};
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_clone() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(*reference_counter, *reference_counter_clone);
    }

    #[rstest]
    fn test_weak_reference_dies_with_last_strong() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let weak: WeakReference<i32> = ReferenceCounter::downgrade(&reference_counter);
        assert_eq!(weak.upgrade().as_deref(), Some(&42));
        drop(reference_counter);
        assert!(weak.upgrade().is_none());
    }
}
