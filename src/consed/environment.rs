//! Scoped environment with O(1) marks, built on [`PersistentMap`].
//!
//! A [`PersistentEnvironment`] behaves like a mutable map of bindings
//! with one extra power: taking a [`mark`](PersistentEnvironment::mark)
//! captures the complete current state in O(1), and
//! [`undo_to_mark`](PersistentEnvironment::undo_to_mark) restores it in
//! O(1), no matter how many bindings changed in between. Useful for
//! scope entry/exit in interpreters and analyses.
//!
//! # Examples
//!
//! ```rust
//! use treecons::consed::PersistentEnvironment;
//!
//! let mut env = PersistentEnvironment::new();
//! env.put("x", 1);
//!
//! let scope = env.mark();
//! env.put("x", 2);
//! env.put("y", 3);
//! assert_eq!(env.get(&"x"), Some(&2));
//!
//! env.undo_to_mark(&scope);
//! assert_eq!(env.get(&"x"), Some(&1));
//! assert_eq!(env.get(&"y"), None);
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use super::persistent_map::PersistentMap;

// =============================================================================
// PersistentEnvironment Definition
// =============================================================================

/// A mutable binding environment backed by a persistent map.
pub struct PersistentEnvironment<K, V> {
    map: PersistentMap<K, V>,
}

/// A captured environment state; restore it with
/// [`PersistentEnvironment::undo_to_mark`].
pub struct EnvironmentMark<K, V> {
    map: PersistentMap<K, V>,
}

impl<K, V> PersistentEnvironment<K, V> {
    /// Creates an environment with no bindings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: PersistentMap::new(),
        }
    }

    /// Returns the number of bindings.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if there are no bindings.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Captures the complete current state in O(1).
    #[must_use]
    pub fn mark(&self) -> EnvironmentMark<K, V> {
        EnvironmentMark {
            map: self.map.clone(),
        }
    }

    /// Restores the state captured by `mark` in O(1), undoing every
    /// change made since.
    pub fn undo_to_mark(&mut self, mark: &EnvironmentMark<K, V>) {
        self.map = mark.map.clone();
    }
}

impl<K: Clone + Ord + Hash, V: Clone + Eq + Hash> PersistentEnvironment<K, V> {
    /// Returns the value bound to `key`, if any.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.get(key)
    }

    /// Returns `true` if `key` is bound.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Binds `key` to `value`, returning the previous binding if there
    /// was one.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let previous = self.map.get(&key).cloned();
        self.map = self.map.put(key, value);
        previous
    }

    /// Removes the binding for `key`, returning it if there was one.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let previous = self.map.get(key).cloned();
        if previous.is_some() {
            self.map = self.map.remove(key);
        }
        previous
    }

    /// Drops every binding. Marks taken earlier still restore.
    pub fn clear(&mut self) {
        // keep the allocator so structure from before the clear is
        // still shared with surviving marks
        self.map = self.map.remove_all();
    }

    /// Returns an iterator over bindings in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }
}

impl<K, V> Default for PersistentEnvironment<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for PersistentEnvironment<K, V>
where
    K: Clone + Ord + Hash + fmt::Debug,
    V: Clone + Eq + Hash + fmt::Debug,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.map.iter()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
