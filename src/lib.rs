//! # treecons
//!
//! Hash-consed persistent ordered maps, sets and multi-maps.
//!
//! ## Overview
//!
//! Collections in this crate are backed by a persistent binary search
//! tree whose shape depends only on its contents and whose nodes are
//! canonicalized through a shared allocator, so that:
//!
//! - **Updates are non-destructive**: every mutation builds a new version
//!   by copying only the root-to-node path; old versions stay valid.
//! - **Clones are O(1)**: a clone is a root reference, not a copy.
//! - **Equality and hashing are O(1)** between collections from the same
//!   factory: equal contents converge to the same root pointer, and
//!   every node caches a whole-subtree hash.
//!
//! ## Feature Flags
//!
//! - `arc`: use `Arc` instead of `Rc` for node sharing, making all
//!   collections and factories `Send + Sync`
//! - `serde`: Serialize/Deserialize implementations for the collections
//!
//! ## Example
//!
//! ```rust
//! use treecons::prelude::*;
//!
//! let factory = MapFactory::new();
//! let mut map = factory.make([(1, "one"), (2, "two")]);
//! let snapshot = map.clone(); // O(1)
//!
//! map.insert(3, "three");
//! assert_eq!(snapshot.len(), 2);
//!
//! let rebuilt = factory.make([(3, "three"), (2, "two"), (1, "one")]);
//! assert_eq!(map, rebuilt); // O(1): same factory, same root
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Prelude module for convenient imports.
///
/// Re-exports the factories and collection types.
///
/// # Usage
///
/// ```rust
/// use treecons::prelude::*;
/// ```
pub mod prelude {
    pub use crate::consed::*;
}

pub mod consed;
