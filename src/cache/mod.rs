//! Entity caching: typed hierarchical keys and the shared in-memory store.
//!
//! - Keys form a prefix hierarchy; invalidating a prefix hits the subtree.
//! - Reads go through [`EntityCache::fetch`] with at-most-one-load-per-key.
//! - Writes never touch the cache directly; the mutation dispatcher applies
//!   an [`InvalidationSet`] after the backend confirms the write.

mod key;
mod store;

pub use key::{keys, CacheKey, InvalidationSet, KeyPart};
pub use store::{CacheConfig, EntityCache};
