//! # slicli Cache
//!
//! Bounded in-process store for plugin outputs with TTL expiry and
//! least-recently-accessed eviction. Eviction order is maintained by a
//! min-heap keyed on last access time, with a back-pointer from each entry
//! to its heap slot so hits and removals stay O(log n).

pub mod cache;

pub use cache::{CacheConfig, CacheStats, OutputCache};
