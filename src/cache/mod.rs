//! Local post cache with offline-first reads.
//!
//! This module provides the persistence half of the sync engine:
//! - A string key-value storage seam (SQLite on disk, in-memory, or disabled)
//! - A post snapshot (post list + watermark timestamp) on top of it
//! - A pure merge of cached and freshly fetched posts by key
//! - A fixed five minute validity window

mod storage;
mod store;
mod traits;

pub use storage::{KeyValueStore, MemoryStorage, NoopStorage, SqliteStorage};
pub use store::{
  merge_posts, sort_newest_first, CacheKeys, CachedSnapshot, PostCache, CACHE_DURATION,
};
pub use traits::{parse_timestamp, CacheSource, Cacheable, Clock, ManualClock, SystemClock};
