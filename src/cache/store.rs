//! Post snapshot store: persistence of the cached post list plus its
//! watermark timestamp, and the pure merge used by incremental sync.

use chrono::{Duration, SecondsFormat};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::KeyValueStore;
use super::traits::{parse_timestamp, Cacheable, Clock, SystemClock};

/// Bumped whenever the serialized snapshot layout changes.
const SCHEMA_VERSION: u32 = 1;

/// How long a snapshot counts as valid.
pub const CACHE_DURATION: Duration = Duration::minutes(5);

/// A complete snapshot read back from storage.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot<T> {
  /// Cached posts, newest first
  pub posts: Vec<T>,
  /// Watermark: when the snapshot was last known complete (RFC 3339)
  pub timestamp: String,
}

/// Storage keys for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
  pub posts: String,
  pub timestamp: String,
}

impl CacheKeys {
  /// Keys namespaced by schema version and by backend, so two servers (or
  /// two snapshot layouts) never read each other's data.
  pub fn for_backend(base_url: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(base_url.trim_end_matches('/').as_bytes());
    let digest = hex::encode(hasher.finalize());
    let prefix = format!("vboard:v{}:{}", SCHEMA_VERSION, &digest[..12]);

    Self {
      posts: format!("{}:posts", prefix),
      timestamp: format!("{}:timestamp", prefix),
    }
  }
}

/// Locally persisted post snapshot.
///
/// Storage problems never escape this type: a failed write is reported as
/// `None` and a failed or corrupt read looks like a cold cache.
pub struct PostCache<T, S, C = SystemClock> {
  storage: Arc<S>,
  clock: Arc<C>,
  keys: CacheKeys,
  _entity: PhantomData<fn() -> T>,
}

impl<T: Cacheable, S: KeyValueStore> PostCache<T, S, SystemClock> {
  pub fn new(storage: S, keys: CacheKeys) -> Self {
    Self::with_clock(Arc::new(storage), Arc::new(SystemClock), keys)
  }
}

impl<T: Cacheable, S: KeyValueStore, C: Clock> PostCache<T, S, C> {
  pub fn with_clock(storage: Arc<S>, clock: Arc<C>, keys: CacheKeys) -> Self {
    Self {
      storage,
      clock,
      keys,
      _entity: PhantomData,
    }
  }

  pub fn keys(&self) -> &CacheKeys {
    &self.keys
  }

  /// Overwrite the snapshot with `posts`, stamped with the current time.
  ///
  /// Returns the new timestamp, or `None` if the write failed. On failure
  /// both entries are removed so no half-written snapshot stays behind.
  /// An empty list is never stored: the snapshot is cleared instead, since a
  /// watermark without posts would pass for a fresh cache.
  pub fn save_posts(&self, posts: &[T]) -> Option<String> {
    if posts.is_empty() {
      debug!("no posts to save, clearing cache");
      self.clear();
      return None;
    }

    let timestamp = self
      .clock
      .now()
      .to_rfc3339_opts(SecondsFormat::Millis, true);

    let data = match serde_json::to_string(posts) {
      Ok(data) => data,
      Err(e) => {
        warn!(error = %e, "failed to serialize posts for cache");
        self.clear();
        return None;
      }
    };

    let result = self.storage.set_many(&[
      (self.keys.posts.as_str(), data.as_str()),
      (self.keys.timestamp.as_str(), timestamp.as_str()),
    ]);

    match result {
      Ok(()) => {
        debug!(count = posts.len(), %timestamp, "saved posts to cache");
        Some(timestamp)
      }
      Err(e) => {
        warn!(error = %e, count = posts.len(), "failed to save posts to cache");
        self.clear();
        None
      }
    }
  }

  /// Read the snapshot. Missing halves, read errors and corrupt JSON all
  /// come back as `None`.
  pub fn get_cached_posts(&self) -> Option<CachedSnapshot<T>> {
    let posts = self.read(&self.keys.posts)?;
    let timestamp = self.read(&self.keys.timestamp)?;

    match serde_json::from_str::<Vec<T>>(&posts) {
      Ok(posts) => {
        debug!(count = posts.len(), %timestamp, "cache hit");
        Some(CachedSnapshot { posts, timestamp })
      }
      Err(e) => {
        warn!(error = %e, "cached posts are corrupt, treating as cold cache");
        None
      }
    }
  }

  /// Read only the watermark.
  pub fn timestamp(&self) -> Option<String> {
    self.read(&self.keys.timestamp)
  }

  /// Delete the snapshot. Clearing an empty cache is a no-op.
  pub fn clear(&self) {
    for key in [&self.keys.posts, &self.keys.timestamp] {
      if let Err(e) = self.storage.remove(key) {
        warn!(error = %e, key = %key, "failed to remove cache entry");
      }
    }
    debug!("cache cleared");
  }

  /// True when a snapshot was saved less than five minutes ago.
  pub fn is_cache_valid(&self) -> bool {
    let Some(saved_at) = self.timestamp().as_deref().and_then(parse_timestamp) else {
      return false;
    };

    let age = self.clock.now() - saved_at;
    let valid = age < CACHE_DURATION;
    debug!(valid, age_secs = age.num_seconds(), "cache validity");
    valid
  }

  /// Drop inactive posts from the snapshot and re-save what is left. If
  /// nothing is left the snapshot is cleared.
  pub fn filter_inactive_posts(&self) -> Vec<T> {
    let Some(snapshot) = self.get_cached_posts() else {
      return Vec::new();
    };
    if snapshot.posts.is_empty() {
      return Vec::new();
    }

    let before = snapshot.posts.len();
    let active: Vec<T> = snapshot.posts.into_iter().filter(|p| p.is_active()).collect();
    debug!(before, after = active.len(), "filtered inactive posts");
    self.save_posts(&active);
    active
  }

  fn read(&self, key: &str) -> Option<String> {
    match self.storage.get(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(error = %e, key, "failed to read cache entry");
        None
      }
    }
  }
}

/// Merge freshly fetched posts into a cached list.
///
/// Entries are keyed by `cache_key()`; fresh entries replace cached ones with
/// the same key. The result is sorted newest first by `created_at`, with
/// unparseable timestamps last. Pure and deterministic.
pub fn merge_posts<T: Cacheable>(cached: &[T], fresh: &[T]) -> Vec<T> {
  let mut merged: Vec<T> = Vec::with_capacity(cached.len() + fresh.len());
  let mut positions: HashMap<String, usize> = HashMap::with_capacity(merged.capacity());

  for post in cached.iter().chain(fresh) {
    let key = post.cache_key();
    match positions.get(&key) {
      Some(&idx) => merged[idx] = post.clone(),
      None => {
        positions.insert(key, merged.len());
        merged.push(post.clone());
      }
    }
  }

  sort_newest_first(&mut merged);

  debug!(
    merged = merged.len(),
    cached = cached.len(),
    fresh = fresh.len(),
    "merged posts"
  );
  merged
}

/// Stable sort, newest `created_at` first.
pub fn sort_newest_first<T: Cacheable>(posts: &mut [T]) {
  posts.sort_by_cached_key(|p| std::cmp::Reverse(parse_timestamp(p.created_at())));
}
