//! Core traits and types for the caching system.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Mutex;

/// Trait for entities that can be cached in a post snapshot.
///
/// Implementors provide a unique cache key (the merge key) and the creation
/// timestamp used for ordering and incremental fetching.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier for this entity (e.g., post id)
  fn cache_key(&self) -> String;

  /// Creation timestamp (ISO 8601).
  fn created_at(&self) -> &str;

  /// Whether the entity should be shown. Entities that don't track
  /// visibility are always active.
  fn is_active(&self) -> bool {
    true
  }
}

/// Indicates where a page of data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Sliced from the local snapshot, no network round trip
  Cache,
  /// Built from a backend response (cold load or incremental merge)
  Network,
}

/// Source of "now" for cache timestamps and validity checks.
pub trait Clock: Send + Sync + 'static {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Clock that only moves when told to. Used to simulate cache ageing.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(start),
    }
  }

  pub fn set(&self, now: DateTime<Utc>) {
    if let Ok(mut guard) = self.now.lock() {
      *guard = now;
    }
  }

  pub fn advance(&self, by: chrono::Duration) {
    if let Ok(mut guard) = self.now.lock() {
      *guard += by;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self.now.lock().map(|t| *t).unwrap_or_else(|e| *e.into_inner())
  }
}

/// Parse a timestamp as written by the backend or by the cache.
///
/// Accepts RFC 3339 (`2024-05-01T10:00:00.000Z`, `+02:00` offsets) and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]`, which is taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
    .map(|dt| dt.and_utc())
}
