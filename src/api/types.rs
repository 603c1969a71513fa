//! Serde types matching the Visual Board API.
//!
//! `Post` doubles as the cached entity: fields the cache doesn't care about
//! are still round-tripped so a cached copy renders like a fresh one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cache::Cacheable;

// ============================================================================
// Posts
// ============================================================================

/// An image post as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
  pub id: i64,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub image_url: String,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub tags: Vec<String>,
  #[serde(default)]
  pub user_id: String,
  #[serde(default)]
  pub author: String,
  pub created_at: String,
  #[serde(default)]
  pub updated_at: Option<String>,
  /// `None` on posts written before the flag existed; only `Some(false)` hides a post
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_active: Option<bool>,
  // Catch-all so unknown fields survive a trip through the cache
  #[serde(flatten)]
  pub extra: BTreeMap<String, serde_json::Value>,
}

impl Post {
  /// Display name for the author, falling back to the owning user id.
  pub fn author_name(&self) -> &str {
    if self.author.is_empty() {
      &self.user_id
    } else {
      &self.author
    }
  }
}

impl Cacheable for Post {
  fn cache_key(&self) -> String {
    self.id.to_string()
  }

  fn created_at(&self) -> &str {
    &self.created_at
  }

  fn is_active(&self) -> bool {
    self.is_active != Some(false)
  }
}

/// Body for creating a post or replacing one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub image_url: String,
  #[serde(default)]
  pub tags: Vec<String>,
}

/// Body for a partial update. Only the keys that are set are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPatch {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub tags: Option<Vec<String>>,
}

impl PostPatch {
  pub fn is_empty(&self) -> bool {
    self == &PostPatch::default()
  }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paginated<T> {
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
  #[serde(default)]
  pub total: u64,
  #[serde(default = "first_page")]
  pub page: u32,
  #[serde(default)]
  pub per_page: u32,
  #[serde(default)]
  pub total_pages: u32,
}

fn first_page() -> u32 {
  1
}

// ============================================================================
// Discover
// ============================================================================

/// An image from the third-party discover feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverItem {
  pub id: String,
  #[serde(default)]
  pub title: Option<String>,
  pub image_url: String,
  #[serde(default)]
  pub author: String,
  #[serde(default)]
  pub author_url: String,
  #[serde(default)]
  pub likes: u64,
  #[serde(default = "default_source")]
  pub source: String,
}

fn default_source() -> String {
  "unsplash".to_string()
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
  pub id: i64,
  pub username: String,
  pub email: String,
  #[serde(default)]
  pub full_name: Option<String>,
  pub created_at: String,
  #[serde(default)]
  pub last_login: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterUser {
  pub username: String,
  pub email: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_name: Option<String>,
  pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
  pub username_or_email: String,
  pub password: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsernameAvailability {
  pub username: String,
  pub available: bool,
}

// ============================================================================
// Upload / health
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UploadedImage {
  pub image_url: String,
  #[serde(default)]
  pub filename: Option<String>,
  #[serde(default)]
  pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HealthStatus {
  pub status: String,
  #[serde(default)]
  pub timestamp: Option<String>,
  #[serde(default)]
  pub services: BTreeMap<String, bool>,
}

impl HealthStatus {
  pub fn is_healthy(&self) -> bool {
    self.status == "healthy"
  }
}

// ============================================================================
// Image health
// ============================================================================

/// Answer to reactivating a post whose image had broken.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reactivation {
  pub post_id: i64,
  pub is_active: bool,
  #[serde(default)]
  pub message: String,
}

/// Backend-wide image check statistics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageHealthStats {
  pub total_posts: u64,
  pub active_posts: u64,
  pub inactive_posts: u64,
  /// Not checked within the last 24 hours
  #[serde(default)]
  pub unchecked_posts: u64,
  pub health_percentage: f64,
}

/// Acknowledgement of a background image check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageCheckStarted {
  #[serde(default)]
  pub message: String,
  /// "user" or "global"
  pub scope: String,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
  pub detail: serde_json::Value,
}

impl ApiErrorBody {
  /// Human readable message from a `detail` field.
  /// Detail is either a string or, for validation errors, a list of
  /// objects with a "msg" field.
  pub fn message(&self) -> String {
    if let Some(s) = self.detail.as_str() {
      return s.to_string();
    }

    if let Some(items) = self.detail.as_array() {
      let msgs: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
        .collect();
      if !msgs.is_empty() {
        return msgs.join("; ");
      }
    }

    self.detail.to_string()
  }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Option<Vec<String>> = Option::deserialize(deserializer)?;
  Ok(v.unwrap_or_default())
}
