//! In-memory backend and fixtures for feed tests.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::sync::PostFeed;
use crate::api::types::Reactivation;
use crate::api::{ListParams, NewPost, Paginated, Post, PostPatch, PostsApi};
use crate::cache::{parse_timestamp, CacheKeys, ManualClock, MemoryStorage, PostCache};

/// 2024-06-01T10:00:00Z. Post `n` from [`posts`] is created `n` minutes later.
pub const T0: i64 = 1_717_236_000;

pub type TestFeed = PostFeed<FakeApi, MemoryStorage, ManualClock>;

pub fn post(id: i64, created_secs: i64) -> Post {
  let created_at = DateTime::from_timestamp(created_secs, 0)
    .unwrap()
    .to_rfc3339_opts(SecondsFormat::Secs, true);
  Post {
    id,
    title: format!("Post {}", id),
    description: None,
    image_url: format!("https://img.example.com/{}.jpg", id),
    tags: Vec::new(),
    user_id: "ana".to_string(),
    author: "ana".to_string(),
    created_at,
    updated_at: None,
    is_active: None,
    extra: BTreeMap::new(),
  }
}

/// Posts with the given ids, newest (highest id) first.
pub fn posts(ids: RangeInclusive<i64>) -> Vec<Post> {
  ids.rev().map(|id| post(id, T0 + id * 60)).collect()
}

/// A feed over `api` whose clock starts at 10:25:30, after post 25 and
/// before post 26.
pub fn feed_with(api: Arc<FakeApi>, storage: MemoryStorage) -> (TestFeed, Arc<ManualClock>) {
  let start = DateTime::from_timestamp(T0 + 25 * 60 + 30, 0).unwrap();
  let clock = Arc::new(ManualClock::new(start));
  let cache = PostCache::with_clock(
    Arc::new(storage),
    clock.clone(),
    CacheKeys::for_backend("http://test"),
  );
  (PostFeed::new(api, Arc::new(cache)), clock)
}

/// Backend double that behaves like the real listing endpoint: active posts
/// only, newest first, `min_date` exclusive.
#[derive(Default)]
pub struct FakeApi {
  posts: Mutex<Vec<Post>>,
  calls: Mutex<Vec<ListParams>>,
  next_id: AtomicUsize,
  failure: Mutex<Option<String>>,
  /// Number of calls that still succeed before `failure` kicks in
  ok_calls_left: Mutex<Option<usize>>,
  gated: AtomicBool,
  gate: Notify,
  /// Number of list calls answered normally before lists come back empty
  lists_before_empty: Mutex<Option<usize>>,
}

impl FakeApi {
  pub fn with_posts(posts: Vec<Post>) -> Self {
    let next = posts.iter().map(|p| p.id).max().unwrap_or(0) + 1;
    Self {
      posts: Mutex::new(posts),
      next_id: AtomicUsize::new(next as usize),
      ..Default::default()
    }
  }

  /// Park every list call until [`FakeApi::release`].
  pub fn gated(self) -> Self {
    self.gated.store(true, Ordering::SeqCst);
    self
  }

  pub fn release(&self) {
    self.gated.store(false, Ordering::SeqCst);
    self.gate.notify_waiters();
    self.gate.notify_one();
  }

  /// Make posts visible on the backend.
  pub fn publish(&self, new_posts: Vec<Post>) {
    let mut posts = self.posts.lock().unwrap();
    for post in new_posts {
      posts.retain(|p| p.id != post.id);
      posts.push(post);
    }
  }

  pub fn fail_with(&self, message: &str) {
    *self.failure.lock().unwrap() = Some(message.to_string());
  }

  /// Succeed `n` more times, then fail.
  pub fn fail_after(&self, n: usize) {
    *self.ok_calls_left.lock().unwrap() = Some(n);
    self.fail_with("backend unavailable");
  }

  /// Answer `n` more list calls normally, then return empty pages.
  pub fn empty_after(&self, n: usize) {
    *self.lists_before_empty.lock().unwrap() = Some(n);
  }

  pub fn calls(&self) -> Vec<ListParams> {
    self.calls.lock().unwrap().clone()
  }

  pub fn stored(&self, id: i64) -> Option<Post> {
    self.posts.lock().unwrap().iter().find(|p| p.id == id).cloned()
  }

  fn check_failure(&self) -> Result<()> {
    let mut left = self.ok_calls_left.lock().unwrap();
    if let Some(n) = left.as_mut() {
      if *n > 0 {
        *n -= 1;
        return Ok(());
      }
    }
    match self.failure.lock().unwrap().as_ref() {
      Some(message) => Err(eyre!("{}", message)),
      None => Ok(()),
    }
  }

  fn find(&self, id: i64) -> Result<Post> {
    self.stored(id).ok_or_else(|| eyre!("404 Not Found: Post not found"))
  }
}

#[async_trait]
impl PostsApi for FakeApi {
  async fn list(&self, params: &ListParams) -> Result<Paginated<Post>> {
    self.calls.lock().unwrap().push(params.clone());
    if self.gated.load(Ordering::SeqCst) {
      self.gate.notified().await;
    }
    self.check_failure()?;

    if let Some(left) = self.lists_before_empty.lock().unwrap().as_mut() {
      if *left == 0 {
        return Ok(Paginated {
          items: Vec::new(),
          total: 0,
          page: params.page,
          per_page: params.per_page,
          total_pages: 0,
        });
      }
      *left -= 1;
    }

    let min_date = params.min_date.as_deref().and_then(parse_timestamp);
    let mut matching: Vec<Post> = self
      .posts
      .lock()
      .unwrap()
      .iter()
      .filter(|p| p.is_active != Some(false))
      .filter(|p| match (min_date, parse_timestamp(&p.created_at)) {
        (Some(min), Some(created)) => created > min,
        _ => true,
      })
      .filter(|p| params.user_id.as_ref().map_or(true, |u| &p.user_id == u))
      .cloned()
      .collect();
    matching.sort_by_key(|p| std::cmp::Reverse(parse_timestamp(&p.created_at)));

    let per_page = params.per_page.max(1) as usize;
    let start = (params.page.max(1) as usize - 1) * per_page;
    let total = matching.len() as u64;
    Ok(Paginated {
      items: matching.into_iter().skip(start).take(per_page).collect(),
      total,
      page: params.page,
      per_page: params.per_page,
      total_pages: total.div_ceil(per_page as u64) as u32,
    })
  }

  async fn get(&self, id: i64) -> Result<Post> {
    self.check_failure()?;
    self.find(id)
  }

  async fn create(&self, new: &NewPost) -> Result<Post> {
    self.check_failure()?;
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) as i64;
    let mut created = post(id, T0 + id * 60);
    created.title = new.title.clone();
    created.description = new.description.clone();
    created.image_url = new.image_url.clone();
    created.tags = new.tags.clone();
    self.publish(vec![created.clone()]);
    Ok(created)
  }

  async fn update(&self, id: i64, new: &NewPost) -> Result<Post> {
    self.check_failure()?;
    let mut existing = self.find(id)?;
    existing.title = new.title.clone();
    existing.description = new.description.clone();
    existing.image_url = new.image_url.clone();
    existing.tags = new.tags.clone();
    self.publish(vec![existing.clone()]);
    Ok(existing)
  }

  async fn partial_update(&self, id: i64, patch: &PostPatch) -> Result<Post> {
    self.check_failure()?;
    let mut existing = self.find(id)?;
    if let Some(title) = &patch.title {
      existing.title = title.clone();
    }
    if let Some(description) = &patch.description {
      existing.description = Some(description.clone());
    }
    if let Some(image_url) = &patch.image_url {
      existing.image_url = image_url.clone();
    }
    if let Some(tags) = &patch.tags {
      existing.tags = tags.clone();
    }
    self.publish(vec![existing.clone()]);
    Ok(existing)
  }

  async fn delete(&self, id: i64) -> Result<()> {
    self.check_failure()?;
    self.find(id)?;
    self.posts.lock().unwrap().retain(|p| p.id != id);
    Ok(())
  }

  async fn reactivate(&self, id: i64, new_image_url: Option<&str>) -> Result<Reactivation> {
    self.check_failure()?;
    let mut existing = self.find(id)?;
    if let Some(image_url) = new_image_url {
      existing.image_url = image_url.to_string();
    }
    existing.is_active = Some(true);
    self.publish(vec![existing]);
    Ok(Reactivation {
      post_id: id,
      is_active: true,
      message: "Post reactivated successfully".to_string(),
    })
  }
}
