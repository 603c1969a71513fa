//! Post mutations that keep the local snapshot honest.

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use super::sync::PostFeed;
use crate::api::types::Reactivation;
use crate::api::{NewPost, Post, PostPatch, PostsApi};
use crate::cache::{Clock, KeyValueStore, SystemClock};

/// Write operations on posts.
///
/// Every successful mutation drops the cached snapshot, so the next page
/// load rebuilds it from the backend.
pub struct PostEditor<A, S, C = SystemClock> {
  feed: PostFeed<A, S, C>,
}

impl<A: PostsApi, S: KeyValueStore, C: Clock> PostEditor<A, S, C> {
  pub fn new(feed: PostFeed<A, S, C>) -> Self {
    Self { feed }
  }

  /// Fetch a single post (read only, cache untouched).
  pub async fn get(&self, id: i64) -> Result<Post> {
    self.feed.api().get(id).await
  }

  pub async fn create(&self, post: &NewPost) -> Result<Post> {
    let created = self.feed.api().create(post).await?;
    info!(id = created.id, "created post");
    self.feed.invalidate().await;
    Ok(created)
  }

  /// Replace all fields of a post.
  pub async fn update(&self, id: i64, post: &NewPost) -> Result<Post> {
    let updated = self.feed.api().update(id, post).await?;
    info!(id, "replaced post");
    self.feed.invalidate().await;
    Ok(updated)
  }

  /// Change only the fields set in `patch`.
  pub async fn partial_update(&self, id: i64, patch: &PostPatch) -> Result<Post> {
    if patch.is_empty() {
      return Err(eyre!("Nothing to update for post {}", id));
    }
    let updated = self.feed.api().partial_update(id, patch).await?;
    info!(id, "updated post");
    self.feed.invalidate().await;
    Ok(updated)
  }

  pub async fn delete(&self, id: i64) -> Result<()> {
    self.feed.api().delete(id).await?;
    info!(id, "deleted post");
    self.feed.invalidate().await;
    Ok(())
  }

  /// Bring back a post hidden for a broken image, optionally with a new one.
  pub async fn reactivate(&self, id: i64, new_image_url: Option<&str>) -> Result<Reactivation> {
    let reactivated = self.feed.api().reactivate(id, new_image_url).await?;
    info!(id, "reactivated post");
    self.feed.invalidate().await;
    Ok(reactivated)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::feed::testing::{feed_with, posts, FakeApi};
  use futures::StreamExt;
  use std::sync::Arc;

  fn new_post(title: &str) -> NewPost {
    NewPost {
      title: title.to_string(),
      description: Some("desc".to_string()),
      image_url: "https://img.example.com/new.jpg".to_string(),
      tags: vec!["sky".to_string()],
    }
  }

  #[tokio::test]
  async fn test_create_invalidates_cache() {
    let api = Arc::new(FakeApi::with_posts(posts(1..=3)));
    let (feed, _clock) = feed_with(api.clone(), MemoryStorage::new());
    feed.cache().save_posts(&posts(1..=3));
    let editor = PostEditor::new(feed.clone());

    let created = editor.create(&new_post("Fresh")).await.unwrap();
    assert_eq!(created.id, 4);
    assert_eq!(api.stored(4).unwrap().title, "Fresh");
    assert!(feed.cache().get_cached_posts().is_none());
  }

  #[tokio::test]
  async fn test_update_and_patch_invalidate_cache() {
    let api = Arc::new(FakeApi::with_posts(posts(1..=3)));
    let (feed, _clock) = feed_with(api.clone(), MemoryStorage::new());
    let editor = PostEditor::new(feed.clone());

    feed.cache().save_posts(&posts(1..=3));
    editor.update(2, &new_post("Replaced")).await.unwrap();
    assert!(feed.cache().get_cached_posts().is_none());

    feed.cache().save_posts(&posts(1..=3));
    let patch = PostPatch {
      tags: Some(vec!["night".to_string()]),
      ..Default::default()
    };
    let patched = editor.partial_update(2, &patch).await.unwrap();
    assert_eq!(patched.title, "Replaced");
    assert_eq!(patched.tags, vec!["night".to_string()]);
    assert!(feed.cache().get_cached_posts().is_none());
  }

  #[tokio::test]
  async fn test_delete_invalidates_cache() {
    let api = Arc::new(FakeApi::with_posts(posts(1..=3)));
    let (feed, _clock) = feed_with(api.clone(), MemoryStorage::new());
    feed.cache().save_posts(&posts(1..=3));
    let editor = PostEditor::new(feed.clone());

    editor.delete(3).await.unwrap();
    assert!(api.stored(3).is_none());
    assert!(feed.cache().get_cached_posts().is_none());
  }

  #[tokio::test]
  async fn test_reactivate_invalidates_cache() {
    let mut hidden = posts(1..=3);
    hidden[0].is_active = Some(false);
    let api = Arc::new(FakeApi::with_posts(hidden.clone()));
    let (feed, _clock) = feed_with(api.clone(), MemoryStorage::new());
    feed.cache().save_posts(&hidden);
    let editor = PostEditor::new(feed.clone());

    let done = editor
      .reactivate(3, Some("https://img.example.com/fixed.jpg"))
      .await
      .unwrap();
    assert!(done.is_active);

    let stored = api.stored(3).unwrap();
    assert_eq!(stored.is_active, Some(true));
    assert_eq!(stored.image_url, "https://img.example.com/fixed.jpg");
    assert!(feed.cache().get_cached_posts().is_none());
  }

  #[tokio::test]
  async fn test_failed_write_keeps_cache() {
    let api = Arc::new(FakeApi::with_posts(posts(1..=3)));
    let (feed, _clock) = feed_with(api.clone(), MemoryStorage::new());
    feed.cache().save_posts(&posts(1..=3));
    let editor = PostEditor::new(feed.clone());

    assert!(editor.delete(99).await.is_err());
    assert!(editor.reactivate(99, None).await.is_err());
    assert!(editor
      .partial_update(1, &PostPatch::default())
      .await
      .is_err());
    assert_eq!(feed.cache().get_cached_posts().unwrap().posts.len(), 3);
  }

  #[tokio::test]
  async fn test_next_load_after_write_is_cold() {
    let api = Arc::new(FakeApi::with_posts(posts(1..=3)));
    let (feed, _clock) = feed_with(api.clone(), MemoryStorage::new());
    feed.cache().save_posts(&posts(1..=3));
    let editor = PostEditor::new(feed.clone());

    editor.create(&new_post("Fresh")).await.unwrap();

    let events: Vec<_> = feed.load_page(1).collect().await;
    match &events[0] {
      crate::feed::PageEvent::Loaded { view, source } => {
        assert_eq!(*source, crate::cache::CacheSource::Network);
        assert_eq!(view.total, 4);
        assert_eq!(view.items[0].title, "Fresh");
      }
      other => panic!("unexpected event {:?}", other),
    }
  }
}
