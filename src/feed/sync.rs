//! Per-page fetch controller sitting between the posts API and the cache.
//!
//! `load_page` answers from the local snapshot when it can and then corrects
//! itself from the backend:
//!
//! 1. Cold cache: fetch the page, emit it, and on page 1 prime the snapshot
//!    with up to [`PRIME_LIMIT`] posts.
//! 2. Warm cache: emit the cached slice right away, then fetch everything
//!    created after the watermark. If anything came back, merge, persist and
//!    emit the corrected slice.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::pagination::{PageView, PER_PAGE};
use crate::api::{ListParams, Post, PostsApi};
use crate::cache::{
  merge_posts, sort_newest_first, CacheSource, CachedSnapshot, Clock, KeyValueStore, PostCache,
  SystemClock,
};

/// Most posts fetched when priming or incrementally refreshing the cache.
pub const PRIME_LIMIT: u32 = 1000;

/// One emission of a page load.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
  /// A page to show; later events replace earlier ones
  Loaded {
    view: PageView<Post>,
    source: CacheSource,
  },
  /// The load failed; nothing else follows
  Failed(String),
}

/// Emissions of a single `load_page` call, in order. Ends when the load
/// (including any background refresh) is complete.
#[derive(Debug)]
pub struct PageStream {
  rx: mpsc::UnboundedReceiver<PageEvent>,
}

impl PageStream {
  /// Take the next event without waiting.
  pub fn try_recv(&mut self) -> Result<PageEvent, mpsc::error::TryRecvError> {
    self.rx.try_recv()
  }
}

impl Stream for PageStream {
  type Item = PageEvent;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PageEvent>> {
    self.rx.poll_recv(cx)
  }
}

/// Post feed with an offline-first cache.
pub struct PostFeed<A, S, C = SystemClock> {
  api: Arc<A>,
  cache: Arc<PostCache<Post, S, C>>,
  /// Serializes read-merge-write sequences on the snapshot
  sync_guard: Arc<Mutex<()>>,
}

impl<A, S, C> Clone for PostFeed<A, S, C> {
  fn clone(&self) -> Self {
    Self {
      api: Arc::clone(&self.api),
      cache: Arc::clone(&self.cache),
      sync_guard: Arc::clone(&self.sync_guard),
    }
  }
}

impl<A: PostsApi, S: KeyValueStore, C: Clock> PostFeed<A, S, C> {
  pub fn new(api: Arc<A>, cache: Arc<PostCache<Post, S, C>>) -> Self {
    Self {
      api,
      cache,
      sync_guard: Arc::new(Mutex::new(())),
    }
  }

  pub fn api(&self) -> &Arc<A> {
    &self.api
  }

  pub fn cache(&self) -> &Arc<PostCache<Post, S, C>> {
    &self.cache
  }

  /// Load `page` (1-based).
  ///
  /// With a warm cache the first event is already queued when this returns.
  /// Network work runs on a spawned task, so this must be called from within
  /// a Tokio runtime. Dropping the stream stops delivery but not the cache
  /// update.
  pub fn load_page(&self, page: u32) -> PageStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let feed = self.clone();

    match self.cache.get_cached_posts() {
      Some(snapshot) if !snapshot.posts.is_empty() => {
        debug!(page, cached = snapshot.posts.len(), "serving page from cache");
        let _ = tx.send(PageEvent::Loaded {
          view: PageView::slice(&snapshot.posts, page),
          source: CacheSource::Cache,
        });
        tokio::spawn(async move { feed.refresh_since_watermark(snapshot, page, tx).await });
      }
      _ => {
        tokio::spawn(async move { feed.load_cold(page, tx).await });
      }
    }

    PageStream { rx }
  }

  /// Drop the snapshot so the next load rebuilds it from the backend.
  pub async fn invalidate(&self) {
    let _guard = self.sync_guard.lock().await;
    self.cache.clear();
  }

  /// Manual refresh: invalidate, then reload `page` from the backend.
  pub async fn refresh(&self, page: u32) -> PageStream {
    self.invalidate().await;
    self.load_page(page)
  }

  async fn load_cold(&self, page: u32, tx: mpsc::UnboundedSender<PageEvent>) {
    // Pages are 1-based; page 0 is empty on both paths
    if page == 0 {
      let _ = tx.send(PageEvent::Loaded {
        view: PageView::slice(&[], page),
        source: CacheSource::Network,
      });
      return;
    }

    debug!(page, "no cached posts, fetching page");

    let response = match self.api.list(&ListParams::new(page, PER_PAGE)).await {
      Ok(response) => response,
      Err(e) => {
        warn!(page, error = %e, "failed to load posts");
        let _ = tx.send(PageEvent::Failed(e.to_string()));
        return;
      }
    };

    let has_items = !response.items.is_empty();
    let _ = tx.send(PageEvent::Loaded {
      view: PageView::from_response(response, page),
      source: CacheSource::Network,
    });

    if page == 1 && has_items {
      self.prime_cache().await;
    }
  }

  /// Best effort: failures are logged and the page load still counts as done.
  async fn prime_cache(&self) {
    match self.api.list(&ListParams::new(1, PRIME_LIMIT)).await {
      Ok(response) => {
        let mut posts = response.items;
        sort_newest_first(&mut posts);

        let _guard = self.sync_guard.lock().await;
        if self.cache.save_posts(&posts).is_some() {
          info!(count = posts.len(), "primed post cache");
        }
      }
      Err(e) => warn!(error = %e, "failed to prime post cache"),
    }
  }

  async fn refresh_since_watermark(
    &self,
    snapshot: CachedSnapshot<Post>,
    page: u32,
    tx: mpsc::UnboundedSender<PageEvent>,
  ) {
    let params = ListParams::new(1, PRIME_LIMIT).since(snapshot.timestamp.clone());
    let fresh = match self.api.list(&params).await {
      Ok(response) => response.items,
      Err(e) => {
        warn!(page, error = %e, "failed to check for new posts");
        let _ = tx.send(PageEvent::Failed(e.to_string()));
        return;
      }
    };

    if fresh.is_empty() {
      debug!(since = %snapshot.timestamp, "no new posts");
      return;
    }

    let merged = {
      let _guard = self.sync_guard.lock().await;
      // Merge into whatever is stored now; another load may have saved since
      match self.cache.get_cached_posts() {
        Some(current) => {
          let merged = merge_posts(&current.posts, &fresh);
          self.cache.save_posts(&merged);
          merged
        }
        None => {
          debug!("cache cleared during refresh, not persisting merge");
          merge_posts(&snapshot.posts, &fresh)
        }
      }
    };

    info!(page, new = fresh.len(), total = merged.len(), "merged new posts");
    let _ = tx.send(PageEvent::Loaded {
      view: PageView::slice(&merged, page),
      source: CacheSource::Network,
    });
  }
}
