//! Presentation-side state for one paginated post view.
//!
//! `PageQuery` owns at most one in-flight [`PageStream`]. Navigating to
//! another page replaces (and drops) the previous stream, so a background
//! refresh that finishes late still updates the cache but can never overwrite
//! the page the user is now looking at.
//!
//! # Example
//!
//! ```ignore
//! let mut query = PageQuery::new();
//! query.load(&feed, 1);
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, re-render
//! }
//! ```

use futures::StreamExt;
use tokio::sync::mpsc::error::TryRecvError;

use super::pagination::PageView;
use super::sync::{PageEvent, PageStream, PostFeed};
use crate::api::{Post, PostsApi};
use crate::cache::{CacheSource, Clock, KeyValueStore};

#[derive(Debug, Default)]
pub struct PageQuery {
  page: u32,
  stream: Option<PageStream>,
  view: Option<PageView<Post>>,
  source: Option<CacheSource>,
  error: Option<String>,
  loading: bool,
}

impl PageQuery {
  pub fn new() -> Self {
    Self {
      page: 1,
      ..Default::default()
    }
  }

  /// A query positioned on `page` that has not loaded anything yet.
  pub fn at(page: u32) -> Self {
    Self {
      page,
      ..Default::default()
    }
  }

  /// Start loading `page`, abandoning whatever was in flight.
  pub fn load<A, S, C>(&mut self, feed: &PostFeed<A, S, C>, page: u32)
  where
    A: PostsApi,
    S: KeyValueStore,
    C: Clock,
  {
    if page != self.page {
      self.view = None;
      self.source = None;
    }
    self.page = page;
    self.error = None;
    self.loading = true;
    self.stream = Some(feed.load_page(page));

    // A warm cache answers synchronously; show it straight away
    self.poll();
  }

  /// Clear the cache and reload the current page from the backend.
  pub async fn refresh<A, S, C>(&mut self, feed: &PostFeed<A, S, C>)
  where
    A: PostsApi,
    S: KeyValueStore,
    C: Clock,
  {
    self.stream = None;
    feed.invalidate().await;
    self.load(feed, self.page);
  }

  /// Drain events that are already available without waiting.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    while let Some(stream) = self.stream.as_mut() {
      match stream.try_recv() {
        Ok(event) => {
          self.apply(event);
          changed = true;
        }
        Err(TryRecvError::Empty) => break,
        Err(TryRecvError::Disconnected) => {
          self.finish();
          changed = true;
        }
      }
    }

    changed
  }

  /// Wait for the next event. Returns `false` once nothing more will arrive.
  pub async fn next(&mut self) -> bool {
    let Some(stream) = self.stream.as_mut() else {
      return false;
    };

    match stream.next().await {
      Some(event) => {
        self.apply(event);
        true
      }
      None => {
        self.finish();
        false
      }
    }
  }

  fn apply(&mut self, event: PageEvent) {
    match event {
      PageEvent::Loaded { view, source } => {
        self.view = Some(view);
        self.source = Some(source);
        self.loading = false;
      }
      PageEvent::Failed(error) => {
        // Nothing follows a failure; keep whatever page is already shown
        self.error = Some(error);
        self.loading = false;
        self.stream = None;
      }
    }
  }

  fn finish(&mut self) {
    self.stream = None;
    self.loading = false;
  }

  pub fn page(&self) -> u32 {
    self.page
  }

  pub fn view(&self) -> Option<&PageView<Post>> {
    self.view.as_ref()
  }

  pub fn source(&self) -> Option<CacheSource> {
    self.source
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }

  /// True until the first page or an error arrives.
  pub fn is_loading(&self) -> bool {
    self.loading
  }

  /// True while the load, including a background refresh, is still running.
  pub fn is_refreshing(&self) -> bool {
    self.stream.is_some()
  }
}
