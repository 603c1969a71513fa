//! Offline-first post feed.
//!
//! A page request answers from the local snapshot straight away when one
//! exists, then asks the backend only for posts newer than the snapshot's
//! watermark and emits a corrected page if anything arrived. Without a
//! snapshot the page comes from the network and page 1 primes the cache.

mod editor;
mod pagination;
mod query;
mod sync;
#[cfg(test)]
mod testing;

pub use editor::PostEditor;
pub use pagination::{total_pages, PageView, PER_PAGE};
pub use query::PageQuery;
pub use sync::{PageEvent, PageStream, PostFeed, PRIME_LIMIT};
