use crate::api::Paginated;
use crate::cache::Cacheable;

/// Posts per page, for both cached and network pages.
pub const PER_PAGE: u32 = 20;

/// One page of posts as shown to the user. Derived, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PageView<T> {
  pub items: Vec<T>,
  pub total: u64,
  pub total_pages: u32,
  /// Echo of the requested page, not clamped
  pub current_page: u32,
  pub per_page: u32,
}

impl<T> PageView<T> {
  /// Slice `posts` for a 1-based `page`. Page 0 and pages past the end are
  /// empty.
  pub fn slice(posts: &[T], page: u32) -> Self
  where
    T: Clone,
  {
    let items = match page.checked_sub(1) {
      Some(index) => posts
        .iter()
        .skip((index as usize).saturating_mul(PER_PAGE as usize))
        .take(PER_PAGE as usize)
        .cloned()
        .collect(),
      None => Vec::new(),
    };

    Self::new(items, posts.len() as u64, page)
  }

  /// Wrap a backend page, recomputing the page count locally.
  pub fn from_response(response: Paginated<T>, page: u32) -> Self {
    Self::new(response.items, response.total, page)
  }

  fn new(items: Vec<T>, total: u64, page: u32) -> Self {
    Self {
      items,
      total,
      total_pages: total_pages(total),
      current_page: page,
      per_page: PER_PAGE,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn has_next(&self) -> bool {
    self.current_page < self.total_pages
  }

  pub fn has_previous(&self) -> bool {
    self.current_page > 1
  }
}

impl<T: Cacheable> PageView<T> {
  /// Items that should be displayed; inactive posts are suppressed.
  pub fn visible_items(&self) -> impl Iterator<Item = &T> {
    self.items.iter().filter(|p| p.is_active())
  }
}

pub fn total_pages(total: u64) -> u32 {
  total.div_ceil(PER_PAGE as u64) as u32
}

#[cfg(test)]
mod tests {
  use super::*;

  fn numbers(n: u32) -> Vec<u32> {
    (1..=n).collect()
  }

  #[test]
  fn test_first_page() {
    let view = PageView::slice(&numbers(25), 1);
    assert_eq!(view.items, numbers(20));
    assert_eq!(view.total, 25);
    assert_eq!(view.total_pages, 2);
    assert_eq!(view.per_page, 20);
    assert!(view.has_next());
    assert!(!view.has_previous());
  }

  #[test]
  fn test_partial_last_page() {
    let view = PageView::slice(&numbers(25), 2);
    assert_eq!(view.items, vec![21, 22, 23, 24, 25]);
    assert_eq!(view.current_page, 2);
    assert!(!view.has_next());
  }

  #[test]
  fn test_page_past_end_is_empty_not_clamped() {
    let view = PageView::slice(&numbers(25), 9);
    assert!(view.is_empty());
    assert_eq!(view.current_page, 9);
    assert_eq!(view.total_pages, 2);
  }

  #[test]
  fn test_page_zero_is_empty() {
    let view = PageView::slice(&numbers(25), 0);
    assert!(view.is_empty());
    assert_eq!(view.current_page, 0);
    assert_eq!(view.total, 25);
    assert!(!view.has_previous());
  }

  #[test]
  fn test_total_pages() {
    assert_eq!(total_pages(0), 0);
    assert_eq!(total_pages(1), 1);
    assert_eq!(total_pages(20), 1);
    assert_eq!(total_pages(21), 2);
    assert_eq!(total_pages(28), 2);
    assert_eq!(total_pages(41), 3);
  }

  #[test]
  fn test_from_response_echoes_request() {
    let response = Paginated {
      items: numbers(20),
      total: 45,
      page: 1,
      per_page: 20,
      total_pages: 3,
    };
    let view = PageView::from_response(response, 1);
    assert_eq!(view.total_pages, 3);
    assert_eq!(view.current_page, 1);
  }
}
