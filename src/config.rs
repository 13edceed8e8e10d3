/// What [`ChunkHeap::allocate`](crate::ChunkHeap::allocate) does when the
/// first fitting chunk cannot be split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
  /// Fail the allocation with [`HeapError::InvalidSplit`](crate::HeapError::InvalidSplit)
  /// at the first refused split.
  StopOnRefusedSplit,
  /// Keep scanning past refused candidates. `InvalidSplit` is only reported
  /// when the whole circle was walked and some candidate was refused.
  #[default]
  SkipRefusedSplit,
}

/// Parameters fixed at [`ChunkHeap::with_config`](crate::ChunkHeap::with_config).
///
/// ```rust
/// use pageheap::{HeapConfig, SearchMode};
///
/// let config = HeapConfig::default()
///   .with_pages(2)
///   .with_search(SearchMode::StopOnRefusedSplit);
///
/// assert_eq!(config.pages, 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  /// Arena length in operating system pages. The arena never grows.
  pub pages: usize,
  pub search: SearchMode,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      pages: 1,
      search: SearchMode::default(),
    }
  }
}

impl HeapConfig {
  pub fn with_pages(
    mut self,
    pages: usize,
  ) -> Self {
    self.pages = pages;
    self
  }

  pub fn with_search(
    mut self,
    search: SearchMode,
  ) -> Self {
    self.search = search;
    self
  }
}
