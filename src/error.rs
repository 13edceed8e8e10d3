//! Error types for the chunk heap.

use std::io;

use thiserror::Error;

/// Errors reported by [`ChunkHeap`](crate::ChunkHeap) operations.
///
/// Arena errors are fatal: the heap is unusable (acquisition) or the process
/// can no longer trust its view of the mapping (release). Allocation errors
/// are recoverable and leave the chunk list untouched.
#[derive(Error, Debug)]
pub enum HeapError {
  /// The operating system refused to map the arena.
  #[error("failed to map arena of {length} bytes: {source}")]
  ArenaAcquisition {
    /// Requested arena length in bytes.
    length: usize,
    #[source]
    source: io::Error,
  },

  /// The operating system refused to unmap the arena.
  #[error("failed to unmap arena of {length} bytes: {source}")]
  ArenaRelease {
    /// Length of the mapping that could not be released.
    length: usize,
    #[source]
    source: io::Error,
  },

  /// A full circular scan found no free chunk larger than the request.
  #[error("out of memory: requested {requested} bytes, {available} bytes free")]
  OutOfMemory { requested: usize, available: usize },

  /// A candidate chunk could not host the rounded allocation plus a
  /// remainder header.
  #[error("cannot split chunk of {chunk_size} bytes for a request of {requested} bytes")]
  InvalidSplit { requested: usize, chunk_size: usize },

  /// Zero-byte requests are rejected before searching.
  #[error("allocation size must be positive")]
  ZeroSize,
}

impl HeapError {
  /// Returns `true` for errors after which the heap must not be used.
  pub fn is_fatal(&self) -> bool {
    matches!(self, HeapError::ArenaAcquisition { .. } | HeapError::ArenaRelease { .. })
  }
}

pub type Result<T> = std::result::Result<T, HeapError>;
