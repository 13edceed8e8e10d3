//! Chunk header layout.
//!
//! ```text
//!   offset   0        4         8        12       16
//!            ┌────────┬─────────┬────────┬────────┬──────────────────┐
//!            │  size  │ in_use  │  next  │  prev  │   data (size)    │
//!            └────────┴─────────┴────────┴────────┴──────────────────┘
//!            all fields are little-endian u32, links are arena offsets
//! ```

use std::fmt;

/// Bytes occupied by a chunk header in the arena.
pub const HEADER_SIZE: usize = 16;

pub(crate) const HEADER: u32 = HEADER_SIZE as u32;

const SIZE_AT: usize = 0;
const IN_USE_AT: usize = 4;
const NEXT_AT: usize = 8;
const PREV_AT: usize = 12;

/// Decoded header of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
  /// Usable bytes after the header.
  pub size: u32,
  pub in_use: bool,
  pub next: u32,
  pub prev: u32,
}

impl Chunk {
  pub fn new(
    size: u32,
    in_use: bool,
    next: u32,
    prev: u32,
  ) -> Self {
    Self {
      size,
      in_use,
      next,
      prev,
    }
  }

  pub fn read(
    bytes: &[u8],
    offset: u32,
  ) -> Self {
    let at = offset as usize;

    Self {
      size: read_u32(bytes, at + SIZE_AT),
      in_use: read_u32(bytes, at + IN_USE_AT) != 0,
      next: read_u32(bytes, at + NEXT_AT),
      prev: read_u32(bytes, at + PREV_AT),
    }
  }

  pub fn write(
    &self,
    bytes: &mut [u8],
    offset: u32,
  ) {
    let at = offset as usize;

    write_u32(bytes, at + SIZE_AT, self.size);
    write_u32(bytes, at + IN_USE_AT, u32::from(self.in_use));
    write_u32(bytes, at + NEXT_AT, self.next);
    write_u32(bytes, at + PREV_AT, self.prev);
  }

  /// Offset one past the end of this chunk's data region.
  pub fn end(
    &self,
    offset: u32,
  ) -> u32 {
    offset + HEADER + self.size
  }
}

fn read_u32(
  bytes: &[u8],
  at: usize,
) -> u32 {
  let mut word = [0u8; 4];
  word.copy_from_slice(&bytes[at..at + 4]);
  u32::from_le_bytes(word)
}

fn write_u32(
  bytes: &mut [u8],
  at: usize,
  value: u32,
) {
  bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

/// Handle to an allocated data region.
///
/// Only the [`ChunkHeap`](crate::ChunkHeap) that returned it can resolve it to
/// bytes; debug builds panic when a handle reaches a different heap. It is
/// neither `Copy` nor `Clone`: [`ChunkHeap::free`](crate::ChunkHeap::free)
/// consumes it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ChunkPtr {
  heap: usize,
  data: u32,
}

impl ChunkPtr {
  pub(crate) fn from_header(
    heap: usize,
    header: u32,
  ) -> Self {
    Self {
      heap,
      data: header + HEADER,
    }
  }

  pub(crate) fn heap(&self) -> usize {
    self.heap
  }

  pub(crate) fn header(&self) -> u32 {
    self.data - HEADER
  }

  /// Offset of the data region from the arena base.
  pub fn offset(&self) -> usize {
    self.data as usize
  }
}

/// Snapshot of one chunk as seen by [`ChunkHeap::chunks`](crate::ChunkHeap::chunks).
///
/// All positions are header offsets from the arena base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
  pub offset: usize,
  pub size: usize,
  pub in_use: bool,
  pub next: usize,
  pub prev: usize,
}

impl ChunkInfo {
  pub(crate) fn new(
    offset: u32,
    chunk: Chunk,
  ) -> Self {
    Self {
      offset: offset as usize,
      size: chunk.size as usize,
      in_use: chunk.in_use,
      next: chunk.next as usize,
      prev: chunk.prev as usize,
    }
  }
}

impl fmt::Display for ChunkInfo {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "chunk @ {:#06x}", self.offset)?;
    writeln!(f, "    size: {}", self.size)?;
    writeln!(f, "    in use: {}", self.in_use)?;
    writeln!(f, "    next: {:#06x}", self.next)?;
    writeln!(f, "    prev: {:#06x}", self.prev)
  }
}
