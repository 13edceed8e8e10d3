use std::{io, ptr::NonNull};

use log::{debug, trace, warn};

use crate::{
  align_to,
  arena::{Arena, page_size},
  chunk::{Chunk, ChunkInfo, ChunkPtr, HEADER, HEADER_SIZE},
  config::{HeapConfig, SearchMode},
  error::{HeapError, Result},
};

/// The lowest-address chunk. Merges always absorb into the lower chunk, so
/// the head never moves.
const HEAD: u32 = 0;

/// Explicit-free allocator over a single fixed-size arena.
///
/// Chunks form a circular doubly-linked list ordered by address. Every link
/// is an offset into the arena, never a raw address.
pub struct ChunkHeap {
  arena: Arena,
  available: usize,
  search: SearchMode,
}

impl ChunkHeap {
  /// Maps one page and installs a single free chunk spanning it.
  pub fn init() -> Result<Self> {
    Self::with_config(HeapConfig::default())
  }

  pub fn with_config(config: HeapConfig) -> Result<Self> {
    let page = page_size().map_err(|source| HeapError::ArenaAcquisition {
      length: 0,
      source,
    })?;
    let length = config.pages.checked_mul(page).unwrap_or(usize::MAX);
    let mut arena = Arena::map(length)?;

    let size = arena.len() - HEADER_SIZE;
    Chunk::new(size as u32, false, HEAD, HEAD).write(arena.bytes_mut(), HEAD);

    Ok(Self {
      arena,
      available: size,
      search: config.search,
    })
  }

  /// Releases the arena. Every outstanding [`ChunkPtr`] becomes meaningless.
  pub fn teardown(self) -> Result<()> {
    self.arena.release()
  }

  /// First-fit allocation of `size` bytes.
  ///
  /// Chunks whose size merely equals the request are skipped so the split
  /// always has room for a remainder header.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<ChunkPtr> {
    if size == 0 {
      return Err(HeapError::ZeroSize);
    }

    let out_of_memory = HeapError::OutOfMemory {
      requested: size,
      available: self.available,
    };

    let Ok(requested) = u32::try_from(size) else {
      return Err(out_of_memory);
    };

    let mut refused = None;
    let mut offset = HEAD;

    loop {
      let chunk = self.header(offset);

      if !chunk.in_use && chunk.size > requested {
        match self.split(offset, requested) {
          Ok(_) => return Ok(self.claim(offset)),
          Err(err) => {
            warn!("refused split of chunk @ {:#x}: {}", offset, err);

            if self.search == SearchMode::StopOnRefusedSplit {
              return Err(err);
            }
            refused = Some(err);
          }
        }
      }

      offset = chunk.next;
      if offset == HEAD {
        break;
      }
    }

    Err(refused.unwrap_or(out_of_memory))
  }

  /// Returns a chunk to the heap and merges it with free neighbours.
  pub fn free(
    &mut self,
    ptr: ChunkPtr,
  ) {
    self.check_owner(&ptr);

    let offset = ptr.header();
    let mut chunk = self.header(offset);

    debug_assert!(chunk.in_use, "free of a chunk that is not in use @ {:#x}", offset);

    chunk.in_use = false;
    self.set_header(offset, chunk);
    self.available += chunk.size as usize;

    debug!("free @ {:#x} ({} bytes)", offset, chunk.size);

    self.coalesce(offset);

    #[cfg(debug_assertions)]
    self.assert_invariants();
  }

  pub fn data(
    &self,
    ptr: &ChunkPtr,
  ) -> &[u8] {
    self.check_owner(ptr);
    let size = self.header(ptr.header()).size as usize;
    &self.arena.bytes()[ptr.offset()..ptr.offset() + size]
  }

  pub fn data_mut(
    &mut self,
    ptr: &ChunkPtr,
  ) -> &mut [u8] {
    self.check_owner(ptr);
    let size = self.header(ptr.header()).size as usize;
    &mut self.arena.bytes_mut()[ptr.offset()..ptr.offset() + size]
  }

  /// Raw address of the data region, for callers handing it to foreign code.
  pub fn as_ptr(
    &self,
    ptr: &ChunkPtr,
  ) -> NonNull<u8> {
    self.check_owner(ptr);
    assert!(
      ptr.offset() < self.arena.len(),
      "handle @ {:#x} is outside an arena of {} bytes",
      ptr.offset(),
      self.arena.len()
    );
    // In bounds per the check above; the base keeps the mapping's write access.
    unsafe { self.arena.base().add(ptr.offset()) }
  }

  /// Header of the chunk owning `ptr`.
  pub fn chunk_info(
    &self,
    ptr: &ChunkPtr,
  ) -> ChunkInfo {
    self.check_owner(ptr);
    ChunkInfo::new(ptr.header(), self.header(ptr.header()))
  }

  /// Walks the chunk list once from the head.
  pub fn chunks(&self) -> Chunks<'_> {
    Chunks {
      heap: self,
      next: Some(HEAD),
    }
  }

  pub fn chunk_count(&self) -> usize {
    self.chunks().count()
  }

  /// Sum of the data sizes of all free chunks.
  pub fn available(&self) -> usize {
    self.available
  }

  pub fn arena_len(&self) -> usize {
    self.arena.len()
  }

  pub const fn header_size() -> usize {
    HEADER_SIZE
  }

  /// Writes every chunk in list order.
  pub fn dump_chunks<W: io::Write>(
    &self,
    out: &mut W,
  ) -> io::Result<()> {
    for info in self.chunks() {
      write!(out, "{info}")?;
    }
    Ok(())
  }

  /// Panics if the chunk list is corrupted.
  ///
  /// Checks that chunks tile the arena in address order, that `prev` links
  /// mirror `next` links, that no two address-adjacent chunks are both free
  /// and that the free byte counter matches the list.
  ///
  /// The last chunk and the head are linked by the wrap but are not
  /// contiguous, so both may be free at once.
  pub fn assert_invariants(&self) {
    let len = self.arena.len();
    let max_chunks = len / HEADER_SIZE;

    let mut offset = HEAD;
    let mut covered = 0usize;
    let mut free_bytes = 0usize;
    let mut count = 0usize;
    let mut previous_free = false;

    loop {
      let chunk = self.header(offset);

      assert_eq!(offset as usize, covered, "chunk @ {offset:#x} leaves a gap or overlaps");
      assert!(chunk.next as usize + HEADER_SIZE <= len, "chunk @ {offset:#x} links outside the arena");
      assert_eq!(
        self.header(chunk.next).prev,
        offset,
        "chunk @ {:#x} is not the prev of its next",
        offset
      );
      assert!(
        !(previous_free && !chunk.in_use),
        "adjacent free chunks ending @ {offset:#x}"
      );

      covered += HEADER_SIZE + chunk.size as usize;
      if !chunk.in_use {
        free_bytes += chunk.size as usize;
      }
      previous_free = !chunk.in_use;

      count += 1;
      assert!(count <= max_chunks, "chunk list never returns to head");

      offset = chunk.next;
      if offset == HEAD {
        break;
      }
    }

    assert_eq!(covered, len, "chunks do not cover the arena");
    assert_eq!(free_bytes, self.available, "free byte counter out of sync");

    let mut back = HEAD;
    for _ in 0..count {
      back = self.header(back).prev;
    }
    assert_eq!(back, HEAD, "prev walk does not return to head");
  }

  /// Shrinks the free chunk at `offset` to the rounded request and carves a
  /// free remainder chunk out of the leftover space.
  ///
  /// Nothing is written when the split is refused.
  fn split(
    &mut self,
    offset: u32,
    requested: u32,
  ) -> Result<u32> {
    let mut chunk = self.header(offset);

    let allocation = align_to!(requested as usize, HEADER_SIZE);
    let leftover = (chunk.size as usize)
      .checked_sub(allocation)
      .filter(|leftover| *leftover >= HEADER_SIZE)
      .ok_or(HeapError::InvalidSplit {
        requested: requested as usize,
        chunk_size: chunk.size as usize,
      })?;

    let remainder_offset = offset + HEADER + allocation as u32;
    let remainder = Chunk::new((leftover - HEADER_SIZE) as u32, false, chunk.next, offset);

    if chunk.next == offset {
      chunk.prev = remainder_offset;
    } else {
      let mut after = self.header(chunk.next);
      after.prev = remainder_offset;
      self.set_header(chunk.next, after);
    }

    chunk.size = allocation as u32;
    chunk.next = remainder_offset;
    self.set_header(offset, chunk);
    self.set_header(remainder_offset, remainder);

    self.available -= HEADER_SIZE;

    trace!(
      "split @ {:#x}: {} bytes kept, remainder @ {:#x} of {} bytes",
      offset, allocation, remainder_offset, remainder.size
    );

    Ok(remainder_offset)
  }

  fn claim(
    &mut self,
    offset: u32,
  ) -> ChunkPtr {
    let mut chunk = self.header(offset);
    chunk.in_use = true;
    self.set_header(offset, chunk);
    self.available -= chunk.size as usize;

    debug!("alloc @ {:#x} ({} bytes)", offset, chunk.size);

    #[cfg(debug_assertions)]
    self.assert_invariants();

    ChunkPtr::from_header(self.id(), offset)
  }

  /// Base address of the mapping, stamped into every handle.
  fn id(&self) -> usize {
    self.arena.base().as_ptr() as usize
  }

  fn check_owner(
    &self,
    ptr: &ChunkPtr,
  ) {
    debug_assert_eq!(ptr.heap(), self.id(), "handle was issued by another heap");
  }

  /// Merges the free chunk at `offset` with a free predecessor, then with a
  /// free successor. The wrap-around link between the last chunk and the
  /// head joins chunks that are not contiguous in memory and is never merged.
  fn coalesce(
    &mut self,
    mut offset: u32,
  ) {
    let chunk = self.header(offset);

    if offset != HEAD && !self.header(chunk.prev).in_use {
      self.absorb_next(chunk.prev);
      offset = chunk.prev;
    }

    let chunk = self.header(offset);

    if chunk.next != HEAD && !self.header(chunk.next).in_use {
      self.absorb_next(offset);
    }
  }

  /// Folds the chunk after `offset` into it, reclaiming its header.
  fn absorb_next(
    &mut self,
    offset: u32,
  ) {
    let mut chunk = self.header(offset);
    let absorbed_offset = chunk.next;
    let absorbed = self.header(absorbed_offset);

    assert_eq!(
      chunk.end(offset),
      absorbed_offset,
      "merging chunks that are not contiguous"
    );

    chunk.size += HEADER + absorbed.size;
    chunk.next = absorbed.next;
    self.set_header(offset, chunk);

    let mut after = self.header(absorbed.next);
    after.prev = offset;
    self.set_header(absorbed.next, after);

    self.available += HEADER_SIZE;

    trace!(
      "merge @ {:#x}: absorbed {:#x}, now {} bytes",
      offset, absorbed_offset, chunk.size
    );
  }

  fn header(
    &self,
    offset: u32,
  ) -> Chunk {
    Chunk::read(self.arena.bytes(), offset)
  }

  fn set_header(
    &mut self,
    offset: u32,
    chunk: Chunk,
  ) {
    chunk.write(self.arena.bytes_mut(), offset);
  }
}

/// Iterator over the chunk list, see [`ChunkHeap::chunks`].
pub struct Chunks<'a> {
  heap: &'a ChunkHeap,
  next: Option<u32>,
}

impl Iterator for Chunks<'_> {
  type Item = ChunkInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let offset = self.next?;
    let chunk = self.heap.header(offset);

    self.next = (chunk.next != HEAD).then_some(chunk.next);

    Some(ChunkInfo::new(offset, chunk))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fresh() -> ChunkHeap {
    ChunkHeap::init().unwrap()
  }

  #[test]
  fn test_init_single_chunk() {
    let heap = fresh();
    let chunks: Vec<_> = heap.chunks().collect();

    assert_eq!(heap.arena_len(), page_size().unwrap());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].size, page_size().unwrap() - HEADER_SIZE);
    assert!(!chunks[0].in_use);
    assert_eq!(chunks[0].next, 0);
    assert_eq!(chunks[0].prev, 0);
    assert_eq!(heap.available(), page_size().unwrap() - HEADER_SIZE);

    heap.teardown().unwrap();
  }

  #[test]
  fn test_init_zero_pages() {
    let result = ChunkHeap::with_config(HeapConfig::default().with_pages(0));

    assert!(matches!(result, Err(HeapError::ArenaAcquisition { .. })));
  }

  #[test]
  fn test_allocate_splits_sole_chunk() {
    let mut heap = fresh();

    let ptr = heap.allocate(100).unwrap();
    let chunks: Vec<_> = heap.chunks().collect();

    assert_eq!(ptr.offset(), HEADER_SIZE);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].size, 112);
    assert!(chunks[0].in_use);
    assert_eq!(chunks[1].offset, HEADER_SIZE + 112);
    assert_eq!(chunks[1].size, page_size().unwrap() - 2 * HEADER_SIZE - 112);
    assert_eq!(chunks[0].next, chunks[1].offset);
    assert_eq!(chunks[0].prev, chunks[1].offset);
    assert_eq!(chunks[1].next, 0);
    assert_eq!(chunks[1].prev, 0);
    assert_eq!(heap.available(), chunks[1].size);
  }

  #[test]
  fn test_allocate_keeps_aligned_sizes() {
    let mut heap = fresh();

    let ptr = heap.allocate(160).unwrap();

    assert_eq!(heap.chunk_info(&ptr).size, 160);
    assert_eq!(heap.data(&ptr).len(), 160);
  }

  #[test]
  fn test_allocate_zero() {
    let mut heap = fresh();

    assert!(matches!(heap.allocate(0), Err(HeapError::ZeroSize)));
  }

  #[test]
  fn test_allocate_too_large() {
    let mut heap = fresh();
    let whole = page_size().unwrap() - HEADER_SIZE;

    let err = heap.allocate(whole).unwrap_err();

    assert!(matches!(
      err,
      HeapError::OutOfMemory { requested, available } if requested == whole && available == whole
    ));
    assert_eq!(heap.chunk_count(), 1);
  }

  #[test]
  fn test_refused_split_stops_scan() {
    let config = HeapConfig::default().with_search(SearchMode::StopOnRefusedSplit);
    let mut heap = ChunkHeap::with_config(config).unwrap();
    let whole = page_size().unwrap() - HEADER_SIZE;

    // Fits the strict inequality but rounds past the chunk.
    let err = heap.allocate(whole - 1).unwrap_err();

    assert!(matches!(err, HeapError::InvalidSplit { .. }));
    assert_eq!(heap.chunk_count(), 1);
    heap.assert_invariants();
  }

  #[test]
  fn test_refused_split_continues_scan() {
    let mut heap = fresh();
    let whole = page_size().unwrap() - HEADER_SIZE;

    // Leave a 20 byte free chunk at the head followed by a big free tail.
    let small = heap.allocate(20).unwrap();
    let guard = heap.allocate(16).unwrap();
    heap.free(small);

    assert_eq!(heap.chunks().next().unwrap().size, 32);

    // 30 bytes rounds to 32, leaving no room for a header in the head chunk.
    let ptr = heap.allocate(30).unwrap();

    assert!(ptr.offset() > heap.chunk_info(&guard).offset);
    assert!(whole > heap.available());
    heap.assert_invariants();
  }

  #[test]
  fn test_refused_split_reported_after_full_scan() {
    let mut heap = fresh();

    let small = heap.allocate(20).unwrap();
    let _rest = heap.allocate(page_size().unwrap() - 4 * HEADER_SIZE - 32).unwrap();
    heap.free(small);

    let err = heap.allocate(30).unwrap_err();

    assert!(matches!(err, HeapError::InvalidSplit { requested: 30, chunk_size: 32 }));
  }

  #[test]
  fn test_free_merges_with_tail() {
    let mut heap = fresh();

    let ptr = heap.allocate(64).unwrap();
    heap.free(ptr);

    let chunks: Vec<_> = heap.chunks().collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].size, page_size().unwrap() - HEADER_SIZE);
    assert_eq!(chunks[0].next, 0);
    assert_eq!(chunks[0].prev, 0);
  }

  #[test]
  fn test_free_merges_with_prev() {
    let mut heap = fresh();

    let a = heap.allocate(32).unwrap();
    let b = heap.allocate(32).unwrap();
    let c = heap.allocate(32).unwrap();

    heap.free(a);
    heap.free(b);

    let chunks: Vec<_> = heap.chunks().collect();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].size, 32 + HEADER_SIZE + 32);
    assert!(!chunks[0].in_use);
    assert_eq!(chunks[1].offset, heap.chunk_info(&c).offset);
    assert_eq!(chunks[1].prev, 0);
  }

  #[test]
  fn test_free_middle_keeps_neighbours() {
    let mut heap = fresh();

    let _a = heap.allocate(32).unwrap();
    let b = heap.allocate(32).unwrap();
    let _c = heap.allocate(32).unwrap();
    let before = heap.chunk_count();

    heap.free(b);

    assert_eq!(heap.chunk_count(), before);
    assert_eq!(heap.chunks().filter(|c| !c.in_use).count(), 2);
  }

  #[test]
  fn test_freed_chunk_is_reused() {
    let mut heap = fresh();

    let first = heap.allocate(48).unwrap();
    let first_offset = first.offset();
    let _second = heap.allocate(48).unwrap();

    heap.free(first);
    let third = heap.allocate(8).unwrap();

    assert_eq!(third.offset(), first_offset);
  }

  #[test]
  fn test_data_roundtrip() {
    let mut heap = fresh();
    let ptr = heap.allocate(9).unwrap();

    heap.data_mut(&ptr)[..9].copy_from_slice(b"hi there\0");

    assert_eq!(&heap.data(&ptr)[..8], b"hi there");
    assert_eq!(
      unsafe { heap.as_ptr(&ptr).read() },
      b'h'
    );
  }

  #[test]
  fn test_dump_chunks() {
    let mut heap = fresh();
    let _ptr = heap.allocate(16).unwrap();

    let mut out = Vec::new();
    heap.dump_chunks(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(text.matches("chunk @").count(), 2);
    assert!(text.starts_with("chunk @ 0x0000\n    size: 16\n    in use: true\n"));
    assert!(text.contains("    next: 0x0000\n    prev: 0x0000\n"));
  }

  #[test]
  fn test_multi_page_arena() {
    let mut heap = ChunkHeap::with_config(HeapConfig::default().with_pages(2)).unwrap();

    assert_eq!(heap.arena_len(), 2 * page_size().unwrap());

    let big = heap.allocate(page_size().unwrap()).unwrap();
    assert_eq!(heap.data(&big).len(), page_size().unwrap());

    heap.free(big);
    assert_eq!(heap.chunk_count(), 1);
    heap.teardown().unwrap();
  }

  #[test]
  fn test_wrapped_neighbours_stay_apart() {
    let mut heap = fresh();

    let a = heap.allocate(32).unwrap();
    let _b = heap.allocate(32).unwrap();
    heap.free(a);

    let chunks: Vec<_> = heap.chunks().collect();
    let (head, tail) = (chunks[0], chunks[2]);

    assert_eq!(heap.chunk_count(), 3);
    assert!(!head.in_use);
    assert!(!tail.in_use);
    assert_eq!(head.prev, tail.offset);
    assert_eq!(tail.next, 0);
    heap.assert_invariants();
  }

  #[test]
  #[should_panic]
  fn test_as_ptr_rejects_handle_past_arena() {
    let page = page_size().unwrap();
    let mut large = ChunkHeap::with_config(HeapConfig::default().with_pages(4)).unwrap();
    let small = fresh();

    let _filler = large.allocate(3 * page).unwrap();
    let far = large.allocate(64).unwrap();
    assert!(far.offset() > small.arena_len());

    small.as_ptr(&far);
  }

  #[test]
  #[cfg(debug_assertions)]
  #[should_panic(expected = "handle was issued by another heap")]
  fn test_free_rejects_foreign_handle() {
    let mut heap = fresh();
    let mut other = fresh();

    let _mine = heap.allocate(32).unwrap();
    let theirs = other.allocate(32).unwrap();

    heap.free(theirs);
  }
}
