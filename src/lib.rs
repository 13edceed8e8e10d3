//! # pageheap - A Fixed-Arena Chunk Allocator
//!
//! This crate provides an **explicit-free first-fit allocator** over a single
//! page-aligned region mapped with `mmap(2)`. The region never grows: every
//! allocation is carved out of it and every free hands the bytes back.
//!
//! ## Overview
//!
//! The arena is partitioned into chunks. Each chunk is a header followed by
//! its data region, and all chunks are linked into a circular doubly-linked
//! list in address order:
//!
//! ```text
//!   Arena (one page):
//!
//!   ┌──────┬────────┬──────┬────────┬──────┬──────────────────────────────┐
//!   │ hdr  │ A data │ hdr  │ B data │ hdr  │          free data           │
//!   └──────┴────────┴──────┴────────┴──────┴──────────────────────────────┘
//!   ▲ head    used     ▲      used     ▲                free
//!   │                  │               │
//!   └── next ──────────┴── next ───────┴── next ──┐ (wraps back to head)
//! ```
//!
//! Links are stored as byte offsets from the arena base rather than as
//! addresses, and callers only ever hold an opaque [`ChunkPtr`] to the data.
//!
//! ## Crate Structure
//!
//! ```text
//!   pageheap
//!   ├── align      - Rounding macro (align_to!)
//!   ├── arena      - mmap/munmap of the backing region
//!   ├── chunk      - Header layout, ChunkPtr handle, ChunkInfo
//!   ├── config     - HeapConfig, SearchMode
//!   ├── error      - HeapError
//!   └── heap       - ChunkHeap: allocate, free, split, coalesce
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use pageheap::ChunkHeap;
//!
//! let mut heap = ChunkHeap::init()?;
//!
//! let greeting = heap.allocate(9)?;
//! heap.data_mut(&greeting)[..8].copy_from_slice(b"hi there");
//! assert_eq!(&heap.data(&greeting)[..8], b"hi there");
//!
//! heap.free(greeting);
//! assert_eq!(heap.chunk_count(), 1);
//!
//! heap.teardown()?;
//! # Ok::<(), pageheap::HeapError>(())
//! ```
//!
//! ## How It Works
//!
//! Allocation walks the list from the head and takes the first free chunk
//! strictly larger than the request. The request is rounded up to a multiple
//! of the header size, and the rest of the chunk becomes a new free chunk:
//!
//! ```text
//!   Split:
//!   ┌──────┬──────────────────────────────────────────┐
//!   │ hdr  │                 free (S)                 │
//!   └──────┴──────────────────────────────────────────┘
//!                          │
//!                          ▼
//!   ┌──────┬─────────────┬──────┬─────────────────────┐
//!   │ hdr  │  used (A)   │ hdr  │  free (S - A - hdr) │
//!   └──────┴─────────────┴──────┴─────────────────────┘
//! ```
//!
//! Freeing marks the chunk free and merges it with a free neighbour on
//! either side, reclaiming the neighbour's header:
//!
//! ```text
//!   Coalesce:
//!   ┌──────┬────────┬──────┬────────┬──────┬────────┐
//!   │ hdr  │ free   │ hdr  │ freed  │ hdr  │ used   │
//!   └──────┴────────┴──────┴────────┴──────┴────────┘
//!                          │
//!                          ▼
//!   ┌──────┬────────────────────────┬──────┬────────┐
//!   │ hdr  │          free          │ hdr  │ used   │
//!   └──────┴────────────────────────┴──────┴────────┘
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `ChunkHeap` takes `&mut self` and does no locking
//! - **Fixed size**: the arena is sized once and never grows
//! - **Header alignment only**: data regions are aligned to the 16 byte header
//! - **Unix-only**: requires `libc` for `mmap`/`munmap`
//!
//! ## Safety
//!
//! The unsafe code is confined to mapping the region and viewing it as a
//! byte slice. Handing a [`ChunkPtr`] to a heap that did not produce it, or
//! freeing a chunk twice through a forged handle, corrupts the chunk list;
//! debug builds catch this with [`ChunkHeap::assert_invariants`].

pub mod align;
mod arena;
mod chunk;
mod config;
mod error;
mod heap;

pub use arena::page_size;
pub use chunk::{ChunkInfo, ChunkPtr, HEADER_SIZE};
pub use config::{HeapConfig, SearchMode};
pub use error::{HeapError, Result};
pub use heap::{ChunkHeap, Chunks};
