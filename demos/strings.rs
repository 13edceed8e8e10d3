use std::io;

use pageheap::{ChunkHeap, ChunkPtr, HeapError};

/// Copies `text` into a fresh chunk, NUL-terminated.
fn store(
  heap: &mut ChunkHeap,
  text: &str,
  capacity: usize,
) -> Result<ChunkPtr, HeapError> {
  let ptr = heap.allocate(capacity)?;
  let data = heap.data_mut(&ptr);

  data[..text.len()].copy_from_slice(text.as_bytes());
  data[text.len()] = 0;

  Ok(ptr)
}

fn read(
  heap: &ChunkHeap,
  ptr: &ChunkPtr,
) -> String {
  let data = heap.data(ptr);
  let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());

  String::from_utf8_lossy(&data[..end]).into_owned()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let mut heap = ChunkHeap::init()?;
  let mut stdout = io::stdout();

  // --------------------------------------------------------------------
  // 1) Three strings of different capacities.
  // --------------------------------------------------------------------
  let string_1 = store(&mut heap, "hi there", 100)?;
  print!("{}", heap.chunk_info(&string_1));

  let string_2 = store(&mut heap, "hello", 150)?;
  print!("{}", heap.chunk_info(&string_2));

  let string_3 = store(&mut heap, "testings", 10)?;
  print!("{}", heap.chunk_info(&string_3));

  println!("{}", read(&heap, &string_1));
  println!("{}", read(&heap, &string_2));
  println!("{}", read(&heap, &string_3));

  // --------------------------------------------------------------------
  // 2) Free the middle string, then the first. They merge into one chunk.
  // --------------------------------------------------------------------
  heap.free(string_2);
  heap.free(string_1);

  println!("\nafter freeing the first two strings:");
  heap.dump_chunks(&mut stdout)?;

  // --------------------------------------------------------------------
  // 3) Free the last one. The arena is back to a single free chunk.
  // --------------------------------------------------------------------
  heap.free(string_3);

  println!("\nafter freeing everything ({} bytes free):", heap.available());
  heap.dump_chunks(&mut stdout)?;

  heap.teardown()?;

  Ok(())
}
