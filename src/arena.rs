//! Arena Manager: owns the single region mapped from the operating system.

use std::{io, mem::ManuallyDrop, ptr::NonNull, slice};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE};
use log::{debug, error};

use crate::error::{HeapError, Result};

/// Returns the operating system page size.
pub fn page_size() -> io::Result<usize> {
  let size = unsafe { libc::sysconf(_SC_PAGESIZE) };

  if size <= 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(size as usize)
}

/// A page-aligned, zero-initialized, fixed-length mapping.
pub(crate) struct Arena {
  base: NonNull<u8>,
  len: usize,
}

impl Arena {
  pub fn map(len: usize) -> Result<Self> {
    if len == 0 || u32::try_from(len).is_err() {
      return Err(HeapError::ArenaAcquisition {
        length: len,
        source: io::Error::new(
          io::ErrorKind::InvalidInput,
          "arena length must fit in a u32 and be non-zero",
        ),
      });
    }

    let address = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_ANONYMOUS | MAP_PRIVATE,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      return Err(HeapError::ArenaAcquisition {
        length: len,
        source: io::Error::last_os_error(),
      });
    }

    let base = NonNull::new(address as *mut u8).ok_or_else(|| HeapError::ArenaAcquisition {
      length: len,
      source: io::Error::other("mmap returned a null mapping"),
    })?;

    debug!("mapped arena of {} bytes at {:?}", len, base);

    Ok(Self { base, len })
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn bytes(&self) -> &[u8] {
    // The mapping stays valid and exclusively owned until `release` or drop.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.len) }
  }

  pub fn bytes_mut(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.len) }
  }

  /// Unmaps the region, reporting the OS error if there is one.
  pub fn release(self) -> Result<()> {
    let this = ManuallyDrop::new(self);

    unsafe { this.unmap() }.map_err(|source| HeapError::ArenaRelease {
      length: this.len,
      source,
    })
  }

  unsafe fn unmap(&self) -> io::Result<()> {
    if unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) } != 0 {
      return Err(io::Error::last_os_error());
    }

    debug!("unmapped arena of {} bytes at {:?}", self.len, self.base);
    Ok(())
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    if let Err(err) = unsafe { self.unmap() } {
      error!("failed to unmap arena at {:?}: {}", self.base, err);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_size() {
    let size = page_size().unwrap();

    assert!(size >= 4096);
    assert!(size.is_power_of_two());
  }

  #[test]
  fn test_map_is_zeroed_and_aligned() {
    let page = page_size().unwrap();
    let arena = Arena::map(page).unwrap();

    assert_eq!(arena.len(), page);
    assert_eq!(arena.base().as_ptr() as usize % page, 0);
    assert!(arena.bytes().iter().all(|&b| b == 0));

    arena.release().unwrap();
  }

  #[test]
  fn test_map_writable() {
    let mut arena = Arena::map(page_size().unwrap()).unwrap();

    arena.bytes_mut()[10] = 0xAB;

    assert_eq!(arena.bytes()[10], 0xAB);
  }

  #[test]
  fn test_map_rejects_bad_lengths() {
    let zero = Arena::map(0);
    assert!(matches!(zero, Err(HeapError::ArenaAcquisition { length: 0, .. })));

    let huge = Arena::map(u32::MAX as usize + 1);
    assert!(matches!(huge, Err(HeapError::ArenaAcquisition { .. })));
  }
}
