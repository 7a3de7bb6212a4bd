//! Resizable byte buffers with switchable ownership strength.
//!
//! A [`Buffer`] holds a contiguous region with a logical `size` and an
//! allocated `capacity`. Capacity growth ([`Buffer::prepare`]) is separate
//! from size growth ([`Buffer::append`]) so streaming producers can reserve
//! once and commit incrementally.
//!
//! # Strength
//!
//! A **strong** buffer owns its region and frees it on drop. A **weak**
//! buffer wraps memory owned by someone else (a static staging area, an
//! externally mapped block); it can be written within its capacity but never
//! reallocates or frees. Switching strength moves a [`RegionOwnership`]
//! token between the buffer and the caller:
//!
//! ```
//! use wsi_tile_cache::buffer::{Buffer, Strength};
//!
//! let mut buffer = Buffer::from_vec(vec![1, 2, 3, 4]);
//! let before = buffer.data();
//!
//! let ownership = buffer.weaken().unwrap();
//! assert_eq!(buffer.strength(), Strength::Weak);
//! assert!(buffer.prepare(16).is_err());
//!
//! buffer.strengthen(ownership).unwrap();
//! assert_eq!(buffer.strength(), Strength::Strong);
//! assert_eq!(buffer.data(), before);
//! ```
//!
//! # Sharing
//!
//! Mutators take `&mut self`, so a buffer is filled by a single writer. Once
//! published as a [`SharedBuffer`] it is immutable for every holder.

mod region;

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::BufferError;

use region::Region;
pub use region::{RegionOwnership, StrengthenError, Strength};

/// Largest capacity a buffer may reach (allocation size limit).
pub const MAX_CAPACITY: usize = isize::MAX as usize;

/// A published, read-only buffer handle.
pub type SharedBuffer = Arc<Buffer>;

/// Reference-counted-ready byte buffer; see the [module docs](self).
pub struct Buffer {
    region: Region,
    size: usize,
}

// SAFETY: borrowed regions are exclusively reachable through their buffer
// (guaranteed by the constructors), so the buffer behaves like `Box<[u8]>`.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    /// Create an empty strong buffer.
    pub fn new() -> Self {
        Self {
            region: Region::Owned(Box::default()),
            size: 0,
        }
    }

    /// Create a strong buffer with `capacity` bytes allocated and size 0.
    pub fn with_capacity(capacity: usize) -> Result<Self, BufferError> {
        check_capacity(capacity)?;
        let mut bytes = allocate(capacity)?;
        bytes.resize(capacity, 0);
        Ok(Self {
            region: Region::Owned(bytes.into_boxed_slice()),
            size: 0,
        })
    }

    /// Take ownership of `bytes`; size and capacity both equal its length.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self {
            region: Region::Owned(bytes.into_boxed_slice()),
            size,
        }
    }

    /// Create a strong buffer holding a copy of `bytes`.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Wrap a static region as a weak buffer whose first `size` bytes are valid.
    pub fn wrap_static(region: &'static mut [u8], size: usize) -> Result<Self, BufferError> {
        if size > region.len() {
            return Err(BufferError::InvalidArgument(format!(
                "size {} exceeds region of {} bytes",
                size,
                region.len()
            )));
        }
        let capacity = region.len();
        Ok(Self {
            region: Region::Borrowed {
                ptr: NonNull::from(region).cast::<u8>(),
                capacity,
            },
            size,
        })
    }

    /// Wrap externally owned memory as a weak buffer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `capacity` initialized
    /// bytes for the lifetime of the buffer, and nothing else may access that
    /// memory while the buffer exists.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        size: usize,
        capacity: usize,
    ) -> Result<Self, BufferError> {
        check_capacity(capacity)?;
        if size > capacity {
            return Err(BufferError::InvalidArgument(format!(
                "size {} exceeds capacity {}",
                size, capacity
            )));
        }
        Ok(Self {
            region: Region::Borrowed { ptr, capacity },
            size,
        })
    }

    /// Publish this buffer as an immutable shared handle.
    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(self)
    }

    /// Current reference strength.
    pub fn strength(&self) -> Strength {
        self.region.strength()
    }

    /// Whether a memory region backs this buffer.
    pub fn has_region(&self) -> bool {
        self.region.capacity() > 0
    }

    /// Start of the backing region, or `None` when there is none.
    ///
    /// The address may change after [`prepare`](Self::prepare),
    /// [`append`](Self::append) or [`resize`](Self::resize) on a strong
    /// buffer; it never changes on a weak one.
    pub fn data(&self) -> Option<NonNull<u8>> {
        self.has_region().then(|| self.region.start())
    }

    /// First unwritten byte, or `None` when there is no writable space left.
    pub fn end(&self) -> Option<NonNull<u8>> {
        if self.size >= self.region.capacity() {
            return None;
        }
        self.region.bytes()[self.size..]
            .first()
            .map(NonNull::from)
    }

    /// Logically valid bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Allocated bytes.
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// `capacity() - size()`.
    pub fn available_bytes(&self) -> usize {
        self.region.capacity() - self.size
    }

    /// The valid bytes `[0, size)`.
    pub fn as_slice(&self) -> &[u8] {
        &self.region.bytes()[..self.size]
    }

    /// Mutable view of the valid bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.region.bytes_mut()[..size]
    }

    /// Mutable view of the unwritten bytes `[size, capacity)`.
    pub fn spare_capacity_mut(&mut self) -> &mut [u8] {
        let size = self.size;
        &mut self.region.bytes_mut()[size..]
    }

    /// Grow capacity by at least `additional` bytes without changing size.
    ///
    /// Fails with [`BufferError::InvalidOperation`] on a weak buffer.
    pub fn prepare(&mut self, additional: usize) -> Result<(), BufferError> {
        if additional == 0 {
            return Ok(());
        }
        let required = self
            .region
            .capacity()
            .checked_add(additional)
            .ok_or_else(|| overflow(additional))?;
        self.grow_to(required)
    }

    /// Grow size by `additional` bytes and return the new, unwritten span.
    ///
    /// Capacity grows first, as in [`prepare`](Self::prepare), if the
    /// available bytes do not suffice. Weak buffers only fail when growth is
    /// needed.
    pub fn append(&mut self, additional: usize) -> Result<&mut [u8], BufferError> {
        let start = self.size;
        let end = start
            .checked_add(additional)
            .ok_or_else(|| overflow(additional))?;
        if end > self.region.capacity() {
            self.grow_to(end)?;
        }
        self.size = end;
        Ok(&mut self.region.bytes_mut()[start..end])
    }

    /// Append a copy of `bytes`.
    pub fn append_slice(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.append(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// Overwrite the size tracker without touching data or capacity.
    ///
    /// Shrinking does not erase bytes; the next append overwrites them.
    pub fn set_size(&mut self, size: usize) -> Result<(), BufferError> {
        if size > self.region.capacity() {
            return Err(BufferError::InvalidArgument(format!(
                "size {} exceeds capacity {}",
                size,
                self.region.capacity()
            )));
        }
        self.size = size;
        Ok(())
    }

    /// Reallocate the region to exactly `capacity` bytes (strong only).
    ///
    /// Size is clamped to the new capacity; bytes below it are preserved.
    pub fn resize(&mut self, capacity: usize) -> Result<(), BufferError> {
        check_capacity(capacity)?;
        let Region::Owned(bytes) = &mut self.region else {
            return Err(BufferError::InvalidOperation(
                "cannot reallocate a weak buffer",
            ));
        };
        if bytes.len() == capacity {
            return Ok(());
        }
        let kept = self.size.min(capacity);
        let mut resized = allocate(capacity)?;
        resized.extend_from_slice(&bytes[..kept]);
        resized.resize(capacity, 0);
        *bytes = resized.into_boxed_slice();
        self.size = kept;
        Ok(())
    }

    /// Equivalent to `resize(size())`.
    pub fn shrink_to_fit(&mut self) -> Result<(), BufferError> {
        self.resize(self.size)
    }

    /// Switch a strong buffer to weak, handing the region's ownership to the
    /// caller. The region does not move.
    pub fn weaken(&mut self) -> Result<RegionOwnership, BufferError> {
        let Region::Owned(bytes) = &mut self.region else {
            return Err(BufferError::InvalidOperation("buffer is already weak"));
        };
        let (ownership, ptr) = RegionOwnership::from_box(std::mem::take(bytes));
        self.region = Region::Borrowed {
            ptr,
            capacity: ownership.capacity(),
        };
        Ok(ownership)
    }

    /// Switch a weak buffer to strong by adopting the ownership of its region.
    ///
    /// The token must describe exactly the region this buffer references;
    /// otherwise it is returned inside the error.
    pub fn strengthen(&mut self, ownership: RegionOwnership) -> Result<(), StrengthenError> {
        let (ptr, capacity) = match &self.region {
            Region::Borrowed { ptr, capacity } => (*ptr, *capacity),
            Region::Owned(_) => {
                return Err(StrengthenError {
                    error: BufferError::InvalidOperation("buffer is already strong"),
                    ownership,
                })
            }
        };
        if !ownership.matches(ptr, capacity) {
            return Err(StrengthenError {
                error: BufferError::InvalidArgument(
                    "ownership token does not describe this buffer's region".to_string(),
                ),
                ownership,
            });
        }
        // SAFETY: the token matches the region this buffer is the sole
        // accessor of, so after adoption the buffer is the only reference.
        let bytes = unsafe { ownership.into_boxed_slice() };
        self.region = Region::Owned(bytes);
        Ok(())
    }

    fn grow_to(&mut self, required: usize) -> Result<(), BufferError> {
        check_capacity(required)?;
        let Region::Owned(bytes) = &mut self.region else {
            return Err(BufferError::InvalidOperation(
                "cannot grow a weak buffer",
            ));
        };
        let doubled = required.max(bytes.len().saturating_mul(2)).min(MAX_CAPACITY);
        // Fall back to the exact requirement when doubling cannot be allocated
        let (mut grown, capacity) = match allocate(doubled) {
            Ok(grown) => (grown, doubled),
            Err(_) => (allocate(required)?, required),
        };
        grown.extend_from_slice(&bytes[..self.size]);
        grown.resize(capacity, 0);
        *bytes = grown.into_boxed_slice();
        Ok(())
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("strength", &self.strength())
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .finish()
    }
}

fn check_capacity(capacity: usize) -> Result<(), BufferError> {
    if capacity > MAX_CAPACITY {
        return Err(BufferError::InvalidArgument(format!(
            "capacity {} exceeds the maximum of {} bytes",
            capacity, MAX_CAPACITY
        )));
    }
    Ok(())
}

/// Reserve exactly `capacity` bytes, reporting allocator failure as an error.
fn allocate(capacity: usize) -> Result<Vec<u8>, BufferError> {
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(capacity).map_err(|e| {
        BufferError::InvalidArgument(format!("cannot allocate {} bytes: {}", capacity, e))
    })?;
    Ok(bytes)
}

fn overflow(additional: usize) -> BufferError {
    BufferError::InvalidArgument(format!("growing by {} bytes overflows", additional))
}
