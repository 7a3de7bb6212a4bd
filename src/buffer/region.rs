//! Backing memory regions for [`Buffer`](super::Buffer).
//!
//! A region is either owned (the buffer frees it) or borrowed (someone else
//! does). Moving a region between the two states always goes through a
//! [`RegionOwnership`] token, so at any time exactly one party is responsible
//! for freeing it.

use std::fmt;
use std::ptr::NonNull;

use thiserror::Error;

use crate::error::BufferError;

/// Reference strength of a buffer to its backing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strength {
    /// The buffer references memory it does not own and never frees or moves it.
    Weak,
    /// The buffer owns its memory and frees it on drop.
    Strong,
}

pub(crate) enum Region {
    Owned(Box<[u8]>),
    Borrowed { ptr: NonNull<u8>, capacity: usize },
}

impl Region {
    pub(crate) fn strength(&self) -> Strength {
        match self {
            Region::Owned(_) => Strength::Strong,
            Region::Borrowed { .. } => Strength::Weak,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        match self {
            Region::Owned(bytes) => bytes.len(),
            Region::Borrowed { capacity, .. } => *capacity,
        }
    }

    pub(crate) fn start(&self) -> NonNull<u8> {
        match self {
            Region::Owned(bytes) => NonNull::from(&bytes[..]).cast::<u8>(),
            Region::Borrowed { ptr, .. } => *ptr,
        }
    }

    /// The whole region, including bytes past the logical size.
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Region::Owned(bytes) => bytes,
            // SAFETY: borrowed regions are only built from pointers valid for
            // `capacity` initialized bytes and exclusively accessed through
            // this region (see `Buffer::wrap_static` and `Buffer::from_raw_parts`).
            Region::Borrowed { ptr, capacity } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *capacity)
            },
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Region::Owned(bytes) => bytes,
            // SAFETY: as in `bytes`, and `&mut self` guarantees exclusivity.
            Region::Borrowed { ptr, capacity } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), *capacity)
            },
        }
    }
}

/// Responsibility for freeing a region that a weak buffer references.
///
/// Returned by [`Buffer::weaken`](super::Buffer::weaken) and consumed by
/// [`Buffer::strengthen`](super::Buffer::strengthen). Dropping the token leaks
/// the region instead of freeing it, since weak buffers may still point at it.
#[must_use = "dropping a RegionOwnership leaks the region"]
pub struct RegionOwnership {
    ptr: NonNull<u8>,
    capacity: usize,
}

// SAFETY: the token is a unique handle to a heap allocation, like `Box<[u8]>`.
unsafe impl Send for RegionOwnership {}
unsafe impl Sync for RegionOwnership {}

impl RegionOwnership {
    pub(crate) fn from_box(bytes: Box<[u8]>) -> (Self, NonNull<u8>) {
        let capacity = bytes.len();
        let ptr = NonNull::from(Box::leak(bytes)).cast::<u8>();
        (Self { ptr, capacity }, ptr)
    }

    /// Take responsibility for an externally allocated region.
    ///
    /// # Safety
    ///
    /// `ptr` must come from a `Box<[u8]>` of exactly `capacity` bytes allocated
    /// by the global allocator (e.g. via `Box::into_raw`), and no other party
    /// may free it afterwards.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, capacity: usize) -> Self {
        Self { ptr, capacity }
    }

    /// Start of the region.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Size of the region in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn matches(&self, ptr: NonNull<u8>, capacity: usize) -> bool {
        self.ptr == ptr && self.capacity == capacity
    }

    /// Reclaim the region as a box, freeing it when the box drops.
    ///
    /// # Safety
    ///
    /// No buffer may still reference the region.
    pub unsafe fn into_boxed_slice(self) -> Box<[u8]> {
        Box::from_raw(std::ptr::slice_from_raw_parts_mut(
            self.ptr.as_ptr(),
            self.capacity,
        ))
    }
}

impl fmt::Debug for RegionOwnership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionOwnership")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A failed [`Buffer::strengthen`](super::Buffer::strengthen); the ownership
/// token is handed back untouched.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StrengthenError {
    pub error: BufferError,
    pub ownership: RegionOwnership,
}

impl StrengthenError {
    /// Recover the ownership token.
    pub fn into_ownership(self) -> RegionOwnership {
        self.ownership
    }
}
